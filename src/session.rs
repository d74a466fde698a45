//! Движок согласования звонка: одна сторона звонка от захвата медиа до отбоя.
//!
//! Все события (изменения записи звонка, кандидаты собеседника, события
//! соединения) обрабатываются одной задачей строго по очереди. Каждый
//! обработчик завершается до начала следующего, поэтому answer не может быть
//! применён раньше своего offer, а сброс буфера кандидатов всегда идёт сразу
//! после установки remote description.

use crate::config::EngineConfig;
use crate::error::{CallError, Result};
use crate::logger::dump_candidate;
use crate::peer::connection::{
    PeerConnection, PeerEvent, PeerEvents, PeerFactory, WebRtcPeerFactory,
};
use crate::peer::ice::{
    analyze_candidates, apply_pending_candidates, resolve_ice_servers, PathDiscovery,
};
use crate::peer::media::{LocalMedia, MediaDevices};
use crate::peer::state::NegotiationState;
use crate::peer::types::{
    CallRecord, ConnectionStatus, IceCandidate, MediaKind, RemoteTrack, SdpType, TrackKind,
};
use crate::signaling::{CandidateFeed, SignalingStore, Subscription};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Параметры одного звонка
#[derive(Debug, Clone)]
pub struct CallParams {
    pub call_id: String,
    pub is_initiator: bool,
    pub media_kind: MediaKind,
    pub local_participant: String,
    pub remote_participant: String,
}

/// Наблюдаемое состояние звонка для UI
#[derive(Debug, Clone, Default)]
pub struct CallState {
    pub local_media: Option<LocalMedia>,
    pub remote_media: Vec<RemoteTrack>,
    pub status: ConnectionStatus,
    pub muted: bool,
    pub video_disabled: bool,
    pub last_error: Option<CallError>,
}

/// Внешние сервисы, от которых зависит движок
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SignalingStore>,
    pub feed: Arc<dyn CandidateFeed>,
    pub media: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerFactory>,
    pub path_discovery: Arc<dyn PathDiscovery>,
}

pub struct CallEngine {
    config: EngineConfig,
    deps: Collaborators,
}

impl CallEngine {
    pub fn new(config: EngineConfig, deps: Collaborators) -> Self {
        Self { config, deps }
    }

    /// Движок с peer connection из крейта `webrtc`
    pub fn with_webrtc(
        config: EngineConfig,
        store: Arc<dyn SignalingStore>,
        feed: Arc<dyn CandidateFeed>,
        media: Arc<dyn MediaDevices>,
        path_discovery: Arc<dyn PathDiscovery>,
    ) -> Self {
        let peers = Arc::new(WebRtcPeerFactory::new(&config));
        Self::new(
            config,
            Collaborators {
                store,
                feed,
                media,
                peers,
                path_discovery,
            },
        )
    }

    /// Захватывает медиа, создаёт соединение и запускает согласование.
    ///
    /// Отказ в доступе к медиа возвращается как `MediaAccessDenied`, соединение
    /// при этом не создаётся. При любой ошибке после захвата локальные треки
    /// останавливаются.
    pub async fn start(&self, params: CallParams) -> Result<CallHandle> {
        info!(
            call_id = %params.call_id,
            initiator = params.is_initiator,
            "Starting {:?} call with {}",
            params.media_kind,
            params.remote_participant
        );

        let media = self.deps.media.acquire(params.media_kind).await?;

        let servers = resolve_ice_servers(&self.config, self.deps.path_discovery.as_ref()).await;
        let (peer, events) = match self.deps.peers.create(&servers).await {
            Ok(created) => created,
            Err(e) => {
                media.stop_all();
                return Err(e);
            }
        };

        let (records, remote_candidates) = match self.prepare(&params, peer.as_ref(), &media).await
        {
            Ok(subs) => subs,
            Err(e) => {
                warn!(call_id = %params.call_id, "Call setup failed: {e}");
                if let Err(close_err) = peer.close().await {
                    warn!("Failed to close peer connection: {close_err}");
                }
                media.stop_all();
                return Err(e);
            }
        };

        let (state_tx, state_rx) = watch::channel(CallState {
            local_media: Some(media.clone()),
            ..Default::default()
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            call_id: params.call_id.clone(),
            store: self.deps.store.clone(),
            media,
            peer: Mutex::new(Some(peer.clone())),
            state_tx,
            shutdown_tx,
        });

        let negotiator = Negotiator {
            shared: shared.clone(),
            peer,
            feed: self.deps.feed.clone(),
            is_initiator: params.is_initiator,
            local_participant: params.local_participant,
            state: NegotiationState::new(),
            local_candidates: Vec::new(),
        };
        let task = tokio::spawn(negotiator.run(records, remote_candidates, events, shutdown_rx));

        Ok(CallHandle {
            shared,
            state_rx,
            task: Some(task),
        })
    }

    async fn prepare(
        &self,
        params: &CallParams,
        peer: &dyn PeerConnection,
        media: &LocalMedia,
    ) -> Result<(Subscription<CallRecord>, Subscription<IceCandidate>)> {
        for track in media.tracks() {
            peer.add_track(track).await?;
        }

        if params.is_initiator && self.deps.store.read_call(&params.call_id).await?.is_none() {
            debug!(call_id = %params.call_id, "Creating call record");
            self.deps.store.create_call(&params.call_id).await?;
        }

        let records = self.deps.store.subscribe(&params.call_id).await?;
        let candidates = self
            .deps
            .feed
            .subscribe_to_participant(&params.call_id, &params.remote_participant)
            .await?;
        Ok((records, candidates))
    }
}

/// Ресурсы звонка, общие для UI-хэндла и задачи согласования
struct Shared {
    call_id: String,
    store: Arc<dyn SignalingStore>,
    media: LocalMedia,
    /// `None` после отбоя
    peer: Mutex<Option<Arc<dyn PeerConnection>>>,
    state_tx: watch::Sender<CallState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Shared {
    /// Отбой: закрыть соединение, остановить треки, отметить звонок
    /// завершённым. Каждый шаг выполняется, даже если предыдущий упал;
    /// возвращается первая ошибка. Повторный вызов только повторно
    /// останавливает уже остановленные треки.
    async fn teardown(&self) -> Result<()> {
        let peer = self.peer.lock().await.take();
        let Some(peer) = peer else {
            self.media.stop_all();
            return Ok(());
        };
        info!(call_id = %self.call_id, "Hanging up");

        let mut first_err = None;
        if let Err(e) = peer.close().await {
            warn!(call_id = %self.call_id, "Failed to close peer connection: {e}");
            first_err.get_or_insert(e);
        }

        self.media.stop_all();

        if let Err(e) = self.store.mark_ended(&self.call_id).await {
            warn!(call_id = %self.call_id, "Failed to mark call ended: {e}");
            first_err.get_or_insert(e);
        }

        self.state_tx.send_modify(|s| {
            if !s.status.is_terminal() {
                s.status = ConnectionStatus::Closed;
            }
        });
        let _ = self.shutdown_tx.send(true);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Отбой начался (соединение уже забрано) или хэндл брошен
    async fn is_ending(&self) -> bool {
        let shutdown = *self.shutdown_tx.borrow();
        shutdown || self.peer.lock().await.is_none()
    }

    fn report_error(&self, e: CallError) {
        warn!(call_id = %self.call_id, "{e}");
        self.state_tx.send_modify(|s| s.last_error = Some(e));
    }
}

/// Хэндл звонка для UI. Drop равносилен уходу с экрана звонка: задача
/// согласования выполнит отбой и снимет подписки.
pub struct CallHandle {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<CallState>,
    task: Option<JoinHandle<()>>,
}

impl CallHandle {
    pub fn call_id(&self) -> &str {
        &self.shared.call_id
    }

    /// Поток состояния: треки, статус соединения, флаги
    pub fn state(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    pub fn snapshot(&self) -> CallState {
        self.state_rx.borrow().clone()
    }

    /// Переключает микрофон. Возвращает текущее значение `muted`.
    pub fn toggle_mute(&self) -> bool {
        if let Some(enabled) = self.shared.media.toggle(TrackKind::Audio) {
            self.shared.state_tx.send_modify(|s| s.muted = !enabled);
        }
        self.state_rx.borrow().muted
    }

    /// Переключает камеру; в аудиозвонке ничего не делает.
    /// Возвращает текущее значение `video_disabled`.
    pub fn toggle_video(&self) -> bool {
        if let Some(enabled) = self.shared.media.toggle(TrackKind::Video) {
            self.shared.state_tx.send_modify(|s| s.video_disabled = !enabled);
        }
        self.state_rx.borrow().video_disabled
    }

    pub async fn hang_up(&self) -> Result<()> {
        self.shared.teardown().await
    }

    /// Уход с экрана звонка: отбой и ожидание завершения задачи согласования
    pub async fn unmount(mut self) -> Result<()> {
        let result = self.shared.teardown().await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(call_id = %self.shared.call_id, "Negotiation task failed: {e}");
            }
        }
        result
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        let _ = self.shared.shutdown_tx.send(true);
    }
}

/// Задача согласования одной стороны звонка
struct Negotiator {
    shared: Arc<Shared>,
    peer: Arc<dyn PeerConnection>,
    feed: Arc<dyn CandidateFeed>,
    is_initiator: bool,
    local_participant: String,
    state: NegotiationState,
    local_candidates: Vec<IceCandidate>,
}

/// Продолжать ли цикл событий
enum Flow {
    Continue,
    Stop,
}

impl Negotiator {
    async fn run(
        mut self,
        mut records: Subscription<CallRecord>,
        mut remote_candidates: Subscription<IceCandidate>,
        mut events: PeerEvents,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut records_open = true;
        let mut candidates_open = true;
        let mut events_open = true;

        loop {
            let flow = tokio::select! {
                biased;
                _ = shutdown.changed() => Flow::Stop,
                ev = events.recv(), if events_open => match ev {
                    Some(ev) => self.on_peer_event(ev).await,
                    None => {
                        events_open = false;
                        Flow::Continue
                    }
                },
                rec = records.recv(), if records_open => match rec {
                    Some(rec) => self.on_record(rec).await,
                    None => {
                        debug!(call_id = %self.shared.call_id, "Call record stream closed");
                        records_open = false;
                        Flow::Continue
                    }
                },
                cand = remote_candidates.recv(), if candidates_open => match cand {
                    Some(c) => {
                        self.on_remote_candidate(c).await;
                        Flow::Continue
                    }
                    None => {
                        candidates_open = false;
                        Flow::Continue
                    }
                },
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        // Уход с экрана и автоматический отбой идут через тот же teardown
        if let Err(e) = self.shared.teardown().await {
            self.shared.report_error(e);
        }
        analyze_candidates(&self.local_candidates);
        debug!(call_id = %self.shared.call_id, "Negotiation stopped, unsubscribing");
    }

    async fn on_record(&mut self, rec: CallRecord) -> Flow {
        if rec.ended {
            info!(call_id = %self.shared.call_id, "Call ended by the other side");
            return Flow::Stop;
        }

        let step = if self.is_initiator {
            self.initiator_step(&rec).await
        } else {
            self.responder_step(&rec).await
        };

        if self.shared.is_ending().await {
            // После отбоя ошибки шагов вызваны закрытым соединением
            if let Err(e) = step {
                debug!(call_id = %self.shared.call_id, "Ignoring {e} after hang up");
            }
            return Flow::Stop;
        }
        match step {
            Ok(()) => Flow::Continue,
            Err(e) => {
                self.shared.report_error(e);
                Flow::Stop
            }
        }
    }

    async fn initiator_step(&mut self, rec: &CallRecord) -> Result<()> {
        if rec.offer.is_none() && !self.state.local_written() {
            debug!(call_id = %self.shared.call_id, "Creating offer...");
            let offer = self.peer.create_offer().await?;
            if self.shared.is_ending().await {
                return Ok(());
            }
            self.peer.set_local_description(offer.clone()).await?;
            if self.shared.is_ending().await {
                return Ok(());
            }
            self.shared
                .store
                .write_offer(&self.shared.call_id, offer)
                .await
                .map_err(write_failed)?;
            self.state.set_local_written();
            info!(call_id = %self.shared.call_id, "Offer written");
        }

        if let Some(answer) = &rec.answer {
            if self.state.wants_remote(true, SdpType::Answer) {
                if self.shared.is_ending().await {
                    return Ok(());
                }
                self.peer.set_remote_description(answer.clone()).await?;
                let pending = self.state.remote_applied(SdpType::Answer);
                info!(
                    call_id = %self.shared.call_id,
                    "Answer applied, flushing {} pending candidates",
                    pending.len()
                );
                apply_pending_candidates(self.peer.as_ref(), pending).await;
            }
        }
        Ok(())
    }

    async fn responder_step(&mut self, rec: &CallRecord) -> Result<()> {
        let Some(offer) = &rec.offer else {
            return Ok(());
        };
        if !self.state.wants_remote(false, SdpType::Offer) {
            return Ok(());
        }

        if self.shared.is_ending().await {
            return Ok(());
        }
        self.peer.set_remote_description(offer.clone()).await?;
        let pending = self.state.remote_applied(SdpType::Offer);
        info!(
            call_id = %self.shared.call_id,
            "Offer applied, flushing {} pending candidates",
            pending.len()
        );
        apply_pending_candidates(self.peer.as_ref(), pending).await;

        let answer = self.peer.create_answer().await?;
        if self.shared.is_ending().await {
            return Ok(());
        }
        self.peer.set_local_description(answer.clone()).await?;
        if self.shared.is_ending().await {
            return Ok(());
        }
        self.shared
            .store
            .write_answer(&self.shared.call_id, answer)
            .await
            .map_err(write_failed)?;
        self.state.set_local_written();
        info!(call_id = %self.shared.call_id, "Answer written");
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        dump_candidate(&self.shared.call_id, "REMOTE", &candidate);
        if self.shared.is_ending().await {
            return;
        }
        match self.state.remote_candidate(candidate) {
            Some(c) => {
                if let Err(e) = self.peer.add_ice_candidate(c).await {
                    warn!(call_id = %self.shared.call_id, "Failed to add ICE candidate: {e}");
                }
            }
            None => debug!(
                call_id = %self.shared.call_id,
                "Remote description not set yet, queuing candidate ({} pending)",
                self.state.pending_len()
            ),
        }
    }

    async fn on_peer_event(&mut self, ev: PeerEvent) -> Flow {
        match ev {
            PeerEvent::LocalCandidate(c) => {
                dump_candidate(&self.shared.call_id, "LOCAL", &c);
                self.local_candidates.push(c.clone());
                if self.shared.is_ending().await {
                    return Flow::Stop;
                }
                let appended = self
                    .feed
                    .append(&self.shared.call_id, &self.local_participant, c)
                    .await;
                if let Err(e) = appended {
                    // Один потерянный кандидат не рвёт звонок
                    self.shared.report_error(write_failed(e));
                }
                Flow::Continue
            }
            PeerEvent::StateChanged(status) => self.on_status(status),
            PeerEvent::RemoteTrack(track) => {
                info!(call_id = %self.shared.call_id, "Remote {:?} track {}", track.kind, track.id);
                self.shared.state_tx.send_modify(|s| s.remote_media.push(track));
                Flow::Continue
            }
        }
    }

    fn on_status(&mut self, status: ConnectionStatus) -> Flow {
        let current = self.shared.state_tx.borrow().status;
        if current.is_terminal() {
            debug!(call_id = %self.shared.call_id, "Ignoring {status} after {current}");
            return Flow::Stop;
        }

        info!(call_id = %self.shared.call_id, "Peer connection {current} -> {status}");
        self.shared.state_tx.send_modify(|s| s.status = status);

        if status.is_terminal() {
            if let Some(e) = status.as_failure() {
                warn!(call_id = %self.shared.call_id, "{e}, hanging up");
            }
            // Без переподключения: любое терминальное состояние ведёт к отбою
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

fn write_failed(e: CallError) -> CallError {
    match e {
        CallError::SignalingWriteFailed(_) => e,
        other => CallError::SignalingWriteFailed(other.to_string()),
    }
}
