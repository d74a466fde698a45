//! Подделки платформенных примитивов для интеграционных тестов
#![allow(dead_code)]

use async_trait::async_trait;
use ssc_call::peer::{PeerEvents, StaticPathDiscovery};
use ssc_call::{
    CallEngine, CallError, CallParams, CallRecord, CallState, Collaborators, ConnectionStatus,
    EngineConfig, IceCandidate, LocalMedia, MediaDevices, MediaKind, MemorySignalingStore,
    PeerConnection, PeerEvent, PeerFactory, Result, ServerConfig, SessionDescription,
    SignalingStore,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Медиа-устройства: либо выдают треки, либо отказывают
#[derive(Default)]
pub struct FakeMedia {
    deny: AtomicBool,
    acquired: Mutex<Vec<LocalMedia>>,
}

impl FakeMedia {
    pub fn denying() -> Self {
        let m = Self::default();
        m.deny.store(true, Ordering::SeqCst);
        m
    }

    pub fn acquired(&self) -> Vec<LocalMedia> {
        self.acquired.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire(&self, kind: MediaKind) -> Result<LocalMedia> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::MediaAccessDenied("permission dismissed".into()));
        }
        let media = LocalMedia::for_kind(kind);
        self.acquired.lock().unwrap().push(media.clone());
        Ok(media)
    }
}

/// Peer connection без сети. Как только есть и local, и remote description,
/// сообщает connecting → connected (если `auto_connect`).
pub struct FakePeer {
    label: String,
    auto_connect: bool,
    local_candidates: usize,
    offer_delay: Option<Duration>,
    events: mpsc::UnboundedSender<PeerEvent>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    applied: Mutex<Vec<IceCandidate>>,
    early_candidates: AtomicUsize,
    remote_sets: AtomicUsize,
    local_sets: AtomicUsize,
    tracks: AtomicUsize,
    closes: AtomicUsize,
}

impl FakePeer {
    pub fn emit(&self, ev: PeerEvent) {
        let _ = self.events.send(ev);
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    /// Кандидаты, пришедшие до remote description
    pub fn early_candidates(&self) -> usize {
        self.early_candidates.load(Ordering::SeqCst)
    }

    pub fn remote_sets(&self) -> usize {
        self.remote_sets.load(Ordering::SeqCst)
    }

    pub fn local_sets(&self) -> usize {
        self.local_sets.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn maybe_connect(&self) {
        let ready = self.local.lock().unwrap().is_some() && self.remote.lock().unwrap().is_some();
        if ready && self.auto_connect {
            self.emit(PeerEvent::StateChanged(ConnectionStatus::Connecting));
            self.emit(PeerEvent::StateChanged(ConnectionStatus::Connected));
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&self, _track: &ssc_call::LocalTrack) -> Result<()> {
        self.tracks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        if let Some(delay) = self.offer_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(SessionDescription::offer(format!("v=0 offer from {}", self.label)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.remote.lock().unwrap().is_none() {
            return Err(CallError::Peer("answer without remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("v=0 answer from {}", self.label)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        *self.local.lock().unwrap() = Some(desc);
        self.local_sets.fetch_add(1, Ordering::SeqCst);
        for i in 0..self.local_candidates {
            self.emit(PeerEvent::LocalCandidate(IceCandidate::new(format!(
                "candidate:{i} 1 udp 2122260223 10.0.0.{i} 5000{i} typ host ({})",
                self.label
            ))));
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        *self.remote.lock().unwrap() = Some(desc);
        self.remote_sets.fetch_add(1, Ordering::SeqCst);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.remote.lock().unwrap().is_none() {
            self.early_candidates.fetch_add(1, Ordering::SeqCst);
            return Err(CallError::Peer("remote description not set".into()));
        }
        self.applied.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.emit(PeerEvent::StateChanged(ConnectionStatus::Closed));
        Ok(())
    }
}

pub struct FakePeerFactory {
    label: String,
    auto_connect: bool,
    local_candidates: usize,
    offer_delay: Option<Duration>,
    created: Mutex<Vec<Arc<FakePeer>>>,
    servers: Mutex<Vec<Vec<ServerConfig>>>,
}

impl FakePeerFactory {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.into(),
            auto_connect: true,
            local_candidates: 2,
            offer_delay: None,
            created: Mutex::new(Vec::new()),
            servers: Mutex::new(Vec::new()),
        }
    }

    pub fn manual(label: &str) -> Self {
        Self {
            auto_connect: false,
            ..Self::new(label)
        }
    }

    /// create_offer отвечает с задержкой
    pub fn with_offer_delay(self, delay: Duration) -> Self {
        Self {
            offer_delay: Some(delay),
            ..self
        }
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn peer(&self) -> Arc<FakePeer> {
        self.created.lock().unwrap()[0].clone()
    }

    pub fn servers(&self) -> Vec<Vec<ServerConfig>> {
        self.servers.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        ice_servers: &[ServerConfig],
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(FakePeer {
            label: self.label.clone(),
            auto_connect: self.auto_connect,
            local_candidates: self.local_candidates,
            offer_delay: self.offer_delay,
            events: tx,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            early_candidates: AtomicUsize::new(0),
            remote_sets: AtomicUsize::new(0),
            local_sets: AtomicUsize::new(0),
            tracks: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(peer.clone());
        self.servers.lock().unwrap().push(ice_servers.to_vec());
        let peer: Arc<dyn PeerConnection> = peer;
        Ok((peer, rx))
    }
}

/// Одна сторона звонка со всеми подделками
pub struct Side {
    pub engine: CallEngine,
    pub media: Arc<FakeMedia>,
    pub peers: Arc<FakePeerFactory>,
}

pub fn side(store: Arc<dyn SignalingStore>, feed: Arc<MemorySignalingStore>, label: &str) -> Side {
    side_with(store, feed, Arc::new(FakeMedia::default()), Arc::new(FakePeerFactory::new(label)))
}

pub fn side_with(
    store: Arc<dyn SignalingStore>,
    feed: Arc<MemorySignalingStore>,
    media: Arc<FakeMedia>,
    peers: Arc<FakePeerFactory>,
) -> Side {
    ssc_call::logger::init();
    let engine = CallEngine::new(
        EngineConfig::default(),
        Collaborators {
            store,
            feed,
            media: media.clone(),
            peers: peers.clone(),
            path_discovery: Arc::new(StaticPathDiscovery::default()),
        },
    );
    Side {
        engine,
        media,
        peers,
    }
}

pub fn params(call_id: &str, initiator: bool, kind: MediaKind) -> CallParams {
    let (me, other) = if initiator {
        ("alice", "bob")
    } else {
        ("bob", "alice")
    };
    CallParams {
        call_id: call_id.into(),
        is_initiator: initiator,
        media_kind: kind,
        local_participant: me.into(),
        remote_participant: other.into(),
    }
}

/// Ждёт, пока состояние звонка не удовлетворит условию
pub async fn wait_state(
    rx: &mut watch::Receiver<CallState>,
    what: &str,
    pred: impl Fn(&CallState) -> bool,
) -> CallState {
    wait_state_within(rx, what, Duration::from_secs(5), pred).await
}

pub async fn wait_state_within(
    rx: &mut watch::Receiver<CallState>,
    what: &str,
    limit: Duration,
    pred: impl Fn(&CallState) -> bool,
) -> CallState {
    let res = tokio::time::timeout(limit, rx.wait_for(|s| pred(s))).await;
    match res {
        Ok(Ok(state)) => state.clone(),
        _ => panic!("timed out waiting for {what}"),
    }
}

pub async fn wait_status(rx: &mut watch::Receiver<CallState>, status: ConnectionStatus) -> CallState {
    wait_state(rx, &status.to_string(), |s| s.status == status).await
}

/// Ждёт, пока запись звонка не удовлетворит условию
pub async fn wait_record(
    store: &dyn SignalingStore,
    call_id: &str,
    pred: impl Fn(&CallRecord) -> bool,
) -> CallRecord {
    for _ in 0..500 {
        if let Some(rec) = store.read_call(call_id).await.unwrap() {
            if pred(&rec) {
                return rec;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for call record {call_id}");
}

pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Даёт фоновым задачам обработать всё, что уже в очередях
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
