//! Локальные медиа-треки.
//!
//! Захват с устройств остаётся за платформой (`MediaDevices`), она же кодирует
//! кадры и отдаёт их в `LocalTrack::write_sample`. Трек отправляет сэмпл в
//! привязанный к нему выход соединения, если он включён и не остановлен.

use crate::error::{CallError, Result};
use crate::peer::types::{MediaKind, TrackKind};
use crate::utils::random_id;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Выход трека в peer connection
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn send(&self, sample: &Sample) -> Result<()>;
}

#[async_trait]
impl SampleSink for TrackLocalStaticSample {
    async fn send(&self, sample: &Sample) -> Result<()> {
        self.write_sample(sample).await?;
        Ok(())
    }
}

struct TrackShared {
    enabled: AtomicBool,
    stopped: AtomicBool,
    sink: Mutex<Option<Arc<dyn SampleSink>>>,
}

/// Локальный трек. Клоны указывают на одни и те же флаги и выход.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    shared: Arc<TrackShared>,
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl LocalTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self::with_id(random_id(), kind)
    }

    pub fn with_id(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            shared: Arc::new(TrackShared {
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                sink: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Останавливает трек навсегда и отвязывает выход. Повторный вызов ничего не делает.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        *self.sink() = None;
    }

    /// Привязывает трек к выходу соединения. Остановленный трек не привязывается.
    pub fn attach(&self, sink: Arc<dyn SampleSink>) {
        if !self.is_stopped() {
            *self.sink() = Some(sink);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sink().is_some()
    }

    /// Отправляет закодированный сэмпл.
    ///
    /// `Ok(false)`: сэмпл пропущен (трек выключен или ещё не привязан).
    /// Остановленный трек отвечает `CallError::TrackStopped`.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if self.is_stopped() {
            return Err(CallError::TrackStopped(self.id.clone()));
        }
        if !self.is_enabled() {
            return Ok(false);
        }
        let sink = self.sink().clone();
        match sink {
            Some(sink) => {
                sink.send(sample).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn sink(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn SampleSink>>> {
        self.shared.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Набор локальных треков одного звонка
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { tracks }
    }

    /// Пустые треки нужного типа, без реального устройства за ними
    pub fn for_kind(kind: MediaKind) -> Self {
        Self::new(
            kind.track_kinds()
                .iter()
                .map(|k| LocalTrack::new(*k))
                .collect(),
        )
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Переключает `enabled` у всех треков данного типа.
    /// Возвращает новое значение или `None`, если таких треков нет.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let mut tracks = self.tracks.iter().filter(|t| t.kind() == kind).peekable();
        let enabled = !tracks.peek()?.is_enabled();
        for t in tracks {
            t.set_enabled(enabled);
        }
        Some(enabled)
    }

    pub fn stop_all(&self) {
        for t in &self.tracks {
            t.stop();
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(LocalTrack::is_stopped)
    }
}

/// Доступ к камере и микрофону
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Запрашивает медиа. Отказ в разрешении даёт `CallError::MediaAccessDenied`.
    async fn acquire(&self, kind: MediaKind) -> Result<LocalMedia>;
}
