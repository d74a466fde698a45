use thiserror::Error;

/// Ошибки движка звонка
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Платформа отказала в доступе к камере/микрофону. Не повторяется автоматически.
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    /// Запись offer/answer/кандидата в хранилище не удалась
    #[error("signaling write failed: {0}")]
    SignalingWriteFailed(String),

    /// Соединение перешло в терминальное состояние
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Список STUN/TURN серверов недоступен (не фатально)
    #[error("path discovery unavailable: {0}")]
    PathDiscoveryUnavailable(String),

    /// Трек остановлен, сэмплы больше не принимаются
    #[error("track {0} is stopped")]
    TrackStopped(String),

    #[error("call {0} not found")]
    CallNotFound(String),

    /// Ошибка нижележащего peer connection
    #[error("peer connection error: {0}")]
    Peer(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<webrtc::Error> for CallError {
    fn from(e: webrtc::Error) -> Self {
        CallError::Peer(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
