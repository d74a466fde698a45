use crate::error::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Тип SDP в обмене offer/answer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Одна половина обмена описаниями сессии
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }
}

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Запись звонка в общем хранилище сигналинга.
///
/// `offer` и `answer` пишутся ровно по одному разу; после появления `answer`
/// запись больше не перезаписывается.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

impl CallRecord {
    pub fn new() -> Self {
        Self {
            created_at: chrono::Utc::now().timestamp(),
            ..Default::default()
        }
    }
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default)]
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }
}

/// Состояние соединения, как его видит UI
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionStatus {
    /// Ещё не соединились: для звонящего это «гудки»
    pub fn is_ringing(self) -> bool {
        matches!(self, ConnectionStatus::New | ConnectionStatus::Connecting)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed | ConnectionStatus::Closed
        )
    }

    /// Потеря соединения как ошибка; штатное закрытие ошибкой не считается
    pub fn as_failure(self) -> Option<CallError> {
        match self {
            ConnectionStatus::Disconnected | ConnectionStatus::Failed => {
                Some(CallError::ConnectionFailed(format!("peer connection {self}")))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::New => "new",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Failed => "failed",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Какие медиа захватываем для звонка
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Видеозвонок всегда включает и звук
    pub fn track_kinds(self) -> &'static [TrackKind] {
        match self {
            MediaKind::Audio => &[TrackKind::Audio],
            MediaKind::Video => &[TrackKind::Audio, TrackKind::Video],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Трек, пришедший от удалённой стороны
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_description_uses_type_field() {
        let json = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json, serde_json::json!({"sdp": "v=0", "type": "offer"}));
    }

    #[test]
    fn empty_record_deserializes() {
        let rec: CallRecord = serde_json::from_str("{}").unwrap();
        assert!(rec.offer.is_none());
        assert!(rec.answer.is_none());
        assert!(!rec.ended);
    }

    #[test]
    fn ringing_only_before_connected() {
        assert!(ConnectionStatus::New.is_ringing());
        assert!(ConnectionStatus::Connecting.is_ringing());
        assert!(!ConnectionStatus::Connected.is_ringing());
        assert!(!ConnectionStatus::Failed.is_ringing());
        assert!(ConnectionStatus::Disconnected.is_terminal());
        assert!(!ConnectionStatus::Connected.is_terminal());
    }

    #[test]
    fn only_lost_connection_is_failure() {
        assert!(matches!(
            ConnectionStatus::Failed.as_failure(),
            Some(CallError::ConnectionFailed(_))
        ));
        assert!(ConnectionStatus::Disconnected.as_failure().is_some());
        assert!(ConnectionStatus::Closed.as_failure().is_none());
        assert!(ConnectionStatus::Connected.as_failure().is_none());
    }
}
