// Конфигурация движка звонка.
// Передаётся явно в CallEngine, глобального состояния нет.

use crate::error::{CallError, Result};
use crate::peer::types::ServerConfig;
use serde::Deserialize;
use std::time::Duration;

// Логирование по умолчанию подробнее в режиме отладки
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "ssc_call=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "ssc_call=info,webrtc=error";

/// Публичные STUN серверы, если сервис ICE серверов недоступен
pub const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Запасной набор серверов при ошибке получения списка
    pub default_ice_servers: Vec<ServerConfig>,
    /// Сколько ждём сервис ICE серверов
    #[serde(with = "millis")]
    pub path_discovery_timeout: Duration,
    pub ice_candidate_pool_size: u8,
    /// Кандидаты на loopback-интерфейсе: звонки внутри одной машины
    pub include_loopback_candidates: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_ice_servers: DEFAULT_STUN_URLS
                .iter()
                .enumerate()
                .map(|(i, url)| ServerConfig::stun(&format!("default-stun-{i}"), url))
                .collect(),
            path_discovery_timeout: Duration::from_secs(5),
            ice_candidate_pool_size: 10,
            include_loopback_candidates: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: EngineConfig =
            serde_json::from_str(s).map_err(|e| CallError::InvalidConfig(e.to_string()))?;
        for server in &cfg.default_ice_servers {
            validate_server(server)?;
        }
        Ok(cfg)
    }
}

/// Валидация сервера: пустой url запрещён, TURN требует логин и пароль
pub fn validate_server(server: &ServerConfig) -> Result<()> {
    if server.url.is_empty() {
        return Err(CallError::InvalidConfig(format!(
            "server {:?}: URL cannot be empty",
            server.id
        )));
    }

    if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
        return Err(CallError::InvalidConfig(format!(
            "server {:?}: TURN servers require username and credential",
            server.id
        )));
    }
    Ok(())
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
