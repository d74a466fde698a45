use crate::config::{validate_server, EngineConfig};
use crate::error::{CallError, Result};
use crate::peer::connection::PeerConnection;
use crate::peer::types::{IceCandidate, ServerConfig};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Сервис, выдающий список STUN/TURN серверов
#[async_trait]
pub trait PathDiscovery: Send + Sync {
    async fn fetch_servers(&self) -> Result<Vec<ServerConfig>>;
}

/// Фиксированный список, например из настроек пользователя
#[derive(Debug, Clone, Default)]
pub struct StaticPathDiscovery {
    servers: Vec<ServerConfig>,
}

impl StaticPathDiscovery {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl PathDiscovery for StaticPathDiscovery {
    async fn fetch_servers(&self) -> Result<Vec<ServerConfig>> {
        Ok(self.servers.clone())
    }
}

/// Получает список серверов по HTTP (JSON).
///
/// Принимает либо список `ServerConfig`, либо ответ в формате браузерного
/// `RTCConfiguration`: `{"iceServers": [{"urls": ..., "username": ..., "credential": ...}]}`.
#[derive(Debug, Clone)]
pub struct HttpPathDiscovery {
    client: reqwest::Client,
    url: String,
}

impl HttpPathDiscovery {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CallError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IceServersResponse {
    Plain(Vec<ServerConfig>),
    Browser {
        #[serde(rename = "iceServers")]
        ice_servers: Vec<BrowserIceServer>,
    },
}

#[derive(Deserialize)]
struct BrowserIceServer {
    urls: OneOrMany,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl IceServersResponse {
    fn into_servers(self) -> Vec<ServerConfig> {
        match self {
            IceServersResponse::Plain(servers) => servers,
            IceServersResponse::Browser { ice_servers } => ice_servers
                .into_iter()
                .flat_map(|server| {
                    let BrowserIceServer {
                        urls,
                        username,
                        credential,
                    } = server;
                    let urls = match urls {
                        OneOrMany::One(u) => vec![u],
                        OneOrMany::Many(u) => u,
                    };
                    urls.into_iter()
                        .map(move |url| (url, username.clone(), credential.clone()))
                })
                // Сквозная нумерация по всем url, id не повторяются
                .enumerate()
                .map(|(i, (url, username, credential))| {
                    let kind = if url.starts_with("turn") { "turn" } else { "stun" };
                    ServerConfig {
                        id: format!("{kind}-{i}"),
                        r#type: kind.into(),
                        url,
                        username,
                        credential,
                    }
                })
                .collect(),
        }
    }
}

#[async_trait]
impl PathDiscovery for HttpPathDiscovery {
    async fn fetch_servers(&self) -> Result<Vec<ServerConfig>> {
        let unavailable = |e: reqwest::Error| CallError::PathDiscoveryUnavailable(e.to_string());
        let response: IceServersResponse = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;
        Ok(response.into_servers())
    }
}

/// Получает серверы один раз перед созданием соединения.
/// Ошибка или таймаут не фатальны: берём набор по умолчанию из конфигурации.
/// Пустой список допустим, тогда остаются только прямые пути.
pub async fn resolve_ice_servers(
    config: &EngineConfig,
    discovery: &dyn PathDiscovery,
) -> Vec<ServerConfig> {
    let fetched = match timeout(config.path_discovery_timeout, discovery.fetch_servers()).await {
        Ok(result) => result,
        Err(_) => Err(CallError::PathDiscoveryUnavailable(format!(
            "no response within {:?}",
            config.path_discovery_timeout
        ))),
    };

    let servers = match fetched {
        Ok(servers) => servers,
        Err(e) => {
            warn!("{e}; falling back to {} default servers", config.default_ice_servers.len());
            config.default_ice_servers.clone()
        }
    };

    let servers: Vec<ServerConfig> = servers
        .into_iter()
        .filter(|s| match validate_server(s) {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping ICE server: {e}");
                false
            }
        })
        .collect();

    if servers.is_empty() {
        info!("No ICE servers, only direct paths will be tried");
    } else {
        debug!("Using {} ICE servers", servers.len());
    }
    servers
}

/// Применяет все отложенные кандидаты после установки remote description
pub async fn apply_pending_candidates(pc: &dyn PeerConnection, candidates: Vec<IceCandidate>) {
    for candidate in candidates {
        debug!("Applying pending candidate: {:?}", candidate);
        if let Err(e) = pc.add_ice_candidate(candidate).await {
            warn!("Failed to apply pending candidate: {e}");
        }
    }
}

pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    if relay_count == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
}
