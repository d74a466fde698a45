use crate::config::EngineConfig;
use crate::error::Result;
use crate::peer::media::{LocalTrack, SampleSink};
use crate::peer::types::{
    ConnectionStatus, IceCandidate, RemoteTrack, SdpType, ServerConfig, SessionDescription,
    TrackKind,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// События от peer connection, доставляются движку по каналу
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Найден локальный сетевой путь
    LocalCandidate(IceCandidate),
    StateChanged(ConnectionStatus),
    RemoteTrack(RemoteTrack),
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// Нижележащее соединение. Снаружи движка не видно.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Создаёт соединения с заданным набором ICE серверов
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[ServerConfig],
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents)>;
}

/// Фабрика поверх крейта `webrtc`
#[derive(Debug, Clone)]
pub struct WebRtcPeerFactory {
    ice_candidate_pool_size: u8,
    include_loopback_candidates: bool,
}

impl WebRtcPeerFactory {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ice_candidate_pool_size: config.ice_candidate_pool_size,
            include_loopback_candidates: config.include_loopback_candidates,
        }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        ice_servers: &[ServerConfig],
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents)> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(self.include_loopback_candidates);
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();

        let config = rtc_config(ice_servers, self.ice_candidate_pool_size);
        let pc = Arc::new(api.new_peer_connection(config).await?);
        let (tx, rx) = mpsc::unbounded_channel();

        // Обработчик для сбора локальных кандидатов
        let cand_tx = tx.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let _ = cand_tx.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                },
                // cand == None означает конец сбора
                None => debug!("ICE candidate gathering completed (null candidate received)"),
            }
            Box::pin(async {})
        }));

        let state_tx = tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("Peer connection state changed to: {:?}", st);
            if let Some(status) = map_state(st) {
                let _ = state_tx.send(PeerEvent::StateChanged(status));
            }
            Box::pin(async {})
        }));

        let track_tx = tx;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            let _ = track_tx.send(PeerEvent::RemoteTrack(RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind,
            }));
            Box::pin(async {})
        }));

        let peer: Arc<dyn PeerConnection> = Arc::new(WebRtcPeer { pc });
        Ok((peer, rx))
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            "ssc-call".to_owned(),
        ));
        self.pc
            .add_track(local.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        // Сэмплы трека теперь уходят в это соединение
        let sink: Arc<dyn SampleSink> = local;
        track.attach(sink);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn map_state(st: RTCPeerConnectionState) -> Option<ConnectionStatus> {
    match st {
        RTCPeerConnectionState::New => Some(ConnectionStatus::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionStatus::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionStatus::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionStatus::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionStatus::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionStatus::Closed),
        _ => None,
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig], pool_size: u8) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Пустой список: только прямые пути
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}
