pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::EngineConfig;
pub use error::{CallError, Result};
pub use peer::{
    CallRecord, ConnectionStatus, IceCandidate, LocalMedia, LocalTrack, MediaDevices, MediaKind,
    PathDiscovery, PeerConnection, PeerEvent, PeerFactory, RemoteTrack, SampleSink, SdpType,
    ServerConfig, SessionDescription, TrackKind,
};
pub use session::{CallEngine, CallHandle, CallParams, CallState, Collaborators};
pub use signaling::{CandidateFeed, MemorySignalingStore, SignalingStore, Subscription};
