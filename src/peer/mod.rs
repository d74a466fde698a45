pub mod connection;
pub mod ice;
pub mod media;
pub mod state;
pub mod types;

pub use connection::{PeerConnection, PeerEvent, PeerEvents, PeerFactory, WebRtcPeerFactory};
pub use ice::{HttpPathDiscovery, PathDiscovery, StaticPathDiscovery};
pub use media::{LocalMedia, LocalTrack, MediaDevices, SampleSink};
pub use state::{NegotiationState, RemoteSlot};
pub use types::{
    CallRecord, ConnectionStatus, IceCandidate, MediaKind, RemoteTrack, SdpType, ServerConfig,
    SessionDescription, TrackKind,
};
