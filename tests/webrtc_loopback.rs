//! Два настоящих peer connection из крейта `webrtc` в одном процессе

mod common;

use bytes::Bytes;
use common::*;
use ssc_call::peer::StaticPathDiscovery;
use ssc_call::{
    CallEngine, CallError, ConnectionStatus, EngineConfig, MediaKind, MemorySignalingStore,
    SignalingStore, TrackKind,
};
use std::sync::Arc;
use std::time::Duration;
use webrtc::media::Sample;

const CONNECT_LIMIT: Duration = Duration::from_secs(20);

/// Без STUN/TURN: только host-кандидаты, включая loopback
fn loopback_engine(store: &Arc<MemorySignalingStore>, media: Arc<FakeMedia>) -> CallEngine {
    let config = EngineConfig {
        default_ice_servers: Vec::new(),
        include_loopback_candidates: true,
        ..Default::default()
    };
    CallEngine::with_webrtc(
        config,
        store.clone(),
        store.clone(),
        media,
        Arc::new(StaticPathDiscovery::default()),
    )
}

fn opus_frame() -> Sample {
    Sample {
        data: Bytes::from_static(&[0xf8, 0xff, 0xfe]),
        duration: Duration::from_millis(20),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn webrtc_peers_connect_over_host_candidates() {
    ssc_call::logger::init();
    let store = Arc::new(MemorySignalingStore::new());
    let alice_media = Arc::new(FakeMedia::default());
    let bob_media = Arc::new(FakeMedia::default());
    let alice = loopback_engine(&store, alice_media.clone());
    let bob = loopback_engine(&store, bob_media.clone());

    let caller = alice
        .start(params("w1", true, MediaKind::Audio))
        .await
        .unwrap();
    let callee = bob
        .start(params("w1", false, MediaKind::Audio))
        .await
        .unwrap();

    let connected = |s: &ssc_call::CallState| s.status == ConnectionStatus::Connected;
    wait_state_within(&mut caller.state(), "caller connected", CONNECT_LIMIT, connected).await;
    wait_state_within(&mut callee.state(), "callee connected", CONNECT_LIMIT, connected).await;

    let rec = store.read_call("w1").await.unwrap().unwrap();
    assert!(rec.offer.unwrap().sdp.contains("m=audio"));
    assert!(rec.answer.is_some());
    assert!(!store.candidates("w1", "alice").is_empty());
    assert!(!store.candidates("w1", "bob").is_empty());

    // Сэмплы идут в соединение, пока трек включён
    let track = alice_media.acquired()[0].tracks()[0].clone();
    assert_eq!(track.kind(), TrackKind::Audio);
    assert!(track.is_attached());
    assert!(track.write_sample(&opus_frame()).await.unwrap());

    assert!(caller.toggle_mute());
    assert!(!track.write_sample(&opus_frame()).await.unwrap());
    assert!(!caller.toggle_mute());
    assert!(track.write_sample(&opus_frame()).await.unwrap());

    caller.hang_up().await.unwrap();
    assert!(matches!(
        track.write_sample(&opus_frame()).await,
        Err(CallError::TrackStopped(_))
    ));

    wait_state_within(&mut callee.state(), "callee ended", CONNECT_LIMIT, |s| {
        s.status.is_terminal()
    })
    .await;
    let bob_media = bob_media.acquired().remove(0);
    eventually("callee tracks stopped", || bob_media.all_stopped()).await;
    assert!(caller.snapshot().last_error.is_none());
}
