use crate::{
    call::{CallManager, CallManagerBuilder, CallManagerOptions, ConnectionHandle, ConnectionState},
    device::{DeviceBackend, DeviceKind, MemoryBackend},
    media::MemoryAudio,
};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};


pub(super) struct TestLine {
    pub manager: Arc<CallManager>,
    pub phone: Arc<MemoryBackend>,
    pub audio: Arc<MemoryAudio>,
}

pub(super) fn phone_backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::with_patterns("phone", DeviceKind::Phone, &["*"]).unwrap())
}

pub(super) fn options() -> CallManagerOptions {
    CallManagerOptions {
        phone_number: "4930111".to_string(),
        fax_number: "4930222".to_string(),
        hangup_timeout: Duration::from_millis(200),
        frame_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

pub(super) fn start(builder: CallManagerBuilder, phone: Arc<MemoryBackend>) -> TestLine {
    let audio = Arc::new(MemoryAudio::new());
    let manager = Arc::new(
        builder
            .with_audio_device(audio.clone())
            .with_backend(phone.clone() as Arc<dyn DeviceBackend>)
            .build()
            .unwrap(),
    );
    let serving = manager.clone();
    tokio::spawn(async move { serving.serve().await });
    TestLine {
        manager,
        phone,
        audio,
    }
}

pub(super) fn start_default() -> TestLine {
    start(
        CallManagerBuilder::new().with_options(options()),
        phone_backend(),
    )
}

pub(super) async fn wait_for_state(handle: &ConnectionHandle, state: ConnectionState) {
    let reached = timeout(Duration::from_secs(2), async {
        while handle.state() != state {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "connection {} stuck in {} waiting for {}",
        handle.id(),
        handle.state(),
        state
    );
}

pub(super) async fn wait_until<F: Fn() -> bool>(check: F) {
    let reached = timeout(Duration::from_secs(2), async {
        while !check() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached in time");
}
