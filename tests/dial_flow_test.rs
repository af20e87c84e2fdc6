use capiline::{
    call::{CallManagerBuilder, CallManagerOptions, ConnectionState},
    config::Config,
    device::{DeviceBackend, DeviceKind, MemoryBackend},
    error::DialError,
    event::CallEvent,
    media::codecs::{bit_inverse, build_tables, convert_audio_to_line, convert_line_to_audio},
};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};

async fn wait_state(handle: &capiline::call::ConnectionHandle, state: ConnectionState) {
    timeout(Duration::from_secs(2), async {
        while handle.state() != state {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("stuck in {} waiting for {}", handle.state(), state));
}

#[tokio::test]
async fn test_dial_from_config_backends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capiline.toml");
    std::fs::write(
        &path,
        r#"
hangup_timeout_ms = 500

[line]
phone_number = "4930111"

[[backends]]
type = "memory"
name = "local"
kind = "phone"
numbers = ["030*"]

[[backends]]
type = "memory"
name = "city"
kind = "phone"
numbers = ["030123*"]
auto_answer = true
"#,
    )
    .unwrap();
    let config = Config::load(path.to_str().unwrap()).unwrap();

    let mut builder = CallManagerBuilder::new().with_options(config.manager_options());
    for backend in &config.backends {
        builder = builder.with_backend(backend.build().unwrap());
    }
    let manager = Arc::new(builder.build().unwrap());
    let serving = manager.clone();
    tokio::spawn(async move { serving.serve().await });

    // the newer, more specific backend answers right away
    let handle = manager
        .dial(DeviceKind::Phone, "030123456", "", false)
        .await
        .unwrap();
    assert_eq!(handle.backend_name(), "city");
    wait_state(&handle, ConnectionState::Active).await;

    let other = manager
        .dial(DeviceKind::Phone, "030999", "", false)
        .await
        .unwrap();
    assert_eq!(other.backend_name(), "local");
    assert_eq!(other.state(), ConnectionState::Dialing);
    assert_eq!(manager.connections().await.len(), 2);

    manager.hangup(&handle).await;
    manager.hangup(&other).await;
    wait_state(&handle, ConnectionState::Disconnected).await;
    wait_state(&other, ConnectionState::Disconnected).await;

    assert!(matches!(
        manager.dial(DeviceKind::Fax, "030123456", "", false).await,
        Err(DialError::NoCapableDevice)
    ));
}

#[tokio::test]
async fn test_incoming_call_events() {
    let phone = Arc::new(MemoryBackend::with_patterns("phone", DeviceKind::Phone, &["*"]).unwrap());
    let manager = Arc::new(
        CallManagerBuilder::new()
            .with_options(CallManagerOptions {
                phone_number: "4930111".to_string(),
                ..Default::default()
            })
            .with_backend(phone.clone() as Arc<dyn DeviceBackend>)
            .build()
            .unwrap(),
    );
    let mut events = manager.subscribe();
    let serving = manager.clone();
    tokio::spawn(async move { serving.serve().await });

    let token = phone.ring("0301234", "4930111").unwrap();
    let mut states = Vec::new();
    let mut handle = None;
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await.unwrap() {
                CallEvent::Incoming { id, .. } => {
                    let h = manager.get(&id).await.unwrap();
                    manager.pickup(&h).await.unwrap();
                    handle = Some(h);
                }
                CallEvent::StateChanged { state, .. } => {
                    states.push(state);
                    if state == ConnectionState::Active {
                        phone.remote_hangup(token);
                    }
                    if state.is_terminal() {
                        break;
                    }
                }
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        states,
        vec![
            ConnectionState::Ringing,
            ConnectionState::Connected,
            ConnectionState::Active,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        ]
    );
    let status = handle.unwrap().status();
    assert_eq!(status.remote_number, "0301234");
    assert!(status.ended_at.is_some());
}

#[test]
fn test_line_conversion_round_trip() {
    let tables = build_tables();
    assert_eq!(tables.encode_table().len(), 65536);
    assert_eq!(tables.decode_table().len(), 256);

    let pcm: Vec<i16> = (0..160).map(|i| ((i * 409) % 32768) as i16 - 16384).collect();
    let mut line = vec![0u8; pcm.len()];
    assert_eq!(convert_audio_to_line(&pcm, &mut line).unwrap(), pcm.len());
    assert_eq!(line[0], bit_inverse(tables.encode(pcm[0])));

    let mut decoded = vec![0i16; line.len()];
    convert_line_to_audio(&line, &mut decoded).unwrap();
    for (a, b) in pcm.iter().zip(decoded.iter()) {
        assert!((*a as i32 - *b as i32).abs() <= 1024, "{} vs {}", a, b);
    }
}
