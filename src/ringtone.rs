use crate::device::DeviceKind;
use tracing::debug;

/// Ringtone output. Fire-and-forget: the call core never waits on it and
/// never inspects a result.
pub trait Ringer: Send + Sync {
    fn play(&self, kind: DeviceKind);
    fn stop(&self);
}

/// Ringer that only logs, used when no sound output is wired up.
#[derive(Default)]
pub struct LogRinger;

impl Ringer for LogRinger {
    fn play(&self, kind: DeviceKind) {
        debug!("ringtone: play {}", kind);
    }

    fn stop(&self) {
        debug!("ringtone: stop");
    }
}
