use crate::Sample;
use std::{collections::VecDeque, sync::Mutex};

pub mod codecs;
pub mod level;
pub mod path;
pub mod recorder;

pub use level::{line_level, LineMeter};
pub use path::AudioPath;

/// Local sound card as seen by a voice connection.
///
/// `write` receives decoded remote audio, `read` fills `buf` with captured
/// microphone samples and returns how many were available.
pub trait AudioDevice: Send + Sync {
    fn write(&self, samples: &[Sample]);

    fn read(&self, buf: &mut [Sample]) -> usize;

    fn name(&self) -> &str {
        "unknown"
    }
}

/// Discards playback and captures silence.
#[derive(Default)]
pub struct NullAudio;

impl AudioDevice for NullAudio {
    fn write(&self, _samples: &[Sample]) {}

    fn read(&self, buf: &mut [Sample]) -> usize {
        buf.fill(0);
        buf.len()
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// In-memory device: keeps everything played and serves queued captures.
#[derive(Default)]
pub struct MemoryAudio {
    played: Mutex<Vec<Sample>>,
    capture: Mutex<VecDeque<Sample>>,
}

impl MemoryAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_capture(&self, samples: &[Sample]) {
        if let Ok(mut capture) = self.capture.lock() {
            capture.extend(samples);
        }
    }

    pub fn played(&self) -> Vec<Sample> {
        self.played
            .lock()
            .map(|played| played.clone())
            .unwrap_or_default()
    }
}

impl AudioDevice for MemoryAudio {
    fn write(&self, samples: &[Sample]) {
        if let Ok(mut played) = self.played.lock() {
            played.extend_from_slice(samples);
        }
    }

    fn read(&self, buf: &mut [Sample]) -> usize {
        let mut capture = match self.capture.lock() {
            Ok(capture) => capture,
            Err(_) => return 0,
        };
        let n = buf.len().min(capture.len());
        for (slot, sample) in buf.iter_mut().zip(capture.drain(..n)) {
            *slot = sample;
        }
        n
    }

    fn name(&self) -> &str {
        "memory"
    }
}
