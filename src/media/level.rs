use crate::Sample;

/// Buffer length (in samples) at which a new reading fully replaces the
/// previous meter state.
const LEVEL_SMOOTHING_WINDOW: f64 = 400.0;

/// Normalised peak amplitude of a sample window.
///
/// Returns 0.0 for silence and 1.0 for a full scale buffer. Only used for
/// metering, the audio path never depends on it.
pub fn line_level(samples: &[Sample]) -> f64 {
    let peak = samples
        .iter()
        .map(|s| (*s as i32).unsigned_abs())
        .max()
        .unwrap_or(0);
    (peak as f64 / i16::MAX as f64).min(1.0)
}

/// Smoothed per-direction level meter.
///
/// Short buffers move the meter only partially, so the UI sees a stable
/// reading regardless of the packet size the driver delivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineMeter {
    state: f64,
}

impl LineMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, samples: &[Sample]) -> f64 {
        if samples.is_empty() {
            return self.state;
        }
        let ratio = (samples.len() as f64 / LEVEL_SMOOTHING_WINDOW).min(1.0);
        self.state = self.state * (1.0 - ratio) + line_level(samples) * ratio;
        self.state
    }

    pub fn level(&self) -> f64 {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}
