use crate::media::codecs::LINE_SAMPLE_RATE;
use crate::Sample;
use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::{
    collections::VecDeque,
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};
use tracing::info;

/// How far one channel may run ahead before the other is padded with
/// silence, in samples (100 ms).
const MAX_CHANNEL_LAG: usize = (LINE_SAMPLE_RATE / 10) as usize;

/// Which side of the call a recorded buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordChannel {
    Local,
    Remote,
}

/// Stereo call recorder, local audio on the left and remote on the right.
///
/// Both directions arrive independently, so each channel is queued until the
/// other side has delivered the matching samples. A channel that falls more
/// than [`MAX_CHANNEL_LAG`] samples behind (hold, no capture device) is
/// padded with silence, as is whatever is left when the recorder is closed.
pub struct Recorder {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    local: VecDeque<Sample>,
    remote: VecDeque<Sample>,
    frames_written: u64,
}

impl Recorder {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let spec = WavSpec {
            channels: 2,
            sample_rate: LINE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        info!("recorder: started {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            local: VecDeque::new(),
            remote: VecDeque::new(),
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write(&mut self, channel: RecordChannel, samples: &[Sample]) -> Result<()> {
        match channel {
            RecordChannel::Local => self.local.extend(samples),
            RecordChannel::Remote => self.remote.extend(samples),
        }
        self.flush_pairs(false)
    }

    fn flush_pairs(&mut self, pad: bool) -> Result<()> {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Ok(()),
        };
        let ahead = self.local.len().max(self.remote.len());
        let frames = if pad {
            ahead
        } else {
            self.local
                .len()
                .min(self.remote.len())
                .max(ahead.saturating_sub(MAX_CHANNEL_LAG))
        };
        for _ in 0..frames {
            writer.write_sample(self.local.pop_front().unwrap_or(0))?;
            writer.write_sample(self.remote.pop_front().unwrap_or(0))?;
        }
        self.frames_written += frames as u64;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.flush_pairs(true)?;
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(
                "recorder: closed {} frames: {}",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.close().ok();
    }
}
