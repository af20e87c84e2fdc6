use super::{
    codecs::{alaw, convert_audio_to_line, convert_line_to_audio},
    level::LineMeter,
    recorder::{RecordChannel, Recorder},
    AudioDevice,
};
use crate::{error::ConvertError, Sample};
use anyhow::Result;
use std::{path::Path, sync::Arc};
use tracing::warn;

/// Per-connection data pump buffers.
///
/// Exists only while a connection is `Active`; dropping it releases the
/// buffers and finalizes a running recording.
pub struct AudioPath {
    device: Option<Arc<dyn AudioDevice>>,
    rx_pcm: Vec<Sample>,
    tx_pcm: Vec<Sample>,
    tx_line: Vec<u8>,
    meter_in: LineMeter,
    meter_out: LineMeter,
    muted: bool,
    recorder: Option<Recorder>,
}

impl AudioPath {
    pub fn new(device: Option<Arc<dyn AudioDevice>>, frame_samples: usize) -> Self {
        Self {
            device,
            rx_pcm: Vec::with_capacity(frame_samples),
            tx_pcm: vec![0; frame_samples],
            tx_line: vec![0; frame_samples],
            meter_in: LineMeter::new(),
            meter_out: LineMeter::new(),
            muted: false,
            recorder: None,
        }
    }

    /// Decodes a line packet and hands the PCM to the audio device.
    pub fn receive(&mut self, line: &[u8]) -> Result<usize, ConvertError> {
        self.rx_pcm.resize(line.len(), 0);
        let n = convert_line_to_audio(line, &mut self.rx_pcm)?;
        let pcm = &self.rx_pcm[..n];
        self.meter_in.update(pcm);
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write(RecordChannel::Remote, pcm) {
                warn!("audio path: recorder write failed: {}", e);
            }
        }
        if let Some(device) = &self.device {
            device.write(pcm);
        }
        Ok(n)
    }

    /// Pulls one frame from the audio device and encodes it for the line.
    ///
    /// Returns `None` when there is no device or it had nothing to deliver.
    pub fn transmit(&mut self) -> Result<Option<&[u8]>, ConvertError> {
        let device = match &self.device {
            Some(device) => device,
            None => return Ok(None),
        };
        let n = device.read(&mut self.tx_pcm).min(self.tx_pcm.len());
        if n == 0 {
            return Ok(None);
        }
        if self.muted {
            self.tx_pcm[..n].fill(0);
        }
        let pcm = &self.tx_pcm[..n];
        let encoded = convert_audio_to_line(pcm, &mut self.tx_line)?;
        if self.muted {
            self.tx_line[..encoded].fill(alaw::line_silence());
        }
        self.meter_out.update(pcm);
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write(RecordChannel::Local, pcm) {
                warn!("audio path: recorder write failed: {}", e);
            }
        }
        Ok(Some(&self.tx_line[..encoded]))
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn level_in(&self) -> f64 {
        self.meter_in.level()
    }

    pub fn level_out(&self) -> f64 {
        self.meter_out.level()
    }

    pub fn start_recording(&mut self, path: &Path) -> Result<()> {
        if self.recorder.is_none() {
            self.recorder = Some(Recorder::create(path)?);
        }
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        if let Some(mut recorder) = self.recorder.take() {
            recorder.close()?;
        }
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MemoryAudio;

    #[test]
    fn test_receive_feeds_device_and_meter() {
        let audio = Arc::new(MemoryAudio::new());
        let mut path = AudioPath::new(Some(audio.clone()), 160);
        // bit reversed 0xAA is full scale positive
        let n = path.receive(&[0x55; 400]).unwrap();
        assert_eq!(n, 400);
        assert_eq!(audio.played().len(), 400);
        assert!(path.level_in() > 0.9);
    }

    #[test]
    fn test_transmit_respects_mute() {
        let audio = Arc::new(MemoryAudio::new());
        audio.push_capture(&[12000; 160]);
        audio.push_capture(&[12000; 160]);
        let mut path = AudioPath::new(Some(audio.clone()), 160);

        let frame = path.transmit().unwrap().unwrap().to_vec();
        assert_eq!(frame.len(), 160);
        assert_ne!(frame[0], alaw::line_silence());

        path.set_muted(true);
        let frame = path.transmit().unwrap().unwrap().to_vec();
        assert!(frame.iter().all(|b| *b == alaw::line_silence()));

        // capture queue drained
        assert!(path.transmit().unwrap().is_none());
    }

    #[test]
    fn test_fax_path_has_no_device() {
        let mut path = AudioPath::new(None, 160);
        assert!(path.transmit().unwrap().is_none());
        assert_eq!(path.receive(&[0xAB; 10]).unwrap(), 10);
        assert!(path.level_in() < 0.01);
    }
}
