use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// T.30 phase the fax modem reported last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaxPhase {
    #[default]
    Idle,
    Connect,
    /// pre-message procedure, capabilities exchanged
    PhaseB,
    /// post-message procedure, page confirmed
    PhaseD,
    /// call release
    PhaseE,
}

/// Progress report emitted by a fax backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaxProgress {
    pub phase: Option<FaxPhase>,
    pub page_current: Option<u32>,
    pub page_total: Option<u32>,
    pub bitrate: Option<u32>,
    pub remote_ident: Option<String>,
    pub bytes_sent: Option<u64>,
    pub bytes_received: Option<u64>,
    pub bytes_total: Option<u64>,
    pub error_code: Option<i32>,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaxStatus {
    pub phase: FaxPhase,
    pub sending: bool,
    pub progress: u8,
    pub page_current: u32,
    pub page_total: u32,
    pub error_code: i32,
    pub file: Option<PathBuf>,
    pub remote_ident: Option<String>,
    pub bitrate: u32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_total: u64,
    pub done: bool,
}

impl FaxStatus {
    pub fn new(sending: bool, file: Option<PathBuf>) -> Self {
        Self {
            sending,
            file,
            ..Default::default()
        }
    }

    pub fn apply(&mut self, progress: &FaxProgress) {
        if let Some(phase) = progress.phase {
            self.phase = phase;
        }
        if let Some(page) = progress.page_current {
            self.page_current = page;
        }
        if let Some(total) = progress.page_total {
            self.page_total = total;
        }
        if let Some(bitrate) = progress.bitrate {
            self.bitrate = bitrate;
        }
        if let Some(ident) = &progress.remote_ident {
            self.remote_ident = Some(ident.clone());
        }
        if let Some(sent) = progress.bytes_sent {
            self.bytes_sent = sent;
        }
        if let Some(received) = progress.bytes_received {
            self.bytes_received = received;
        }
        if let Some(total) = progress.bytes_total {
            self.bytes_total = total;
        }
        if let Some(code) = progress.error_code {
            self.error_code = code;
        }
        self.done |= progress.done;
        self.progress = self.compute_progress();
    }

    /// Completed percentage, from transferred bytes when the total is known,
    /// otherwise from finished pages.
    fn compute_progress(&self) -> u8 {
        if self.done && self.error_code == 0 {
            return 100;
        }
        let transferred = if self.sending {
            self.bytes_sent
        } else {
            self.bytes_received
        };
        let ratio = if self.bytes_total > 0 {
            transferred as f64 / self.bytes_total as f64
        } else if self.page_total > 0 {
            self.page_current.saturating_sub(1) as f64 / self.page_total as f64
        } else {
            0.0
        };
        (ratio.clamp(0.0, 1.0) * 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fax_progress_updates() {
        let mut status = FaxStatus::new(true, Some(PathBuf::from("/tmp/out.tif")));
        status.apply(&FaxProgress {
            phase: Some(FaxPhase::PhaseB),
            page_current: Some(1),
            page_total: Some(4),
            bitrate: Some(14400),
            remote_ident: Some("+49 30 1234".to_string()),
            ..Default::default()
        });
        assert_eq!(status.phase, FaxPhase::PhaseB);
        assert_eq!(status.progress, 0);
        assert_eq!(status.bitrate, 14400);

        status.apply(&FaxProgress {
            bytes_sent: Some(500),
            bytes_total: Some(1000),
            ..Default::default()
        });
        assert_eq!(status.progress, 50);
        assert_eq!(status.page_total, 4);

        status.apply(&FaxProgress {
            phase: Some(FaxPhase::PhaseE),
            done: true,
            ..Default::default()
        });
        assert_eq!(status.progress, 100);
    }

    #[test]
    fn test_fax_error_keeps_progress() {
        let mut status = FaxStatus::new(false, None);
        status.apply(&FaxProgress {
            page_current: Some(3),
            page_total: Some(5),
            error_code: Some(48),
            done: true,
            ..Default::default()
        });
        assert_eq!(status.progress, 40);
        assert_eq!(status.error_code, 48);
    }
}
