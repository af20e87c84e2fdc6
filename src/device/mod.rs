use crate::{call::fax::FaxProgress, error::BackendError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};
use tokio::sync::mpsc;

pub mod memory;
pub mod pattern;
pub mod registry;

pub use memory::MemoryBackend;
pub use pattern::NumberPattern;
pub use registry::DeviceRegistry;

/// Capability class of a backend, and the kind of call it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Phone,
    Fax,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Phone => write!(f, "phone"),
            DeviceKind::Fax => write!(f, "fax"),
        }
    }
}

/// Backend private identifier of one line connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendToken(pub u64);

impl fmt::Display for BackendToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct OriginateRequest {
    pub kind: DeviceKind,
    pub target: String,
    pub source: String,
    pub suppress_caller_id: bool,
    pub fax_file: Option<PathBuf>,
}

/// Result of a successful originate: the token plus the B-channel in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineChannel {
    pub token: BackendToken,
    pub channel: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub channel: Option<u32>,
    pub connected: bool,
    pub held: bool,
    pub detail: Option<String>,
}

/// Notification delivered by a backend about one of its lines.
#[derive(Debug, Clone)]
pub struct LineEvent {
    pub backend: String,
    pub token: BackendToken,
    pub kind: LineEventKind,
}

#[derive(Debug, Clone)]
pub enum LineEventKind {
    /// A remote party is calling one of the backend's numbers.
    Incoming {
        remote: String,
        local: String,
        channel: u32,
    },
    RemoteAnswered,
    /// B-channel established, payload may flow.
    LineUp,
    RemoteHungUp,
    DisconnectConfirmed,
    Fault {
        code: u16,
        reason: String,
    },
    Data(Vec<u8>),
    Dtmf(char),
    FaxProgress(FaxProgress),
}

impl LineEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            LineEventKind::Incoming { .. } => "incoming",
            LineEventKind::RemoteAnswered => "remote_answered",
            LineEventKind::LineUp => "line_up",
            LineEventKind::RemoteHungUp => "remote_hung_up",
            LineEventKind::DisconnectConfirmed => "disconnect_confirmed",
            LineEventKind::Fault { .. } => "fault",
            LineEventKind::Data(_) => "data",
            LineEventKind::Dtmf(_) => "dtmf",
            LineEventKind::FaxProgress(_) => "fax_progress",
        }
    }
}

pub type LineEventSender = mpsc::UnboundedSender<LineEvent>;
pub type LineEventReceiver = mpsc::UnboundedReceiver<LineEvent>;

/// A phone or fax plugin sitting on top of the line hardware.
///
/// Backends never call into the call manager directly: everything they
/// observe on the line is sent as a [`LineEvent`] through the sender handed
/// over in [`DeviceBackend::attach`].
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> DeviceKind;

    /// Whether this backend owns `number`. Must be side-effect free.
    fn handles(&self, number: &str) -> bool;

    fn attach(&self, _events: LineEventSender) {}

    /// Backends behind a network link cannot dial while offline.
    fn requires_network(&self) -> bool {
        true
    }

    async fn originate(&self, request: &OriginateRequest) -> Result<LineChannel, BackendError>;

    async fn answer(&self, token: BackendToken) -> Result<(), BackendError>;

    async fn terminate(&self, token: BackendToken) -> Result<(), BackendError>;

    async fn get_status(&self, token: BackendToken) -> Result<BackendStatus, BackendError>;

    async fn transmit(&self, _token: BackendToken, _data: &[u8]) -> Result<(), BackendError> {
        Ok(())
    }

    async fn hold(&self, _token: BackendToken, _hold: bool) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("hold"))
    }

    async fn send_dtmf(&self, _token: BackendToken, _digit: char) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("dtmf"))
    }

    async fn reconnect(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
