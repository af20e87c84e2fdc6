use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one connection.
///
/// ```text
///            Dialing --answered--+
///  (Idle) -<                     +--> Connected --line up--> Active
///            Ringing --pickup----+
///
///  Dialing/Ringing/Connected/Active --hangup--> Disconnecting --> Disconnected
///  any non-terminal --fault--> Failed
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Dialing,
    Ringing,
    Connected,
    Active,
    Disconnecting,
    Disconnected,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }

    /// States in which the call still holds a line and may be hung up.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Dialing
                | ConnectionState::Ringing
                | ConnectionState::Connected
                | ConnectionState::Active
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Dialing => "dialing",
            ConnectionState::Ringing => "ringing",
            ConnectionState::Connected => "connected",
            ConnectionState::Active => "active",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input that may move a connection to another state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trigger {
    RemoteAnswered,
    LineUp,
    RemoteHungUp,
    DisconnectConfirmed,
    Fault,
    LocalAnswer,
    LocalHangup,
    TeardownTimeout,
}

const TO_CONNECTED: &[ConnectionState] = &[ConnectionState::Connected];
const TO_ACTIVE: &[ConnectionState] = &[ConnectionState::Active];
const TO_DISCONNECTING: &[ConnectionState] = &[ConnectionState::Disconnecting];
const TO_DISCONNECTED: &[ConnectionState] = &[ConnectionState::Disconnected];
const TO_FAILED: &[ConnectionState] = &[ConnectionState::Failed];
const REMOTE_TEARDOWN: &[ConnectionState] = &[
    ConnectionState::Disconnecting,
    ConnectionState::Disconnected,
];

/// States entered, in order, when `trigger` hits a connection in `state`.
///
/// `None` means the trigger does not apply and must be ignored.
pub fn transition(state: ConnectionState, trigger: Trigger) -> Option<&'static [ConnectionState]> {
    use ConnectionState::*;
    match (state, trigger) {
        (Idle, _) => None,
        (Disconnected | Failed, _) => None,
        (_, Trigger::Fault) => Some(TO_FAILED),
        (Dialing, Trigger::RemoteAnswered) => Some(TO_CONNECTED),
        (Ringing, Trigger::LocalAnswer) => Some(TO_CONNECTED),
        (Connected, Trigger::LineUp) => Some(TO_ACTIVE),
        (Dialing | Ringing | Connected | Active, Trigger::RemoteHungUp) => Some(REMOTE_TEARDOWN),
        (Dialing | Ringing | Connected | Active, Trigger::LocalHangup) => Some(TO_DISCONNECTING),
        (
            Disconnecting,
            Trigger::DisconnectConfirmed | Trigger::RemoteHungUp | Trigger::TeardownTimeout,
        ) => Some(TO_DISCONNECTED),
        _ => None,
    }
}
