use crate::{
    call::{fax::FaxStatus, ConnectionState, Direction},
    device::DeviceKind,
};
use crate::utils::scramble_number;
use serde::Serialize;

/// CallEvent is what the presentation layer observes about calls.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    /// A remote party is calling
    Incoming {
        id: String,
        kind: DeviceKind,
        remote: String,
        local: String,
        timestamp: u64,
    },

    StateChanged {
        id: String,
        direction: Direction,
        state: ConnectionState,
        timestamp: u64,
    },

    FaxProgress {
        id: String,
        status: FaxStatus,
    },

    /// DTMF digit received from the remote side
    Dtmf {
        id: String,
        digit: char,
    },

    Error {
        id: Option<String>,
        message: String,
    },

    /// Backend sent something that matches no known connection
    ProtocolViolation {
        backend: String,
        token: u64,
        line_event: String,
    },

    Connectivity {
        online: bool,
    },
}

impl CallEvent {
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            CallEvent::Incoming { id, .. }
            | CallEvent::StateChanged { id, .. }
            | CallEvent::FaxProgress { id, .. }
            | CallEvent::Dtmf { id, .. } => Some(id),
            CallEvent::Error { id, .. } => id.as_deref(),
            CallEvent::ProtocolViolation { .. } | CallEvent::Connectivity { .. } => None,
        }
    }

    /// One-line description for logs, phone numbers scrambled.
    pub fn summary(&self) -> String {
        match self {
            CallEvent::Incoming {
                id,
                kind,
                remote,
                local,
                ..
            } => format!(
                "incoming {} call {} from {} to {}",
                kind,
                id,
                scramble_number(remote),
                scramble_number(local)
            ),
            CallEvent::StateChanged {
                id,
                direction,
                state,
                ..
            } => format!("{} call {} is {}", direction, id, state),
            CallEvent::FaxProgress { id, status } => format!(
                "fax {} {:?} page {}/{} {}%",
                id, status.phase, status.page_current, status.page_total, status.progress
            ),
            CallEvent::Dtmf { id, digit } => format!("dtmf {} on {}", digit, id),
            CallEvent::Error { id, message } => {
                format!("error on {}: {}", id.as_deref().unwrap_or("-"), message)
            }
            CallEvent::ProtocolViolation {
                backend,
                token,
                line_event,
            } => format!("protocol violation: {} sent {} for #{}", backend, line_event, token),
            CallEvent::Connectivity { online } => format!("online={}", online),
        }
    }
}

/// Type alias for the event sender
pub type CallEventSender = tokio::sync::broadcast::Sender<CallEvent>;

/// Type alias for the event receiver
pub type CallEventReceiver = tokio::sync::broadcast::Receiver<CallEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_serializes_with_tag() {
        let event = CallEvent::ProtocolViolation {
            backend: "phone".to_string(),
            token: 7,
            line_event: "line_up".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "protocol_violation");
        assert_eq!(value["line_event"], "line_up");
        assert_eq!(value["token"], 7);
        assert_eq!(event.connection_id(), None);
    }

    #[test]
    fn test_summary_scrambles_numbers() {
        let event = CallEvent::Incoming {
            id: "c1".to_string(),
            kind: DeviceKind::Phone,
            remote: "030123456".to_string(),
            local: "4930111".to_string(),
            timestamp: 0,
        };
        let summary = event.summary();
        assert!(!summary.contains("030123456"), "{}", summary);
        assert!(!summary.contains("4930111"), "{}", summary);
        assert!(summary.contains(&scramble_number("030123456")));
    }
}
