use serde::{Deserialize, Serialize};
use std::fmt;

pub mod connection;
pub mod fax;
pub mod manager;
pub mod state;
#[cfg(test)]
mod tests;

pub use connection::{ConnectionHandle, ConnectionStatus};
pub use fax::{FaxPhase, FaxProgress, FaxStatus};
pub use manager::{CallManager, CallManagerBuilder, CallManagerOptions};
pub use state::{ConnectionState, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}
