use std::time::Duration;

use thiserror::Error;

/// Everything that can sink a mission run. All variants are terminal: the
/// binaries report the error and exit 1, nothing is retried.
#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("invalid connection url: {0}")]
    Endpoint(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("no system found after {waited:.1?}")]
    NoSystemFound { waited: Duration },

    #[error("timed out waiting for {what} after {waited:.1?}")]
    WaitTimeout {
        what: &'static str,
        waited: Duration,
    },

    #[error("{cmd} failed: {reason}")]
    Command { cmd: &'static str, reason: String },

    #[error("autopilot link closed")]
    LinkClosed,
}

pub type CmdResult = Result<(), VehicleError>;
