use common::apdu::{FrameError, StatusWord};
use thiserror::Error;

/// Every way a signing session can fail.
///
/// None of these is retried internally: the session that produced the error is over, and the
/// caller decides whether a whole new session is worth attempting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The transport reported that it cannot reach any device.
    #[error("transport is not supported on this host")]
    Unsupported,

    /// I/O failure reaching the device.
    #[error("transport error: {0}")]
    Transport(String),

    /// The device did not answer in time. Its internal state is unknown: close and reopen the
    /// handle before starting a new session.
    #[error("exchange timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Malformed frame or response.
    #[error("framing error: {0}")]
    Framing(#[from] FrameError),

    /// Caller-supplied data violates an invariant.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// A derived value was requested without the data it is derived from.
    #[error("missing {0}")]
    MissingKey(&'static str),

    /// A command was issued in a state that does not accept it.
    #[error("{command} cannot be issued while {state}")]
    OutOfOrder {
        state: &'static str,
        command: &'static str,
    },

    /// The device answered with a status word other than 0x9000.
    #[error("device rejected the command with status {status:#06x} ({})", .reason.map(|r| r.description()).unwrap_or("unknown status"))]
    DeviceRejected {
        status: u16,
        reason: Option<StatusWord>,
    },
}

impl ProtocolError {
    pub(crate) fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn rejected(status: u16) -> Self {
        ProtocolError::DeviceRejected {
            status,
            reason: StatusWord::try_from(status).ok(),
        }
    }

    /// The literal status word reported by the device, if this error came from one.
    pub fn status_word(&self) -> Option<u16> {
        match self {
            ProtocolError::DeviceRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = core::result::Result<T, ProtocolError>;
