use std::time::Duration;

use common::constants::{HEADER_SIZE, MAX_FRAME_SIZE};
use serde::Deserialize;

use crate::error::{ProtocolError, Result};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// What to do when the device refuses an output during finalization.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeRejectionPolicy {
    /// Abort the session with the device's status word.
    #[default]
    Abort,
    /// Record the output as not authorized and still ask for a signature. The device is
    /// expected to refuse it, but some firmware versions only prompt at signing time.
    AttemptSign,
}

/// Runtime parameters of a device handle.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on a single exchange, in milliseconds.
    pub timeout_ms: u64,
    /// Repeating XOR key applied to outgoing frames on transports that carry them as opaque
    /// key handles. Hex-encoded when deserialized.
    #[serde(with = "hex::serde")]
    pub scramble_key: Vec<u8>,
    /// Largest frame the transport accepts, header included.
    pub max_frame_size: usize,
    pub finalize_rejection: FinalizeRejectionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            scramble_key: Vec::new(),
            max_frame_size: MAX_FRAME_SIZE,
            finalize_rejection: FinalizeRejectionPolicy::default(),
        }
    }
}

impl Config {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_scramble_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.scramble_key = key.into();
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_finalize_rejection(mut self, policy: FinalizeRejectionPolicy) -> Self {
        self.finalize_rejection = policy;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(ProtocolError::invalid_input(
                "timeout_ms",
                "timeout must be positive",
            ));
        }
        if self.max_frame_size <= HEADER_SIZE || self.max_frame_size > MAX_FRAME_SIZE {
            return Err(ProtocolError::invalid_input(
                "max_frame_size",
                format!(
                    "{} is outside {}..={}",
                    self.max_frame_size,
                    HEADER_SIZE + 1,
                    MAX_FRAME_SIZE
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_frame_size, 260);
        assert!(config.scramble_key.is_empty());
        assert_eq!(config.finalize_rejection, FinalizeRejectionPolicy::Abort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: Config = serde_json::from_str(
            r#"{"timeout_ms": 500, "scramble_key": "773077", "finalize_rejection": "attempt_sign"}"#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.scramble_key, b"w0w".to_vec());
        assert_eq!(config.max_frame_size, 260);
        assert_eq!(
            config.finalize_rejection,
            FinalizeRejectionPolicy::AttemptSign
        );
    }

    #[test]
    fn test_validate_frame_size() {
        for bad in [0, 5, 261] {
            let err = Config::default()
                .with_max_frame_size(bad)
                .validate()
                .unwrap_err();
            assert!(matches!(
                err,
                ProtocolError::InvalidInput {
                    field: "max_frame_size",
                    ..
                }
            ));
        }
        assert!(Config::default().with_max_frame_size(6).validate().is_ok());
    }

    #[test]
    fn test_validate_timeout() {
        let err = Config::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidInput {
                field: "timeout_ms",
                ..
            }
        ));
    }
}
