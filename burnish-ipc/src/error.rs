//! IPC error types

use thiserror::Error;

/// Protocol-level errors raised while encoding or decoding bridge traffic.
#[derive(Debug, Clone, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// Frame did not match any known shape
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

impl IpcError {
    /// Check if this error indicates a condition no retry can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::ProtocolVersionMismatch { .. } | IpcError::InvalidFrame(_)
        )
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            IpcError::Deserialization(err.to_string())
        } else {
            IpcError::Serialization(err.to_string())
        }
    }
}
