use thiserror::Error;

/// Errors that can occur while driving a link in either role
#[derive(Error, Debug)]
pub enum LinkError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Operation attempted in a state that does not allow it
    #[error("Precondition failed: {reason}")]
    PreconditionFailed {
        /// Why the operation was refused
        reason: String,
    },

    /// Connection attempt or established link failed
    #[error("Link failure: {0}")]
    LinkFailure(String),

    /// Payload bytes could not be decoded
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Device not known to the transport
    #[error("Device not found")]
    DeviceNotFound,

    /// Transport operation timed out
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Key-value flag store failure
    #[error("Flag store error: {0}")]
    Store(String),
}

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

impl LinkError {
    /// Shorthand for a [`LinkError::PreconditionFailed`]
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::LinkFailure(_) | Self::DeviceNotFound | Self::Timeout { .. }
        )
    }

    /// Check if this error is absorbed locally (logged, dependent step skipped)
    #[must_use]
    pub const fn is_absorbed(&self) -> bool {
        matches!(
            self,
            Self::PreconditionFailed { .. } | Self::MalformedPayload(_)
        )
    }
}
