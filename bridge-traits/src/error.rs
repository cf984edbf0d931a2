use std::time::Duration;
use thiserror::Error;

/// Failure of a host capability, as opposed to a status the server chose.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host cannot provide this capability at all (no display for a
    /// login prompt, no network stack, ...).
    #[error("Host capability not available: {0}")]
    NotAvailable(String),

    #[error("Host operation failed: {0}")]
    OperationFailed(String),

    #[error("Could not reach server: {0}")]
    Connection(String),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Aborted: {0}")]
    Cancelled(String),
}

impl BridgeError {
    /// Deadline expiry or an explicit abort, where the server may never have
    /// seen the request.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, BridgeError::Timeout(_) | BridgeError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_failures() {
        assert!(BridgeError::Timeout(Duration::from_secs(1)).is_interrupted());
        assert!(BridgeError::Cancelled("shutdown".into()).is_interrupted());
        assert!(!BridgeError::Connection("refused".into()).is_interrupted());
    }
}
