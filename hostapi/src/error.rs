//! Host-side error type shared by host callbacks and the gas meter.
//!
//! A `HostError` returned from a host callback is surfaced to guest code as a
//! thrown exception carrying [`HostError::guest_message`]. The bridge never
//! turns one into a host-side panic.

/// Error reported by a host callback or by host-side accounting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The host rejected the operation; the message is shown to the guest.
    #[error("{0}")]
    Rejected(String),

    /// The caller passed a malformed argument (wrong length, bad encoding).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced contract, API, or key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The gas counter is exhausted or would overflow.
    #[error("out of gas")]
    OutOfGas,

    /// An internal host failure not caused by the guest.
    #[error("internal host error: {0}")]
    Internal(String),
}

impl HostError {
    /// Create a rejection carrying a guest-visible message.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// The message delivered to guest code when this error is thrown.
    pub fn guest_message(&self) -> String {
        self.to_string()
    }

    /// Returns true for errors caused by the guest's own arguments.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_message_is_verbatim() {
        let err = HostError::rejected("balance not enough");
        assert_eq!(err.guest_message(), "balance not enough");
    }

    #[test]
    fn test_display() {
        assert_eq!(HostError::OutOfGas.to_string(), "out of gas");
        assert!(HostError::invalid_argument("key too long")
            .to_string()
            .contains("key too long"));
        assert!(HostError::Internal("disk full".into())
            .to_string()
            .contains("disk full"));
        assert_eq!(
            HostError::not_found("contract token").to_string(),
            "not found: contract token"
        );
    }

    #[test]
    fn test_is_invalid_argument() {
        assert!(HostError::invalid_argument("x").is_invalid_argument());
        assert!(!HostError::OutOfGas.is_invalid_argument());
    }
}
