//! Execution results and deadlines.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use gasvm_hostapi::TransferBuffer;

/// Which ceiling a run exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Gas,
    Memory,
}

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed source; nothing ran.
    Compile,
    /// The guest threw, or a host error surfaced uncaught.
    GuestException,
    /// Gas or memory ceiling breached; the run was killed.
    ResourceExceeded(Resource),
    /// Wall-clock deadline passed; the run was killed.
    DeadlineExceeded,
    /// A caller-supplied argument was rejected before the run.
    InvalidArgument,
    /// Worker panic or engine failure unrelated to the guest.
    Internal,
}

impl ErrorKind {
    /// True for kinds produced by a supervisor kill.
    pub fn is_kill(self) -> bool {
        matches!(self, Self::ResourceExceeded(_) | Self::DeadlineExceeded)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile => f.write_str("compile"),
            Self::GuestException => f.write_str("guest exception"),
            Self::ResourceExceeded(Resource::Gas) => f.write_str("out of gas"),
            Self::ResourceExceeded(Resource::Memory) => f.write_str("out of memory"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::Internal => f.write_str("internal"),
        }
    }
}

/// Either the value a run produced or why it failed.
#[derive(Debug, PartialEq, Eq)]
pub enum Payload {
    Value { data: TransferBuffer, is_json: bool },
    Error { kind: ErrorKind, message: TransferBuffer },
}

/// Outcome of one execution: exactly one of value or error, plus gas used.
#[derive(Debug, PartialEq, Eq)]
pub struct ValueTuple {
    payload: Payload,
    gas_used: u64,
}

impl ValueTuple {
    pub fn completed(data: impl Into<TransferBuffer>, is_json: bool, gas_used: u64) -> Self {
        Self {
            payload: Payload::Value {
                data: data.into(),
                is_json,
            },
            gas_used,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<TransferBuffer>, gas_used: u64) -> Self {
        Self {
            payload: Payload::Error {
                kind,
                message: message.into(),
            },
            gas_used,
        }
    }

    /// The value as text, if the run completed.
    pub fn value(&self) -> Option<&str> {
        match &self.payload {
            Payload::Value { data, .. } => data.as_str().ok(),
            Payload::Error { .. } => None,
        }
    }

    /// The raw value bytes, if the run completed.
    pub fn value_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Value { data, .. } => Some(data.as_bytes()),
            Payload::Error { .. } => None,
        }
    }

    /// The error message, if the run failed.
    pub fn error(&self) -> Option<&str> {
        match &self.payload {
            Payload::Error { message, .. } => message.as_str().ok(),
            Payload::Value { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.payload {
            Payload::Error { kind, .. } => Some(*kind),
            Payload::Value { .. } => None,
        }
    }

    /// True when the value is a JSON document rather than a coerced string.
    pub fn is_json(&self) -> bool {
        matches!(self.payload, Payload::Value { is_json: true, .. })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.payload, Payload::Value { .. })
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Move the payload out.
    pub fn into_parts(self) -> (Payload, u64) {
        (self.payload, self.gas_used)
    }
}

/// Absolute monotonic point in time after which a run is killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        Self(now.checked_add(timeout).unwrap_or(now + Duration::from_secs(86_400 * 365)))
    }

    /// Convert a wall-clock time to a monotonic deadline.
    ///
    /// A time in the past yields an already-expired deadline.
    pub fn from_system_time(time: SystemTime) -> Self {
        let now = Instant::now();
        match time.duration_since(SystemTime::now()) {
            Ok(ahead) => Self::after(ahead),
            Err(behind) => Self(now.checked_sub(behind.duration()).unwrap_or(now)),
        }
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// True once the deadline is strictly in the past.
    pub fn is_expired(&self) -> bool {
        Instant::now() > self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_accessors() {
        let result = ValueTuple::completed("42", false, 7);
        assert_eq!(result.value(), Some("42"));
        assert!(result.error().is_none());
        assert!(result.error_kind().is_none());
        assert!(!result.is_json());
        assert_eq!(result.gas_used(), 7);
    }

    #[test]
    fn test_failed_accessors() {
        let result = ValueTuple::failed(ErrorKind::ResourceExceeded(Resource::Gas), "out of gas", 500);
        assert!(result.value().is_none());
        assert_eq!(result.error(), Some("out of gas"));
        assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExceeded(Resource::Gas)));
        assert!(result.error_kind().unwrap().is_kill());
        assert!(!result.is_ok());
    }

    #[test]
    fn test_into_parts_moves_buffers() {
        let (payload, gas) = ValueTuple::completed(r#"{"a":1}"#, true, 3).into_parts();
        match payload {
            Payload::Value { data, is_json } => {
                assert!(is_json);
                assert_eq!(data.into_string().unwrap(), r#"{"a":1}"#);
            }
            other => panic!("expected value, got {:?}", other),
        }
        assert_eq!(gas, 3);
    }

    #[test]
    fn test_past_system_time_is_expired() {
        let deadline = Deadline::from_system_time(SystemTime::now() - Duration::from_millis(1));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_future_deadline() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(50));
    }
}
