//! Limits enforced by the bundled in-memory host.

use serde::{Deserialize, Serialize};

/// Maximum length of a storage key in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// Maximum length of a storage value in bytes.
pub const MAX_VALUE_LEN: usize = 65_536; // 64 KiB

/// Size limits applied by [`MemLedger`](crate::MemLedger) to guest requests.
///
/// Violations are reported to the guest as `InvalidArgument` host errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostLimits {
    /// Maximum length of a storage key or map field in bytes.
    pub max_key_len: usize,
    /// Maximum length of a stored value in bytes.
    pub max_value_len: usize,
    /// Maximum number of receipts per ledger.
    pub max_receipts: usize,
    /// Maximum number of events per ledger.
    pub max_events: usize,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            max_key_len: MAX_KEY_LEN,
            max_value_len: MAX_VALUE_LEN,
            max_receipts: 1024,
            max_events: 1024,
        }
    }
}
