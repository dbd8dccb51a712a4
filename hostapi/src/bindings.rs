//! The set of host callbacks a sandbox is created with.

use std::fmt;
use std::sync::Arc;

use crate::mem_ledger::MemLedger;
use crate::native_crypto::NativeCrypto;
use crate::traits::{CryptoHost, LedgerHost, StorageHost};

/// Host callback handles shared by every sandbox created from an instance.
#[derive(Clone)]
pub struct HostBindings {
    pub storage: Arc<dyn StorageHost>,
    pub ledger: Arc<dyn LedgerHost>,
    pub crypto: Arc<dyn CryptoHost>,
}

impl HostBindings {
    pub fn new(
        storage: Arc<dyn StorageHost>,
        ledger: Arc<dyn LedgerHost>,
        crypto: Arc<dyn CryptoHost>,
    ) -> Self {
        Self {
            storage,
            ledger,
            crypto,
        }
    }

    /// Bind storage and ledger to one shared [`MemLedger`].
    pub fn with_ledger(ledger: Arc<MemLedger>) -> Self {
        Self {
            storage: ledger.clone(),
            ledger,
            crypto: Arc::new(NativeCrypto),
        }
    }

    /// A fresh in-memory ledger executing as `"contract"`.
    pub fn in_memory() -> Self {
        Self::with_ledger(Arc::new(MemLedger::default()))
    }
}

impl fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBindings").finish_non_exhaustive()
    }
}
