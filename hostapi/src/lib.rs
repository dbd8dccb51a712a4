//! `gasvm-hostapi` — host callback interfaces and types for the gasvm sandbox.
//!
//! This crate defines everything a host needs to plug storage, ledger, and
//! crypto services into a sandbox. It provides:
//!
//! - `TransferBuffer` — owned byte buffer crossing the host/guest boundary
//! - `StorageHost`, `LedgerHost`, `CryptoHost` — host callback traits
//! - `GasMeter` — latching gas counter shared by worker and supervisor
//! - `MemLedger` — in-memory storage and ledger for tests and embedding
//! - `NativeCrypto` — BLAKE3, SHA-256, and Ed25519 verification
//! - `HostError` — error type thrown into the guest

pub mod bindings;
pub mod buffer;
pub mod error;
pub mod gas;
pub mod gas_meter;
pub mod mem_ledger;
pub mod native_crypto;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root.
pub use bindings::HostBindings;
pub use buffer::TransferBuffer;
pub use error::HostError;
pub use gas_meter::GasMeter;
pub use mem_ledger::{BlockInfo, CallRecord, CostTable, MemLedger, TxInfo};
pub use native_crypto::NativeCrypto;
pub use traits::{CryptoHost, HostReply, LedgerHost, SandboxId, StorageHost};
pub use types::HostLimits;
