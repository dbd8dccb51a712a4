//! Host callback interfaces — the surface the sandbox bridges guest calls to.
//!
//! Each method is one synchronous round-trip. It receives the calling
//! sandbox's [`SandboxId`] and borrowed [`TransferBuffer`] arguments, and
//! returns a [`HostReply`]: the outcome plus the gas cost of the call. The
//! cost is charged to the sandbox whether or not the outcome is an error.
//!
//! Storage methods take an `owner` qualifier naming the account that pays for
//! the stored bytes; an empty owner means the executing contract itself. The
//! `global_*` methods are read-only views into another contract's storage.

use std::fmt;

use crate::buffer::TransferBuffer;
use crate::error::HostError;

/// Typed handle identifying a sandbox at the host-callback boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SandboxId(pub u64);

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sbx-{}", self.0)
    }
}

/// Result of a host callback plus the gas it reports.
#[derive(Debug)]
#[must_use]
pub struct HostReply<T> {
    /// What the host produced, or the error to throw into the guest.
    pub outcome: Result<T, HostError>,
    /// Gas to charge for this call, regardless of `outcome`.
    pub cost: u64,
}

impl<T> HostReply<T> {
    /// A successful reply.
    pub fn ok(value: T, cost: u64) -> Self {
        Self {
            outcome: Ok(value),
            cost,
        }
    }

    /// A failed reply that still costs gas.
    pub fn err(error: HostError, cost: u64) -> Self {
        Self {
            outcome: Err(error),
            cost,
        }
    }

    /// Wrap an outcome with its cost.
    pub fn new(outcome: Result<T, HostError>, cost: u64) -> Self {
        Self { outcome, cost }
    }
}

/// Key-value and namespaced-map storage.
pub trait StorageHost: Send + Sync {
    // ── Plain keys ──

    /// Store `value` under `key`.
    fn put(
        &self,
        sbx: SandboxId,
        key: &TransferBuffer,
        value: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<()>;

    /// Returns true if `key` exists.
    fn has(&self, sbx: SandboxId, key: &TransferBuffer, owner: &TransferBuffer)
        -> HostReply<bool>;

    /// Read `key`; `None` if absent.
    fn get(
        &self,
        sbx: SandboxId,
        key: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<Option<TransferBuffer>>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn del(&self, sbx: SandboxId, key: &TransferBuffer, owner: &TransferBuffer) -> HostReply<()>;

    // ── Maps ──

    /// Store `value` under `field` of map `key`.
    fn map_put(
        &self,
        sbx: SandboxId,
        key: &TransferBuffer,
        field: &TransferBuffer,
        value: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<()>;

    /// Returns true if `field` exists in map `key`.
    fn map_has(
        &self,
        sbx: SandboxId,
        key: &TransferBuffer,
        field: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<bool>;

    /// Read `field` of map `key`.
    fn map_get(
        &self,
        sbx: SandboxId,
        key: &TransferBuffer,
        field: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<Option<TransferBuffer>>;

    /// Delete `field` of map `key`.
    fn map_del(
        &self,
        sbx: SandboxId,
        key: &TransferBuffer,
        field: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<()>;

    /// Field names of map `key` as a JSON array string.
    fn map_keys(
        &self,
        sbx: SandboxId,
        key: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<TransferBuffer>;

    /// Number of fields in map `key`.
    fn map_len(
        &self,
        sbx: SandboxId,
        key: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<u64>;

    // ── Read-only views into other contracts ──

    fn global_has(
        &self,
        sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<bool>;

    fn global_get(
        &self,
        sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<Option<TransferBuffer>>;

    fn global_map_has(
        &self,
        sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        field: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<bool>;

    fn global_map_get(
        &self,
        sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        field: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<Option<TransferBuffer>>;

    fn global_map_keys(
        &self,
        sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<TransferBuffer>;

    fn global_map_len(
        &self,
        sbx: SandboxId,
        contract: &TransferBuffer,
        key: &TransferBuffer,
        owner: &TransferBuffer,
    ) -> HostReply<u64>;
}

/// Ledger queries, inter-contract calls, and receipts.
pub trait LedgerHost: Send + Sync {
    /// Metadata of the block being executed, as a JSON object string.
    fn block_info(&self, sbx: SandboxId) -> HostReply<TransferBuffer>;

    /// Metadata of the transaction being executed, as a JSON object string.
    fn tx_info(&self, sbx: SandboxId) -> HostReply<TransferBuffer>;

    /// Execution context (caller, contract name), as a JSON object string.
    fn context_info(&self, sbx: SandboxId) -> HostReply<TransferBuffer>;

    /// Synchronously call `api` on `contract` with JSON-encoded `args`.
    fn call(
        &self,
        sbx: SandboxId,
        contract: &TransferBuffer,
        api: &TransferBuffer,
        args: &TransferBuffer,
    ) -> HostReply<TransferBuffer>;

    /// Like [`call`](Self::call), forwarding the caller's authority.
    fn call_with_auth(
        &self,
        sbx: SandboxId,
        contract: &TransferBuffer,
        api: &TransferBuffer,
        args: &TransferBuffer,
    ) -> HostReply<TransferBuffer>;

    /// Returns true if `account` granted `permission` to this transaction.
    fn require_auth(
        &self,
        sbx: SandboxId,
        account: &TransferBuffer,
        permission: &TransferBuffer,
    ) -> HostReply<bool>;

    /// Append a structured receipt.
    fn receipt(&self, sbx: SandboxId, content: &TransferBuffer) -> HostReply<()>;

    /// Emit a structured event.
    fn event(&self, sbx: SandboxId, content: &TransferBuffer) -> HostReply<()>;
}

/// Hashing and signature verification.
pub trait CryptoHost: Send + Sync {
    /// Hash `message` and return the hex-encoded digest.
    fn hash(&self, sbx: SandboxId, message: &TransferBuffer) -> HostReply<TransferBuffer>;

    /// Hex-decode `hex_message`, hash it, and return the hex-encoded digest.
    fn hash_hex(&self, sbx: SandboxId, hex_message: &TransferBuffer)
        -> HostReply<TransferBuffer>;

    /// SHA-256 of the hex-decoded input, hex-encoded.
    fn sha256_hex(&self, sbx: SandboxId, hex_message: &TransferBuffer)
        -> HostReply<TransferBuffer>;

    /// Verify `signature` over `message` with `pubkey` under `algorithm`.
    ///
    /// `signature` and `pubkey` are hex-encoded. An unsupported algorithm is
    /// an error; a well-formed but wrong signature is `Ok(false)`.
    fn verify(
        &self,
        sbx: SandboxId,
        algorithm: &TransferBuffer,
        message: &TransferBuffer,
        signature: &TransferBuffer,
        pubkey: &TransferBuffer,
    ) -> HostReply<bool>;
}
