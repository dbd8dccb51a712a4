//! Gas cost constants used by the bundled host implementations.
//!
//! Costs are reported by host callbacks alongside their result; the sandbox
//! only accumulates them. Hosts embedding gasvm are free to price calls
//! differently.

// ── Storage ──

/// Base cost for a storage read (`get`, `has`, `mapGet`, ...).
pub const G_STORAGE_GET: u64 = 200;

/// Base cost for a storage write (`put`, `mapPut`).
pub const G_STORAGE_PUT: u64 = 500;

/// Base cost for a storage delete (`del`, `mapDel`).
pub const G_STORAGE_DEL: u64 = 300;

/// Base cost for listing map fields (`mapKeys`, `mapLen`).
pub const G_STORAGE_SCAN: u64 = 400;

/// Per-byte cost added to storage operations.
pub const G_PER_BYTE: u64 = 3;

// ── Ledger ──

/// Cost of a block/tx/context metadata query.
pub const G_LEDGER_INFO: u64 = 50;

/// Base cost of an inter-contract call.
pub const G_LEDGER_CALL: u64 = 1000;

/// Cost of a permission check.
pub const G_REQUIRE_AUTH: u64 = 100;

/// Base cost of emitting a receipt or event.
pub const G_EMIT: u64 = 100;

// ── Crypto ──

/// Base cost of a BLAKE3 or SHA-256 hash.
pub const G_HASH: u64 = 50;

/// Cost of an Ed25519 signature verification.
pub const G_VERIFY_ED25519: u64 = 2000;

/// `base + bytes * G_PER_BYTE`, saturating.
pub fn with_bytes(base: u64, byte_count: usize) -> u64 {
    base.saturating_add((byte_count as u64).saturating_mul(G_PER_BYTE))
}

/// Cost of a storage read of `key_len` bytes.
pub fn storage_get(key_len: usize) -> u64 {
    with_bytes(G_STORAGE_GET, key_len)
}

/// Cost of a storage write of `key_len + val_len` bytes.
pub fn storage_put(key_len: usize, val_len: usize) -> u64 {
    with_bytes(G_STORAGE_PUT, key_len.saturating_add(val_len))
}

/// Cost of a storage delete of `key_len` bytes.
pub fn storage_del(key_len: usize) -> u64 {
    with_bytes(G_STORAGE_DEL, key_len)
}

/// Cost of hashing `input_len` bytes.
pub fn hash(input_len: usize) -> u64 {
    with_bytes(G_HASH, input_len)
}
