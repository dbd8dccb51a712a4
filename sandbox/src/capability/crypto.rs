//! `crypto` capability: hashing and signature checks.

use gasvm_hostapi::TransferBuffer;

use super::{Bridge, BridgeError, Method};

/// Crypto proxy bound to one sandbox.
#[derive(Debug, Clone, Copy)]
pub struct Crypto<'a> {
    bridge: &'a Bridge,
}

impl<'a> Crypto<'a> {
    pub(super) fn new(bridge: &'a Bridge) -> Self {
        Self { bridge }
    }

    pub fn hash(&self, message: &TransferBuffer) -> Result<TransferBuffer, BridgeError> {
        self.bridge
            .invoke(Method::Hash, |host, sbx| host.crypto.hash(sbx, message))
    }

    pub fn hash_hex(&self, hex_message: &TransferBuffer) -> Result<TransferBuffer, BridgeError> {
        self.bridge
            .invoke(Method::HashHex, |host, sbx| host.crypto.hash_hex(sbx, hex_message))
    }

    pub fn sha256_hex(&self, hex_message: &TransferBuffer) -> Result<TransferBuffer, BridgeError> {
        self.bridge
            .invoke(Method::Sha256Hex, |host, sbx| host.crypto.sha256_hex(sbx, hex_message))
    }

    pub fn verify(
        &self,
        algorithm: &TransferBuffer,
        message: &TransferBuffer,
        signature: &TransferBuffer,
        pubkey: &TransferBuffer,
    ) -> Result<bool, BridgeError> {
        self.bridge.invoke(Method::Verify, |host, sbx| {
            host.crypto.verify(sbx, algorithm, message, signature, pubkey)
        })
    }
}
