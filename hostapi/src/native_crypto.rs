//! Native hashing and signature verification.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::buffer::TransferBuffer;
use crate::error::HostError;
use crate::gas;
use crate::traits::{CryptoHost, HostReply, SandboxId};

/// [`CryptoHost`] backed by `blake3`, `sha2`, and `ed25519-dalek`.
///
/// `hash` is BLAKE3. Only `"ed25519"` is accepted by `verify`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCrypto;

impl NativeCrypto {
    pub fn new() -> Self {
        Self
    }
}

fn decode_hex(what: &str, buf: &TransferBuffer) -> Result<Vec<u8>, HostError> {
    hex::decode(buf.as_bytes())
        .map_err(|e| HostError::invalid_argument(format!("{} is not hex: {}", what, e)))
}

fn fixed<const N: usize>(what: &str, bytes: Vec<u8>) -> Result<[u8; N], HostError> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        HostError::invalid_argument(format!("{} must be {} bytes, got {}", what, N, len))
    })
}

fn verify_ed25519(
    message: &[u8],
    signature: &TransferBuffer,
    pubkey: &TransferBuffer,
) -> Result<bool, HostError> {
    let signature = fixed::<64>("signature", decode_hex("signature", signature)?)?;
    let pubkey = fixed::<32>("public key", decode_hex("public key", pubkey)?)?;
    let key = VerifyingKey::from_bytes(&pubkey)
        .map_err(|e| HostError::invalid_argument(format!("bad public key: {}", e)))?;
    Ok(key.verify(message, &Signature::from_bytes(&signature)).is_ok())
}

impl CryptoHost for NativeCrypto {
    fn hash(&self, _sbx: SandboxId, message: &TransferBuffer) -> HostReply<TransferBuffer> {
        let digest = blake3::hash(message.as_bytes());
        HostReply::ok(
            TransferBuffer::from(digest.to_hex().to_string()),
            gas::hash(message.len()),
        )
    }

    fn hash_hex(&self, _sbx: SandboxId, hex_message: &TransferBuffer) -> HostReply<TransferBuffer> {
        let cost = gas::hash(hex_message.len() / 2);
        let outcome = decode_hex("message", hex_message)
            .map(|bytes| TransferBuffer::from(blake3::hash(&bytes).to_hex().to_string()));
        HostReply::new(outcome, cost)
    }

    fn sha256_hex(
        &self,
        _sbx: SandboxId,
        hex_message: &TransferBuffer,
    ) -> HostReply<TransferBuffer> {
        let cost = gas::hash(hex_message.len() / 2);
        let outcome = decode_hex("message", hex_message)
            .map(|bytes| TransferBuffer::from(hex::encode(Sha256::digest(&bytes))));
        HostReply::new(outcome, cost)
    }

    fn verify(
        &self,
        _sbx: SandboxId,
        algorithm: &TransferBuffer,
        message: &TransferBuffer,
        signature: &TransferBuffer,
        pubkey: &TransferBuffer,
    ) -> HostReply<bool> {
        let outcome = match algorithm.as_bytes() {
            b"ed25519" => verify_ed25519(message.as_bytes(), signature, pubkey),
            other => Err(HostError::invalid_argument(format!(
                "unsupported algorithm: {}",
                String::from_utf8_lossy(other)
            ))),
        };
        HostReply::new(outcome, gas::G_VERIFY_ED25519)
    }
}
