//! Length-prefixed, move-only byte buffer used at every boundary crossing.
//!
//! A `TransferBuffer` carries its length explicitly, so embedded zero bytes
//! and the empty string are both legal payloads. The type is not
//! `Clone`: ownership moves from producer to receiver, and the receiver
//! releases it exactly once (either by consuming it or by letting it drop).
//!
//! When a buffer is written into guest linear memory it uses the wire form
//! `[len: u32 LE][bytes]`, see [`TransferBuffer::encode_prefixed`].

use std::fmt;

use crate::error::HostError;

/// Size of the length prefix in the wire form.
pub const LENGTH_PREFIX: usize = 4;

/// An owned byte buffer with an explicit length.
#[derive(PartialEq, Eq, Default)]
pub struct TransferBuffer {
    data: Box<[u8]>,
}

impl TransferBuffer {
    /// Take ownership of `bytes`.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: bytes.into().into_boxed_slice(),
        }
    }

    /// An empty buffer (length 0).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy a string into a new buffer.
    pub fn from_text(s: &str) -> Self {
        Self::new(s.as_bytes())
    }

    /// Number of payload bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the payload as UTF-8.
    pub fn as_str(&self) -> Result<&str, HostError> {
        std::str::from_utf8(&self.data)
            .map_err(|e| HostError::InvalidArgument(format!("buffer is not utf-8: {}", e)))
    }

    /// Consume the buffer, returning the bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_vec()
    }

    /// Consume the buffer as a UTF-8 string.
    pub fn into_string(self) -> Result<String, HostError> {
        String::from_utf8(self.into_vec())
            .map_err(|e| HostError::InvalidArgument(format!("buffer is not utf-8: {}", e)))
    }

    /// Consume the buffer as a string, replacing invalid UTF-8 sequences.
    pub fn into_string_lossy(self) -> String {
        match String::from_utf8(self.into_vec()) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }

    /// Explicitly release the buffer.
    ///
    /// Equivalent to dropping it; exists so call sites can mark the point
    /// where the receiving side gives the memory back.
    pub fn release(self) {}

    /// Encode as `[len: u32 LE][bytes]`.
    ///
    /// Fails if the payload does not fit in a `u32` length.
    pub fn encode_prefixed(&self) -> Result<Vec<u8>, HostError> {
        let len = u32::try_from(self.data.len()).map_err(|_| {
            HostError::InvalidArgument(format!("buffer too large: {} bytes", self.data.len()))
        })?;
        let mut out = Vec::with_capacity(LENGTH_PREFIX + self.data.len());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Decode a buffer from its wire form.
    ///
    /// Trailing bytes after the declared length are ignored.
    pub fn decode_prefixed(bytes: &[u8]) -> Result<Self, HostError> {
        if bytes.len() < LENGTH_PREFIX {
            return Err(HostError::InvalidArgument(
                "length prefix truncated".into(),
            ));
        }
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let end = LENGTH_PREFIX
            .checked_add(len)
            .ok_or_else(|| HostError::InvalidArgument("length prefix overflow".into()))?;
        if bytes.len() < end {
            return Err(HostError::InvalidArgument(format!(
                "payload truncated: declared {} bytes, have {}",
                len,
                bytes.len() - LENGTH_PREFIX
            )));
        }
        Ok(Self::new(&bytes[LENGTH_PREFIX..end]))
    }
}

impl From<String> for TransferBuffer {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<&str> for TransferBuffer {
    fn from(s: &str) -> Self {
        Self::from_text(s)
    }
}

impl From<Vec<u8>> for TransferBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<&[u8]> for TransferBuffer {
    fn from(v: &[u8]) -> Self {
        Self::new(v)
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.data) {
            Ok(s) if s.len() <= 64 => write!(f, "TransferBuffer({:?})", s),
            _ => write!(f, "TransferBuffer({} bytes)", self.data.len()),
        }
    }
}
