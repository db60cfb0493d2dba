//! hrw-common: shared types for the hrw placement proxy.
//!
//! Provides the 128-bit [`Digest`] used for rendezvous scores and key
//! bucketing, plus the mapping between a raw client key and the path
//! under which a storage node keeps its bytes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits in a digest.
pub const DIGEST_BITS: usize = 128;

/// Number of bytes in a digest.
pub const DIGEST_BYTES: usize = DIGEST_BITS / 8; // 16

/// Length of a digest rendered as lowercase hex.
pub const DIGEST_HEX_LEN: usize = DIGEST_BYTES * 2; // 32

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// A 128-bit MD5 digest.
///
/// Ordering is big-endian byte order, which is what rendezvous scoring
/// compares on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_BYTES]);

impl Digest {
    /// Create a `Digest` from raw bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_BYTES]) -> Self {
        Self(bytes)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_BYTES] {
        &self.0
    }

    /// Digest of a single buffer.
    pub fn of(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    /// Digest of the concatenation of `parts`, without allocating the
    /// concatenated buffer.
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut ctx = md5::Context::new();
        for part in parts {
            ctx.consume(part);
        }
        Self(ctx.compute().0)
    }

    /// Big-endian `u32` read from `bytes[12..16]`.
    pub fn tail_u32(&self) -> u32 {
        u32::from_be_bytes([self.0[12], self.0[13], self.0[14], self.0[15]])
    }

    /// Full lowercase hex rendering (32 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show first 4 bytes as hex for readability
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}

// ---------------------------------------------------------------------------
// Key paths
// ---------------------------------------------------------------------------

/// Path under which storage nodes keep the bytes for `key`.
///
/// `/<d0>/<d1>/<base64(key)>` where `d0`/`d1` are the first two bytes of
/// the key digest in lowercase hex. The two-level fan-out keeps any
/// single directory on a storage node small.
pub fn key_path(key: &[u8]) -> String {
    let digest = Digest::of(key);
    let b = digest.as_bytes();
    format!("/{:02x}/{:02x}/{}", b[0], b[1], BASE64.encode(key))
}

/// URL of `key` on a storage target (`host:port` or `host:port/svXX`).
pub fn key_url(target: &str, key: &[u8]) -> String {
    format!("http://{}{}", target, key_path(key))
}

/// Recover the original key from a file name found on a storage node.
pub fn decode_key_name(name: &str) -> Result<Vec<u8>, KeyNameError> {
    BASE64
        .decode(name)
        .map_err(|e| KeyNameError::Base64(name.to_string(), e))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum KeyNameError {
    #[error("file name {0:?} is not base64: {1}")]
    Base64(String, base64::DecodeError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_md5() {
        // md5("hello")
        assert_eq!(
            Digest::of(b"hello").to_hex(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_digest_of_parts_equals_concatenation() {
        let joined = Digest::of(b"/file1localhost:3001");
        let parts = Digest::of_parts(&[b"/file1", b"localhost:3001"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_digest_ordering_is_big_endian() {
        let mut lo = [0u8; DIGEST_BYTES];
        let mut hi = [0u8; DIGEST_BYTES];
        lo[15] = 0xff;
        hi[0] = 0x01;
        assert!(Digest::from_bytes(hi) > Digest::from_bytes(lo));
    }

    #[test]
    fn test_tail_u32() {
        let mut bytes = [0u8; DIGEST_BYTES];
        bytes[12..16].copy_from_slice(&[0x00, 0x00, 0x01, 0x02]);
        assert_eq!(Digest::from_bytes(bytes).tail_u32(), 0x0102);
    }

    #[test]
    fn test_key_path_layout() {
        let path = key_path(b"/file1");
        let parts: Vec<&str> = path.split('/').collect();
        // leading empty segment, two buckets, file name
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), 2);
        assert_eq!(parts[3], "L2ZpbGUx");

        let digest = Digest::of(b"/file1").to_hex();
        assert_eq!(parts[1], &digest[0..2]);
        assert_eq!(parts[2], &digest[2..4]);
    }

    #[test]
    fn test_decode_key_name_roundtrip() {
        let path = key_path(b"some/odd key?");
        let name = path.rsplit('/').next().unwrap();
        assert_eq!(decode_key_name(name).unwrap(), b"some/odd key?");
    }

    #[test]
    fn test_decode_key_name_rejects_garbage() {
        assert!(decode_key_name("not base64!!").is_err());
    }

    #[test]
    fn test_key_url() {
        assert_eq!(
            key_url("localhost:3001/sv0A", b"k"),
            format!("http://localhost:3001/sv0A{}", key_path(b"k"))
        );
    }
}
