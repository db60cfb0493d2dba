//! Index entries for hrw.
//!
//! An [`Entry`] is the authoritative record for one key: which storage
//! targets hold a replica, whether the key is (soft-)deleted, and the
//! payload checksum. Two encodings are provided: the tagged text format
//! stored in the index ([`text`]) and an experimental framed binary
//! format ([`binary`]) kept interchangeable with it.

pub mod binary;
pub mod entry;
pub mod text;

pub use entry::{Entry, Status};

/// Errors raised while encoding or decoding an [`Entry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A hard-deleted entry reached the encoder. This is a caller bug:
    /// hard deletion means "no index row", never a stored value.
    #[error("cannot encode a hard-deleted entry")]
    HardDeleted,
    #[error("hash must be empty or {expected} hex chars, got {got}")]
    HashLength { expected: usize, got: usize },
    #[error("entry bytes are not valid UTF-8")]
    Utf8,
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    #[error("invalid status byte {0}")]
    BadStatus(u8),
    #[error("missing status frame")]
    MissingStatus,
}
