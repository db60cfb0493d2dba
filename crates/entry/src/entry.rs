//! The entry record and its deletion state machine.

use crate::CodecError;
use hrw_common::DIGEST_HEX_LEN;

/// Deletion status of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Replicas are complete and readable.
    Exists,
    /// Indexed but not readable: a write in progress or a delete waiting
    /// for every replica to confirm.
    SoftDeleted,
    /// No index row. Never persisted.
    HardDeleted,
}

/// Authoritative per-key record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Storage targets believed to hold a replica, in placement order.
    pub storages: Vec<String>,
    pub status: Status,
    /// Lowercase hex MD5 of the payload, or empty when unknown.
    pub hash: String,
}

impl Entry {
    /// What a key without an index row looks like.
    pub fn missing() -> Self {
        Self {
            storages: Vec::new(),
            status: Status::HardDeleted,
            hash: String::new(),
        }
    }

    /// Placeholder written before any replica is touched.
    pub fn placeholder(storages: Vec<String>) -> Self {
        Self {
            storages,
            status: Status::SoftDeleted,
            hash: String::new(),
        }
    }

    pub fn exists(storages: Vec<String>, hash: impl Into<String>) -> Self {
        Self {
            storages,
            status: Status::Exists,
            hash: hash.into(),
        }
    }

    /// Same entry, flipped to `SoftDeleted`.
    pub fn soft_deleted(&self) -> Self {
        Self {
            status: Status::SoftDeleted,
            ..self.clone()
        }
    }

    /// Whether reads may be served from this entry.
    pub fn is_readable(&self) -> bool {
        self.status == Status::Exists
    }

    /// Checks shared by both encoders.
    pub(crate) fn check_encodable(&self) -> Result<(), CodecError> {
        if self.status == Status::HardDeleted {
            return Err(CodecError::HardDeleted);
        }
        if !self.hash.is_empty() && self.hash.len() != DIGEST_HEX_LEN {
            return Err(CodecError::HashLength {
                expected: DIGEST_HEX_LEN,
                got: self.hash.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_is_hard_deleted() {
        let e = Entry::missing();
        assert_eq!(e.status, Status::HardDeleted);
        assert!(e.storages.is_empty());
        assert!(!e.is_readable());
    }

    #[test]
    fn test_soft_deleted_keeps_fields() {
        let e = Entry::exists(vec!["a:1".into()], "0".repeat(32));
        let s = e.soft_deleted();
        assert_eq!(s.status, Status::SoftDeleted);
        assert_eq!(s.storages, e.storages);
        assert_eq!(s.hash, e.hash);
    }

    #[test]
    fn test_check_encodable() {
        assert_eq!(
            Entry::missing().check_encodable(),
            Err(CodecError::HardDeleted)
        );
        let bad = Entry::exists(vec!["a:1".into()], "abc");
        assert!(matches!(
            bad.check_encodable(),
            Err(CodecError::HashLength { got: 3, .. })
        ));
        assert!(Entry::placeholder(vec!["a:1".into()])
            .check_encodable()
            .is_ok());
    }
}
