//! Tagged text encoding, the format stored in the index.
//!
//! Layout: `[DELETE][HASH<32 hex>]storage,storage,...`
//!
//! Storages are joined with `,` and never escaped, so a storage address
//! containing a comma would split into two on decode. Configuration
//! rejects such addresses; this module does not guard against them.

use crate::entry::{Entry, Status};
use crate::CodecError;
use hrw_common::DIGEST_HEX_LEN;

/// Marker for a soft-deleted entry.
pub const DELETE_MARKER: &str = "DELETE";

/// Marker preceding the fixed-length hash.
pub const HASH_MARKER: &str = "HASH";

/// Storage separator.
pub const SEPARATOR: char = ',';

/// Encode an entry. Fails on `HardDeleted` entries.
pub fn encode(entry: &Entry) -> Result<Vec<u8>, CodecError> {
    entry.check_encodable()?;

    let joined_len: usize = entry.storages.iter().map(|s| s.len() + 1).sum();
    let mut out = String::with_capacity(
        DELETE_MARKER.len() + HASH_MARKER.len() + DIGEST_HEX_LEN + joined_len,
    );

    if entry.status == Status::SoftDeleted {
        out.push_str(DELETE_MARKER);
    }
    if entry.hash.len() == DIGEST_HEX_LEN {
        out.push_str(HASH_MARKER);
        out.push_str(&entry.hash);
    }
    for (i, s) in entry.storages.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(s);
    }

    Ok(out.into_bytes())
}

/// Decode bytes produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Entry, CodecError> {
    let mut s = std::str::from_utf8(bytes).map_err(|_| CodecError::Utf8)?;

    let status = match s.strip_prefix(DELETE_MARKER) {
        Some(rest) => {
            s = rest;
            Status::SoftDeleted
        }
        None => Status::Exists,
    };

    let mut hash = String::new();
    if let Some(rest) = s.strip_prefix(HASH_MARKER) {
        let h = rest.get(..DIGEST_HEX_LEN).ok_or(CodecError::Truncated("hash"))?;
        hash = h.to_string();
        s = &rest[DIGEST_HEX_LEN..];
    }

    let storages = if s.is_empty() {
        Vec::new()
    } else {
        s.split(SEPARATOR).map(str::to_string).collect()
    };

    Ok(Entry {
        storages,
        status,
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrw_common::Digest;

    fn storages() -> Vec<String> {
        vec![
            "localhost:1".to_string(),
            "localhost:2".to_string(),
            "localhost:3".to_string(),
        ]
    }

    #[test]
    fn test_entry_serialization() {
        let hash = Digest::of(b"testhash").to_hex();

        let entries = vec![
            Entry {
                storages: storages(),
                status: Status::Exists,
                hash: hash.clone(),
            },
            Entry {
                storages: storages(),
                status: Status::SoftDeleted,
                hash: String::new(),
            },
            Entry {
                storages: storages(),
                status: Status::SoftDeleted,
                hash: hash.clone(),
            },
            Entry {
                storages: storages(),
                status: Status::Exists,
                hash: String::new(),
            },
        ];

        for (idx, entry) in entries.iter().enumerate() {
            let bytes = encode(entry).unwrap();
            assert_eq!(&decode(&bytes).unwrap(), entry, "entry {}", idx);
        }
    }

    #[test]
    fn test_exact_layout() {
        let hash = "5d41402abc4b2a76b9719d911017c592";
        let e = Entry {
            storages: vec!["a:1".into(), "b:2/sv0A".into()],
            status: Status::SoftDeleted,
            hash: hash.into(),
        };
        assert_eq!(
            encode(&e).unwrap(),
            format!("DELETEHASH{}a:1,b:2/sv0A", hash).into_bytes()
        );

        let plain = Entry::exists(vec!["a:1".into()], "");
        assert_eq!(encode(&plain).unwrap(), b"a:1");
    }

    #[test]
    fn test_hard_deleted_refused() {
        assert_eq!(encode(&Entry::missing()), Err(CodecError::HardDeleted));
    }

    #[test]
    fn test_truncated_hash() {
        assert_eq!(decode(b"HASHabc"), Err(CodecError::Truncated("hash")));
    }

    #[test]
    fn test_not_utf8() {
        assert_eq!(decode(&[0xff, 0xfe]), Err(CodecError::Utf8));
    }

    #[test]
    fn test_separator_in_storage_splits() {
        // Documented limitation: no escaping of the separator.
        let e = Entry::exists(vec!["a:1,b:2".into()], "");
        let decoded = decode(&encode(&e).unwrap()).unwrap();
        assert_eq!(decoded.storages, vec!["a:1".to_string(), "b:2".to_string()]);
    }
}
