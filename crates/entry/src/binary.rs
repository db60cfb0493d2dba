//! Experimental framed binary encoding.
//!
//! Each field is a frame `[tag u8][len u32 BE][payload]`:
//!
//! | tag    | payload                                   |
//! |--------|-------------------------------------------|
//! | `0x01` | status byte: 0 = Exists, 1 = SoftDeleted  |
//! | `0x02` | hash, ASCII (omitted when empty)          |
//! | `0x03` | one storage, repeated in order            |
//!
//! Not used on the serving path. It must decode to the same [`Entry`]
//! as the text format for every legal entry.

use crate::entry::{Entry, Status};
use crate::CodecError;

pub const TAG_STATUS: u8 = 0x01;
pub const TAG_HASH: u8 = 0x02;
pub const TAG_STORAGE: u8 = 0x03;

const FRAME_HEADER: usize = 5;

fn push_frame(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

pub fn encode(entry: &Entry) -> Result<Vec<u8>, CodecError> {
    entry.check_encodable()?;

    let status = match entry.status {
        Status::Exists => 0u8,
        Status::SoftDeleted => 1u8,
        Status::HardDeleted => return Err(CodecError::HardDeleted),
    };

    let mut out = Vec::with_capacity(
        FRAME_HEADER * (2 + entry.storages.len())
            + 1
            + entry.hash.len()
            + entry.storages.iter().map(String::len).sum::<usize>(),
    );
    push_frame(&mut out, TAG_STATUS, &[status]);
    if !entry.hash.is_empty() {
        push_frame(&mut out, TAG_HASH, entry.hash.as_bytes());
    }
    for s in &entry.storages {
        push_frame(&mut out, TAG_STORAGE, s.as_bytes());
    }
    Ok(out)
}

pub fn decode(mut bytes: &[u8]) -> Result<Entry, CodecError> {
    let mut status = None;
    let mut hash = String::new();
    let mut storages = Vec::new();

    while !bytes.is_empty() {
        if bytes.len() < FRAME_HEADER {
            return Err(CodecError::Truncated("frame header"));
        }
        let tag = bytes[0];
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let payload = bytes
            .get(FRAME_HEADER..FRAME_HEADER + len)
            .ok_or(CodecError::Truncated("frame payload"))?;
        bytes = &bytes[FRAME_HEADER + len..];

        match tag {
            TAG_STATUS => {
                status = Some(match payload {
                    [0] => Status::Exists,
                    [1] => Status::SoftDeleted,
                    [b] => return Err(CodecError::BadStatus(*b)),
                    _ => return Err(CodecError::Truncated("status")),
                });
            }
            TAG_HASH => {
                hash = String::from_utf8(payload.to_vec()).map_err(|_| CodecError::Utf8)?;
            }
            TAG_STORAGE => {
                storages.push(String::from_utf8(payload.to_vec()).map_err(|_| CodecError::Utf8)?);
            }
            other => return Err(CodecError::UnknownTag(other)),
        }
    }

    Ok(Entry {
        storages,
        status: status.ok_or(CodecError::MissingStatus)?,
        hash,
    })
}
