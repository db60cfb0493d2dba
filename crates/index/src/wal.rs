//! Index log: the durable half of the index.
//!
//! Frames are `[crc32 LE][len LE][JSON IndexRecord]\n`. Opening the log
//! replays the longest valid prefix and cuts anything after it, so frames
//! appended later never sit behind a torn one. [`Wal::rewrite`] replaces
//! the whole history with one frame per live row.

use crate::record::IndexRecord;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("index log I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("index log record error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// When appended frames reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every frame.
    Always,
    /// Fsync on [`Wal::sync`] only.
    Batch,
    /// Leave it to the OS.
    None,
}

impl FsyncPolicy {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

const HEADER_LEN: u64 = 8;
/// Rows are a key plus a short storage list; anything larger is garbage.
const MAX_PAYLOAD: usize = 16 << 20;

fn frame(record: &IndexRecord) -> Result<Vec<u8>, WalError> {
    let payload = serde_json::to_vec(record)?;
    let mut buf = Vec::with_capacity(payload.len() + HEADER_LEN as usize + 1);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.push(b'\n');
    Ok(buf)
}

enum Frame {
    Record(IndexRecord, u64),
    End,
    Torn(&'static str),
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn next_frame(reader: &mut impl Read) -> Result<Frame, WalError> {
    let mut header = [0u8; HEADER_LEN as usize];
    if !fill(reader, &mut header[..1])? {
        return Ok(Frame::End);
    }
    if !fill(reader, &mut header[1..])? {
        return Ok(Frame::Torn("header"));
    }
    let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_PAYLOAD {
        return Ok(Frame::Torn("length"));
    }

    let mut payload = vec![0u8; len + 1];
    if !fill(reader, &mut payload)? {
        return Ok(Frame::Torn("payload"));
    }
    if payload.pop() != Some(b'\n') {
        return Ok(Frame::Torn("terminator"));
    }
    if crc32fast::hash(&payload) != crc {
        return Ok(Frame::Torn("checksum"));
    }
    match serde_json::from_slice(&payload) {
        Ok(record) => Ok(Frame::Record(record, HEADER_LEN + len as u64 + 1)),
        Err(_) => Ok(Frame::Torn("record")),
    }
}

/// The valid prefix of a log file.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<IndexRecord>,
    /// Byte length of the valid prefix.
    pub valid_len: u64,
}

impl Replay {
    /// Read every valid frame of `path`. A missing file is an empty log.
    pub fn read(path: &Path) -> Result<Self, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Self::default();
        loop {
            match next_frame(&mut reader)? {
                Frame::Record(record, len) => {
                    replay.records.push(record);
                    replay.valid_len += len;
                }
                Frame::End => break,
                Frame::Torn(part) => {
                    tracing::warn!(
                        "index log {:?}: bad {} after {} frames, dropping the tail",
                        path,
                        part,
                        replay.records.len()
                    );
                    break;
                }
            }
        }
        Ok(replay)
    }
}

/// The append side of the index log.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
    fsync: FsyncPolicy,
    frames: u64,
}

impl Wal {
    /// Open the log at `path`, returning it with the records it holds.
    /// Bytes past the last valid frame are truncated away.
    pub fn open(path: &Path, fsync: FsyncPolicy) -> Result<(Self, Vec<IndexRecord>), WalError> {
        let replay = Replay::read(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > replay.valid_len {
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            fsync,
            frames: replay.records.len() as u64,
        };
        Ok((wal, replay.records))
    }

    /// Append one record as a single write.
    pub fn append(&mut self, record: &IndexRecord) -> Result<(), WalError> {
        self.file.write_all(&frame(record)?)?;
        if self.fsync == FsyncPolicy::Always {
            self.file.sync_data()?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Frames currently in the file, live or superseded.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Replace the log with exactly `records`.
    ///
    /// The new log is written and fsynced beside the old one, then renamed
    /// over it; a crash at any point leaves one complete log on disk.
    pub fn rewrite(
        &mut self,
        records: impl IntoIterator<Item = IndexRecord>,
    ) -> Result<(), WalError> {
        let tmp = self.path.with_extension("wal.compact");
        let mut frames = 0u64;
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for record in records {
                out.write_all(&frame(&record)?)?;
                frames += 1;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            File::open(dir)?.sync_all()?;
        }

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        tracing::debug!(
            "index log {:?} rewritten: {} -> {} frames",
            self.path,
            self.frames,
            frames
        );
        self.frames = frames;
        Ok(())
    }

    /// Fsync appended frames (for batch mode).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_data()?;
        Ok(())
    }
}
