//! The append-only persistence log.
//!
//! Every successful mutating request is appended to a flat file as its
//! exact wire bytes — the record format *is* the protocol encoding, so the
//! file is just requests back to back with no header, checksums, or
//! separators. At startup the file is read once from the beginning and each
//! record is re-executed through the same command table that serves live
//! traffic; replay never appends, so a record is written exactly once.
//!
//! Appends land in the OS immediately but are not durable until the next
//! fsync; the [`sync`](super::sync) task performs one per second, bounding
//! crash loss to one interval.
//!
//! The file handle is guarded by one mutex, held for the duration of an
//! append, a sync, or the startup replay — never across network I/O.

use crate::protocol::{DecodeError, Decoder, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

/// Errors from the persistence log.
#[derive(Debug, Error)]
pub enum AofError {
    /// Opening, appending, or syncing the file failed.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log contains bytes that do not decode as a request. A corrupt
    /// log (beyond a truncated tail) is fatal to startup.
    #[error("log is corrupt: {0}")]
    Corrupt(#[from] DecodeError),
}

/// The append-only log of mutating requests.
///
/// Wrap in an `Arc`: connection tasks append, the sync task flushes, and
/// `main` replays at startup, all through the same handle.
#[derive(Debug)]
pub struct AofLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AofLog {
    /// Opens the log at `path`, creating it when absent. The handle is in
    /// append mode for the rest of the process lifetime.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AofError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Appends one request's wire bytes. Synchronous for the caller, but
    /// durable only after the next sync.
    pub fn append(&self, request: &Value) -> Result<(), AofError> {
        let bytes = request.encode();
        let mut file = self.file.lock().unwrap();
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Flushes the file to stable storage.
    pub fn sync(&self) -> Result<(), AofError> {
        let file = self.file.lock().unwrap();
        file.sync_data()?;
        Ok(())
    }

    /// Final sync on the shutdown path. The handle itself closes when the
    /// log is dropped.
    pub fn close(&self) -> Result<(), AofError> {
        self.sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays the log from the beginning, invoking `apply` for each
    /// decoded request in file order. Returns the number of records seen.
    ///
    /// A truncated final record — the tail of a crash mid-append — is
    /// logged and treated as the end of useful data. Anything else that
    /// fails to decode is corruption and an error.
    pub fn replay(&self, mut apply: impl FnMut(Value)) -> Result<usize, AofError> {
        let _guard = self.file.lock().unwrap();
        let data = std::fs::read(&self.path)?;

        let mut decoder = Decoder::new();
        let mut offset = 0;
        let mut records = 0;

        while offset < data.len() {
            match decoder.decode(&data[offset..])? {
                Some((request, consumed)) => {
                    apply(request);
                    offset += consumed;
                    records += 1;
                }
                None => {
                    warn!(
                        path = %self.path.display(),
                        offset = offset,
                        trailing = data.len() - offset,
                        "truncated record at end of log, stopping replay"
                    );
                    break;
                }
            }
        }

        Ok(records)
    }
}
