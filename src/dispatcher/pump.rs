//! Flow-controlled body delivery state.
//!
//! # Credit protocol
//! The dispatcher reads one chunk at a time into a notional shared buffer
//! and tells the client its extent (`DataAvailable { offset, length }`).
//! The next read for that request happens only after the client
//! acknowledges consumption, so at most one chunk per request is in flight
//! and a buffer region is never reused before its acknowledgement. Excess
//! or late acknowledgements are ignored: the two sides run concurrently and
//! an ACK may race with completion.
//!
//! Download-to-file requests bypass the credit gate: chunks are appended to
//! a temporary file and the client is told how many bytes were written.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::messages::RequestKey;

/// Per-request pump state.
#[derive(Debug)]
pub struct BodyPump {
    /// Capacity of the shared buffer the client reads chunks from.
    capacity: usize,
    /// Next write position in the shared buffer; wraps when a chunk would
    /// not fit.
    cursor: usize,
    /// A `DataAvailable` chunk is outstanding and unacknowledged.
    awaiting_ack: bool,
    /// A `Job::read` returned pending and has not completed yet.
    pub read_in_flight: bool,
    /// Total body bytes delivered to the client so far.
    pub bytes_delivered: u64,
    /// Present for download-to-file requests.
    pub download: Option<DownloadFile>,
}

impl BodyPump {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cursor: 0,
            awaiting_ack: false,
            read_in_flight: false,
            bytes_delivered: 0,
            download: None,
        }
    }

    /// Whether the pump may issue the next `Job::read`.
    pub fn can_read(&self) -> bool {
        !self.awaiting_ack && !self.read_in_flight
    }

    /// Reserve space for a chunk, returning its offset in the shared
    /// buffer. The region stays reserved until [`BodyPump::ack`].
    pub fn place_chunk(&mut self, len: usize) -> usize {
        debug_assert!(len <= self.capacity, "chunk larger than shared buffer");
        if self.cursor + len > self.capacity {
            self.cursor = 0;
        }
        let offset = self.cursor;
        self.cursor += len;
        self.awaiting_ack = true;
        self.bytes_delivered += len as u64;
        offset
    }

    /// Record an acknowledgement. Returns false for an excess or late ACK,
    /// which the dispatcher ignores.
    pub fn ack(&mut self) -> bool {
        if self.awaiting_ack {
            self.awaiting_ack = false;
            true
        } else {
            false
        }
    }

    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    /// Forget the outstanding chunk gate. Used when a record detaches: no
    /// client remains to acknowledge, so draining continues ungated.
    pub fn clear_ack_gate(&mut self) {
        self.awaiting_ack = false;
    }
}

/// Spool file for one download-to-file request.
#[derive(Debug)]
pub struct DownloadFile {
    file: File,
    path: PathBuf,
    /// Total bytes written to the file.
    pub total: u64,
}

impl DownloadFile {
    /// Create a uniquely named spool file under `dir` (the OS temp
    /// directory when `dir` is empty).
    pub fn create(dir: &str, key: RequestKey) -> std::io::Result<Self> {
        let dir = if dir.is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(dir)
        };
        let path = dir.join(format!("loadgate-{}-{}.tmp", key.request.0, uuid::Uuid::new_v4()));
        let file = File::create(&path)?;
        Ok(Self {
            file,
            path,
            total: 0,
        })
    }

    /// Append a chunk, returning the bytes written.
    pub fn append(&mut self, chunk: &[u8]) -> std::io::Result<u64> {
        self.file.write_all(chunk)?;
        self.total += chunk.len() as u64;
        Ok(chunk.len() as u64)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and hand the path over for registration in the capability
    /// table.
    pub fn finish(mut self) -> std::io::Result<PathBuf> {
        self.file.flush()?;
        Ok(self.path)
    }

    /// Best-effort removal for downloads that never completed.
    pub fn discard(self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), %error, "failed to remove abandoned download file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientId, RequestId};

    #[test]
    fn test_single_outstanding_chunk() {
        let mut pump = BodyPump::new(64);
        assert!(pump.can_read());

        let offset = pump.place_chunk(16);
        assert_eq!(offset, 0);
        assert!(!pump.can_read(), "no read while a chunk is unacknowledged");

        assert!(pump.ack());
        assert!(pump.can_read());
        assert_eq!(pump.bytes_delivered, 16);
    }

    #[test]
    fn test_excess_ack_ignored() {
        let mut pump = BodyPump::new(64);
        assert!(!pump.ack(), "ack with nothing outstanding");
        pump.place_chunk(8);
        assert!(pump.ack());
        assert!(!pump.ack(), "duplicate ack");
    }

    #[test]
    fn test_cursor_wraps_when_chunk_does_not_fit() {
        let mut pump = BodyPump::new(32);
        assert_eq!(pump.place_chunk(24), 0);
        pump.ack();
        // 24 + 16 > 32, so the next chunk starts back at offset zero.
        assert_eq!(pump.place_chunk(16), 0);
        pump.ack();
        assert_eq!(pump.place_chunk(16), 16);
    }

    #[test]
    fn test_pending_read_blocks_next_read() {
        let mut pump = BodyPump::new(64);
        pump.read_in_flight = true;
        assert!(!pump.can_read());
        pump.read_in_flight = false;
        assert!(pump.can_read());
    }

    #[test]
    fn test_download_file_append_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let key = RequestKey::new(ClientId(1), RequestId(1));
        let mut download =
            DownloadFile::create(dir.path().to_str().unwrap(), key).unwrap();
        download.append(b"hello ").unwrap();
        download.append(b"world").unwrap();
        assert_eq!(download.total, 11);

        let path = download.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_download_discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = RequestKey::new(ClientId(1), RequestId(2));
        let download = DownloadFile::create(dir.path().to_str().unwrap(), key).unwrap();
        let path = download.path().to_path_buf();
        assert!(path.exists());
        download.discard();
        assert!(!path.exists());
    }
}
