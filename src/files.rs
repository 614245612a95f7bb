//! Capability table for temporary download files.
//!
//! Download-to-file responses are spooled into temporary files the client
//! later opens by path. Each registration is reference counted: the
//! registration itself holds one reference, and derived holders (e.g. a blob
//! built from the download) take more via [`TempFileTable::retain`]. The
//! backing file is deleted once every reference is released.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::messages::RequestKey;

#[derive(Debug)]
struct TempFileEntry {
    path: PathBuf,
    refs: usize,
}

/// Reference-counted registry of temporary download files.
#[derive(Debug, Default)]
pub struct TempFileTable {
    entries: HashMap<RequestKey, TempFileEntry>,
}

impl TempFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a finished download with an initial reference count of one.
    pub fn register(&mut self, key: RequestKey, path: PathBuf) {
        let previous = self.entries.insert(key, TempFileEntry { path, refs: 1 });
        debug_assert!(previous.is_none(), "download registered twice for {key}");
    }

    /// Take an additional reference to a registered file.
    pub fn retain(&mut self, key: RequestKey) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one reference; deletes the file when the count reaches zero.
    pub fn release(&mut self, key: RequestKey) {
        let Some(entry) = self.entries.get_mut(&key) else {
            tracing::trace!(%key, "release for unregistered download ignored");
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            let entry = self.entries.remove(&key).expect("entry checked above");
            if let Err(error) = std::fs::remove_file(&entry.path) {
                tracing::warn!(%key, path = %entry.path.display(), %error, "failed to delete download file");
            } else {
                tracing::debug!(%key, path = %entry.path.display(), "download file deleted");
            }
        }
    }

    pub fn path(&self, key: RequestKey) -> Option<&Path> {
        self.entries.get(&key).map(|e| e.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientId, RequestId};

    fn key(n: u64) -> RequestKey {
        RequestKey::new(ClientId(1), RequestId(n))
    }

    fn make_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"payload").unwrap();
        path
    }

    #[test]
    fn test_release_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_file(dir.path(), "a");
        let mut table = TempFileTable::new();
        table.register(key(1), path.clone());

        table.release(key(1));
        assert!(!path.exists());
        assert!(table.is_empty());
    }

    #[test]
    fn test_retained_file_survives_first_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_file(dir.path(), "b");
        let mut table = TempFileTable::new();
        table.register(key(2), path.clone());
        assert!(table.retain(key(2)));

        table.release(key(2));
        assert!(path.exists(), "file must survive while a holder remains");

        table.release(key(2));
        assert!(!path.exists());
    }

    #[test]
    fn test_release_unknown_key_is_ignored() {
        let mut table = TempFileTable::new();
        table.release(key(3));
        assert!(!table.retain(key(3)));
    }
}
