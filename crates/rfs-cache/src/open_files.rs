use std::sync::Arc;

use dashmap::DashMap;
use rfs_types::{CacheFileId, Fd};
use tokio::sync::Mutex;

/// A local cache file opened on behalf of one descriptor.
pub struct OpenFile {
    /// Cache key at open time. Renames do not update it.
    pub key: String,
    pub file_id: CacheFileId,
    pub file: Mutex<tokio::fs::File>,
}

/// Descriptor table. Descriptors come from a monotonically increasing
/// counter and are never reused.
#[derive(Default)]
pub struct OpenFileTable {
    files: DashMap<Fd, Arc<OpenFile>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, fd: Fd, file: OpenFile) {
        self.files.insert(fd, Arc::new(file));
    }

    pub fn get(&self, fd: Fd) -> Option<Arc<OpenFile>> {
        self.files.get(&fd).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, fd: Fd) -> Option<Arc<OpenFile>> {
        self.files.remove(&fd).map(|(_, file)| file)
    }

    pub fn contains(&self, fd: Fd) -> bool {
        self.files.contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
