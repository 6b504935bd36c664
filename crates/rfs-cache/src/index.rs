use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rfs_types::CacheFileId;

/// Maps cache keys to cache files and tracks how many bytes they hold.
///
/// A key present here always has a file under the cache root. Sizes are
/// tracked per file, so a file keeps its size across renames.
#[derive(Default)]
pub struct CacheIndex {
    keys: DashMap<String, CacheFileId>,
    sizes: DashMap<CacheFileId, u64>,
    total: AtomicU64,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<CacheFileId> {
        self.keys.get(key).map(|entry| *entry.value())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn size_of(&self, id: CacheFileId) -> Option<u64> {
        self.sizes.get(&id).map(|entry| *entry.value())
    }

    /// Point `key` at `id`. Returns the file it pointed at before.
    pub fn insert(&self, key: String, id: CacheFileId, size: u64) -> Option<CacheFileId> {
        self.track(id, size);
        let old = self.keys.insert(key, id);
        if let Some(old) = old {
            self.untrack(old);
        }
        old
    }

    pub fn remove(&self, key: &str) -> Option<CacheFileId> {
        let (_, id) = self.keys.remove(key)?;
        self.untrack(id);
        Some(id)
    }

    /// Move the entry of `from` to `to`.
    ///
    /// Returns the file that `to` pointed at before, which is no longer
    /// reachable. If `from` was not cached, any entry for `to` is dropped as
    /// well, since the remote file behind it has been replaced.
    pub fn rename(&self, from: &str, to: String) -> Option<CacheFileId> {
        let replaced = match self.keys.remove(from) {
            Some((_, id)) => self.keys.insert(to, id),
            None => self.keys.remove(&to).map(|(_, id)| id),
        };
        if let Some(old) = replaced {
            self.untrack(old);
        }
        replaced
    }

    /// Record a new size for a tracked file. Untracked files are ignored.
    pub fn resize(&self, id: CacheFileId, size: u64) {
        if let Some(mut entry) = self.sizes.get_mut(&id) {
            let old = std::mem::replace(entry.value_mut(), size);
            if size >= old {
                self.total.fetch_add(size - old, Ordering::Relaxed);
            } else {
                self.total.fetch_sub(old - size, Ordering::Relaxed);
            }
        }
    }

    /// Raise the recorded size of `id` to at least `end`.
    pub fn grow(&self, id: CacheFileId, end: u64) {
        if let Some(mut entry) = self.sizes.get_mut(&id) {
            if end > *entry.value() {
                let old = std::mem::replace(entry.value_mut(), end);
                self.total.fetch_add(end - old, Ordering::Relaxed);
            }
        }
    }

    fn track(&self, id: CacheFileId, size: u64) {
        self.sizes.insert(id, size);
        self.total.fetch_add(size, Ordering::Relaxed);
    }

    fn untrack(&self, id: CacheFileId) {
        if let Some((_, size)) = self.sizes.remove(&id) {
            self.total.fetch_sub(size, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replace_accounts_bytes() {
        let index = CacheIndex::new();
        assert_eq!(index.insert("k".into(), CacheFileId(1), 100), None);
        assert_eq!(index.total_bytes(), 100);
        assert_eq!(index.insert("k".into(), CacheFileId(2), 40), Some(CacheFileId(1)));
        assert_eq!(index.total_bytes(), 40);
        assert_eq!(index.get("k"), Some(CacheFileId(2)));
        assert_eq!(index.size_of(CacheFileId(1)), None);
    }

    #[test]
    fn test_remove() {
        let index = CacheIndex::new();
        index.insert("k".into(), CacheFileId(1), 10);
        assert_eq!(index.remove("k"), Some(CacheFileId(1)));
        assert_eq!(index.remove("k"), None);
        assert!(index.is_empty());
        assert_eq!(index.total_bytes(), 0);
    }

    #[test]
    fn test_rename_moves_entry() {
        let index = CacheIndex::new();
        index.insert("a".into(), CacheFileId(1), 10);
        assert_eq!(index.rename("a", "b".into()), None);
        assert!(!index.contains("a"));
        assert_eq!(index.get("b"), Some(CacheFileId(1)));
        assert_eq!(index.total_bytes(), 10);
    }

    #[test]
    fn test_rename_onto_cached_destination() {
        let index = CacheIndex::new();
        index.insert("a".into(), CacheFileId(1), 10);
        index.insert("b".into(), CacheFileId(2), 20);
        assert_eq!(index.rename("a", "b".into()), Some(CacheFileId(2)));
        assert_eq!(index.get("b"), Some(CacheFileId(1)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.total_bytes(), 10);
    }

    #[test]
    fn test_rename_uncached_source_drops_destination() {
        let index = CacheIndex::new();
        index.insert("b".into(), CacheFileId(2), 20);
        assert_eq!(index.rename("a", "b".into()), Some(CacheFileId(2)));
        assert!(index.is_empty());
        assert_eq!(index.total_bytes(), 0);
    }

    #[test]
    fn test_resize_and_grow() {
        let index = CacheIndex::new();
        index.insert("a".into(), CacheFileId(1), 10);
        index.resize(CacheFileId(1), 4);
        assert_eq!(index.total_bytes(), 4);
        index.grow(CacheFileId(1), 3);
        assert_eq!(index.total_bytes(), 4);
        index.grow(CacheFileId(1), 12);
        assert_eq!(index.total_bytes(), 12);
        index.resize(CacheFileId(99), 1000);
        assert_eq!(index.total_bytes(), 12);
    }
}
