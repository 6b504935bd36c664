use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use tokio::sync::{Mutex, MutexGuard};

/// A fixed set of async mutexes addressed by key hash.
///
/// Two holders of the same key never run concurrently. Distinct keys that
/// land in the same bucket are serialized too; that contention is the price
/// of a bounded lock count.
pub struct KeyedMutex {
    buckets: Vec<Mutex<()>>,
}

/// Held lock for one bucket. Released on drop, including on early return
/// and panic unwinding.
#[must_use = "the bucket is unlocked as soon as the guard is dropped"]
pub struct KeyedMutexGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    bucket: usize,
}

impl KeyedMutexGuard<'_> {
    pub fn bucket(&self) -> usize {
        self.bucket
    }
}

impl KeyedMutex {
    pub const DEFAULT_BUCKETS: usize = 1024;

    /// `buckets` is clamped to at least one.
    pub fn new(buckets: usize) -> Self {
        let buckets = (0..buckets.max(1)).map(|_| Mutex::new(())).collect();
        Self { buckets }
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % self.buckets.len() as u64) as usize
    }

    pub async fn lock<K: Hash + ?Sized>(&self, key: &K) -> KeyedMutexGuard<'_> {
        let bucket = self.bucket_of(key);
        KeyedMutexGuard {
            _guard: self.buckets[bucket].lock().await,
            bucket,
        }
    }

    /// Non-blocking variant; `None` if the bucket is held.
    pub fn try_lock<K: Hash + ?Sized>(&self, key: &K) -> Option<KeyedMutexGuard<'_>> {
        let bucket = self.bucket_of(key);
        self.buckets[bucket]
            .try_lock()
            .ok()
            .map(|guard| KeyedMutexGuard {
                _guard: guard,
                bucket,
            })
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUCKETS)
    }
}
