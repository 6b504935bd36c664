use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Newtype over a `u64` id. Serializes as the bare number and debug-prints
/// as `Name(n)`.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = u64;

            fn deref(&self) -> &u64 {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }
    };
}

id_type!(
    /// Client-visible descriptor for one open local cache file. Never reused.
    Fd
);
id_type!(
    /// Correlation id of one request/reply round trip.
    RequestId
);
id_type!(
    /// Name of a file under the cache root.
    CacheFileId
);

/// Process-wide monotonically increasing id source.
///
/// Values start at 1 and are never handed out twice, even if the caller
/// discards them.
pub struct IdAllocator<T> {
    next: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: From<u64>> IdAllocator<T> {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
            _marker: PhantomData,
        }
    }

    pub fn allocate(&self) -> T {
        T::from(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The value the next `allocate` call will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl<T: From<u64>> Default for IdAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_fd_display() {
        let fd = Fd(12);
        assert_eq!(fd.to_string(), "12");
        assert_eq!(format!("{:?}", fd), "Fd(12)");
    }

    #[test]
    fn test_id_conversions() {
        let id: CacheFileId = 9u64.into();
        assert_eq!(*id, 9);
        assert_eq!(id.get(), 9);
        assert_eq!(u64::from(id), 9);
        assert!(CacheFileId(1) < CacheFileId(2));
    }

    #[test]
    fn test_id_serde_is_bare_number() {
        assert_eq!(serde_json::to_string(&RequestId(42)).unwrap(), "42");
        assert_eq!(serde_json::from_str::<RequestId>("42").unwrap(), RequestId(42));
    }

    #[test]
    fn test_allocator_monotonic() {
        let alloc: IdAllocator<Fd> = IdAllocator::new();
        assert_eq!(alloc.allocate(), Fd(1));
        assert_eq!(alloc.allocate(), Fd(2));
        assert_eq!(alloc.peek(), 3);
    }

    #[test]
    fn test_allocator_unique_across_threads() {
        let alloc = Arc::new(IdAllocator::<RequestId>::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || (0..1000).map(|_| alloc.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
