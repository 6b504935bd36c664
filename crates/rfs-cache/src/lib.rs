//! Client-side disk cache of remote files.
//!
//! [`DiskCacheManager`] is the entry point for every file operation the
//! filesystem layer performs. It keeps the agent authoritative: each
//! mutation goes to the agent first and the local cache follows. Whole files
//! are fetched on first open and served locally from then on.

pub mod caller;
pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod manager;
pub mod open_files;

pub use caller::RemoteCaller;
pub use config::{CacheConfig, ClientConfig};
pub use context::ClientContext;
pub use error::{CacheError, CacheResult};
pub use index::CacheIndex;
pub use manager::{CacheStats, DiskCacheManager};
pub use open_files::{OpenFile, OpenFileTable};
