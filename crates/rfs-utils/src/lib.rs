pub mod keyed_mutex;
pub mod path_utils;

pub use keyed_mutex::{KeyedMutex, KeyedMutexGuard};
pub use path_utils::{resolve_under, PathEscape};
