//! The agent side: executes file operations on behalf of remote clients.

pub mod config;
pub mod error;
pub mod executor;
pub mod ops;
pub mod signal;

pub use config::AgentConfig;
pub use error::AgentError;
pub use executor::{Executor, ExecutorHandle};
pub use ops::{LocalFileOps, DEFAULT_MAX_FETCH_BYTES};
pub use signal::wait_for_shutdown_signal;
