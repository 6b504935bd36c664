#[allow(non_snake_case)]
pub mod status_code;

pub mod status;
pub mod result;

pub mod ids;
pub mod remote_path;

pub use ids::*;
pub use remote_path::{RemotePath, RemotePathParseError};
pub use result::{make_error_msg, Result};
pub use status::Status;
pub use status_code::*;
