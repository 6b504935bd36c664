//! Wire protocol between the client-side cache manager and the agent.
//!
//! Every message is an envelope `{id, payload_type, payload}`. Requests carry
//! one of the file operations the agent executes; replies carry file data, a
//! bare acknowledgement, or an error status.

pub mod envelope;
pub mod types;

pub use envelope::{
    CloseReq, CreateReq, ErrorRsp, FetchReq, FileDataRsp, OpenReq, RemoveReq, RenameReq, Reply,
    ReplyPayload, Request, RequestPayload, TruncateReq, FILE_DATA_REPLY_OVERHEAD,
};
pub use types::{OpenFlags, PayloadType};
