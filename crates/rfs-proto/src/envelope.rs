use bytes::{Bytes, BytesMut};
use rfs_serde::{wire_struct, WireDeserialize, WireError, WireSerialize};
use rfs_types::{RequestId, Status};

use crate::types::{OpenFlags, PayloadType};

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Read the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReq {
    pub path: String,
}

/// Validate that the file can be opened with `flags`; the agent pins a handle
/// under the client's descriptor until the matching close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReq {
    pub path: String,
    pub flags: OpenFlags,
    pub fd: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReq {
    pub dir: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveReq {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameReq {
    pub path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReq {
    pub path: String,
    pub fd: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncateReq {
    pub path: String,
    pub size: u64,
}

wire_struct!(FetchReq { path });
wire_struct!(OpenReq { path, flags, fd });
wire_struct!(CreateReq { dir, name });
wire_struct!(RemoveReq { path });
wire_struct!(RenameReq { path, new_path });
wire_struct!(CloseReq { path, fd });
wire_struct!(TruncateReq { path, size });

// ---------------------------------------------------------------------------
// Reply bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDataRsp {
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRsp {
    pub code: u16,
    pub message: String,
}

wire_struct!(FileDataRsp { data });
wire_struct!(ErrorRsp { code, message });

impl From<&Status> for ErrorRsp {
    fn from(status: &Status) -> Self {
        Self {
            code: status.code(),
            message: status.message().unwrap_or_default().to_string(),
        }
    }
}

impl From<ErrorRsp> for Status {
    fn from(rsp: ErrorRsp) -> Self {
        if rsp.message.is_empty() {
            Status::new(rsp.code)
        } else {
            Status::with_message(rsp.code, rsp.message)
        }
    }
}

// ---------------------------------------------------------------------------
// Payload variants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    Fetch(FetchReq),
    Open(OpenReq),
    Create(CreateReq),
    Remove(RemoveReq),
    Rename(RenameReq),
    Close(CloseReq),
    Truncate(TruncateReq),
}

impl RequestPayload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            RequestPayload::Fetch(_) => PayloadType::Fetch,
            RequestPayload::Open(_) => PayloadType::Open,
            RequestPayload::Create(_) => PayloadType::Create,
            RequestPayload::Remove(_) => PayloadType::Remove,
            RequestPayload::Rename(_) => PayloadType::Rename,
            RequestPayload::Close(_) => PayloadType::Close,
            RequestPayload::Truncate(_) => PayloadType::Truncate,
        }
    }

    /// The remote path the operation targets (the directory for `Create`).
    pub fn path(&self) -> &str {
        match self {
            RequestPayload::Fetch(r) => &r.path,
            RequestPayload::Open(r) => &r.path,
            RequestPayload::Create(r) => &r.dir,
            RequestPayload::Remove(r) => &r.path,
            RequestPayload::Rename(r) => &r.path,
            RequestPayload::Close(r) => &r.path,
            RequestPayload::Truncate(r) => &r.path,
        }
    }

    fn serialize_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            RequestPayload::Fetch(r) => r.wire_serialize(buf),
            RequestPayload::Open(r) => r.wire_serialize(buf),
            RequestPayload::Create(r) => r.wire_serialize(buf),
            RequestPayload::Remove(r) => r.wire_serialize(buf),
            RequestPayload::Rename(r) => r.wire_serialize(buf),
            RequestPayload::Close(r) => r.wire_serialize(buf),
            RequestPayload::Truncate(r) => r.wire_serialize(buf),
        }
    }

    fn deserialize_body(ty: PayloadType, buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(match ty {
            PayloadType::Fetch => RequestPayload::Fetch(FetchReq::wire_deserialize(buf)?),
            PayloadType::Open => RequestPayload::Open(OpenReq::wire_deserialize(buf)?),
            PayloadType::Create => RequestPayload::Create(CreateReq::wire_deserialize(buf)?),
            PayloadType::Remove => RequestPayload::Remove(RemoveReq::wire_deserialize(buf)?),
            PayloadType::Rename => RequestPayload::Rename(RenameReq::wire_deserialize(buf)?),
            PayloadType::Close => RequestPayload::Close(CloseReq::wire_deserialize(buf)?),
            PayloadType::Truncate => RequestPayload::Truncate(TruncateReq::wire_deserialize(buf)?),
            other => {
                return Err(WireError::InvalidEnumVariant {
                    enum_name: "RequestPayload",
                    value: u32::from(other) as u64,
                })
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPayload {
    FileData(FileDataRsp),
    Ok,
    Error(ErrorRsp),
}

impl ReplyPayload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            ReplyPayload::FileData(_) => PayloadType::FileData,
            ReplyPayload::Ok => PayloadType::Ok,
            ReplyPayload::Error(_) => PayloadType::Error,
        }
    }

    pub fn error(status: &Status) -> Self {
        ReplyPayload::Error(ErrorRsp::from(status))
    }

    pub fn file_data(data: Bytes) -> Self {
        ReplyPayload::FileData(FileDataRsp { data })
    }

    /// Split an error-typed reply out into a `Status`.
    pub fn into_result(self) -> Result<ReplyPayload, Status> {
        match self {
            ReplyPayload::Error(rsp) => Err(rsp.into()),
            other => Ok(other),
        }
    }

    fn serialize_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            ReplyPayload::FileData(r) => r.wire_serialize(buf),
            ReplyPayload::Ok => Ok(()),
            ReplyPayload::Error(r) => r.wire_serialize(buf),
        }
    }

    fn deserialize_body(ty: PayloadType, buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(match ty {
            PayloadType::FileData => ReplyPayload::FileData(FileDataRsp::wire_deserialize(buf)?),
            PayloadType::Ok => ReplyPayload::Ok,
            PayloadType::Error => ReplyPayload::Error(ErrorRsp::wire_deserialize(buf)?),
            other => {
                return Err(WireError::InvalidEnumVariant {
                    enum_name: "ReplyPayload",
                    value: u32::from(other) as u64,
                })
            }
        })
    }
}

impl From<Result<ReplyPayload, Status>> for ReplyPayload {
    fn from(result: Result<ReplyPayload, Status>) -> Self {
        match result {
            Ok(payload) => payload,
            Err(status) => ReplyPayload::error(&status),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Encoded size of a file-data reply minus its data: id, payload type and the
/// data length prefix.
pub const FILE_DATA_REPLY_OVERHEAD: usize = 8 + 4 + 4;

/// `[id: u64][payload_type: u32][body]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub payload: RequestPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub id: RequestId,
    pub payload: ReplyPayload,
}

impl Request {
    pub fn new(id: RequestId, payload: RequestPayload) -> Self {
        Self { id, payload }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        rfs_serde::to_bytes(self)
    }

    pub fn decode(data: Bytes) -> Result<Self, WireError> {
        rfs_serde::from_bytes(data)
    }
}

impl Reply {
    pub fn new(id: RequestId, payload: ReplyPayload) -> Self {
        Self { id, payload }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        rfs_serde::to_bytes(self)
    }

    pub fn decode(data: Bytes) -> Result<Self, WireError> {
        rfs_serde::from_bytes(data)
    }
}

impl WireSerialize for Request {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.id.0.wire_serialize(buf)?;
        self.payload.payload_type().wire_serialize(buf)?;
        self.payload.serialize_body(buf)
    }
}

impl WireDeserialize for Request {
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        let id = RequestId(u64::wire_deserialize(buf)?);
        let ty = PayloadType::wire_deserialize(buf)?;
        let payload = RequestPayload::deserialize_body(ty, buf)?;
        Ok(Self { id, payload })
    }
}

impl WireSerialize for Reply {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.id.0.wire_serialize(buf)?;
        self.payload.payload_type().wire_serialize(buf)?;
        self.payload.serialize_body(buf)
    }
}

impl WireDeserialize for Reply {
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        let id = RequestId(u64::wire_deserialize(buf)?);
        let ty = PayloadType::wire_deserialize(buf)?;
        let payload = ReplyPayload::deserialize_body(ty, buf)?;
        Ok(Self { id, payload })
    }
}
