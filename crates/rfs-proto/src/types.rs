use bytes::{Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rfs_serde::{WireDeserialize, WireError, WireSerialize};
use serde::{Deserialize, Serialize};

/// Tag identifying the variant carried by an envelope.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum PayloadType {
    Fetch = 1,
    Open = 2,
    Create = 3,
    Remove = 4,
    Rename = 5,
    Close = 6,
    Truncate = 7,

    FileData = 100,
    Ok = 101,
    Error = 102,
}

impl PayloadType {
    pub fn is_request(self) -> bool {
        (self as u32) < 100
    }
}

impl WireSerialize for PayloadType {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        u32::from(*self).wire_serialize(buf)
    }
}

impl WireDeserialize for PayloadType {
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        let raw = u32::wire_deserialize(buf)?;
        PayloadType::try_from(raw).map_err(|_| WireError::InvalidEnumVariant {
            enum_name: "PayloadType",
            value: raw as u64,
        })
    }
}

/// POSIX-style open flags (Linux bit values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const ACCESS_MODE: u32 = 0o3;
    pub const RDONLY: u32 = 0o0;
    pub const WRONLY: u32 = 0o1;
    pub const RDWR: u32 = 0o2;
    pub const CREATE: u32 = 0o100;
    pub const TRUNCATE: u32 = 0o1000;
    pub const APPEND: u32 = 0o2000;

    pub fn read_only() -> Self {
        Self(Self::RDONLY)
    }

    pub fn read_write() -> Self {
        Self(Self::RDWR)
    }

    pub fn contains(&self, bits: u32) -> bool {
        (self.0 & bits) == bits
    }

    pub fn readable(&self) -> bool {
        matches!(self.0 & Self::ACCESS_MODE, Self::RDONLY | Self::RDWR)
    }

    pub fn writable(&self) -> bool {
        matches!(self.0 & Self::ACCESS_MODE, Self::WRONLY | Self::RDWR)
    }

    /// Equivalent `std::fs::OpenOptions`.
    pub fn open_options(&self) -> std::fs::OpenOptions {
        let mut opts = std::fs::OpenOptions::new();
        let append = self.contains(Self::APPEND);
        opts.read(self.readable())
            .write(self.writable() && !append)
            .append(append)
            .create(self.contains(Self::CREATE))
            .truncate(self.contains(Self::TRUNCATE) && self.writable() && !append);
        opts
    }
}

impl WireSerialize for OpenFlags {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.0.wire_serialize(buf)
    }
}

impl WireDeserialize for OpenFlags {
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(Self(u32::wire_deserialize(buf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_tags() {
        assert_eq!(u32::from(PayloadType::Fetch), 1);
        assert_eq!(u32::from(PayloadType::Error), 102);
        assert!(PayloadType::Truncate.is_request());
        assert!(!PayloadType::Ok.is_request());
    }

    #[test]
    fn test_payload_type_unknown_tag() {
        let err = rfs_serde::from_bytes::<PayloadType>(Bytes::from_static(&[9, 0, 0, 0])).unwrap_err();
        assert!(matches!(
            err,
            WireError::InvalidEnumVariant { enum_name: "PayloadType", value: 9 }
        ));
    }

    #[test]
    fn test_open_flags_access_mode() {
        assert!(OpenFlags::read_only().readable());
        assert!(!OpenFlags::read_only().writable());
        assert!(OpenFlags(OpenFlags::WRONLY).writable());
        assert!(!OpenFlags(OpenFlags::WRONLY).readable());
        let rw = OpenFlags(OpenFlags::RDWR | OpenFlags::CREATE);
        assert!(rw.readable() && rw.writable());
        assert!(rw.contains(OpenFlags::CREATE));
        assert!(!rw.contains(OpenFlags::TRUNCATE));
    }
}
