use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("insufficient data: need {need} bytes but only {have} remain")]
    InsufficientData { need: usize, have: usize },
    #[error("invalid enum variant for {enum_name}: {value}")]
    InvalidEnumVariant {
        enum_name: &'static str,
        value: u64,
    },
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
    #[error("data too large: {size} bytes")]
    DataTooLarge { size: usize },
    #[error("{extra} trailing bytes after message")]
    TrailingData { extra: usize },
}

pub trait WireSerialize {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError>;
}

pub trait WireDeserialize: Sized {
    /// Decode from the front of `buf`, advancing it past the consumed bytes.
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError>;
}

/// Encode a complete message.
pub fn to_bytes<T: WireSerialize + ?Sized>(value: &T) -> Result<Bytes, WireError> {
    let mut buf = BytesMut::new();
    value.wire_serialize(&mut buf)?;
    Ok(buf.freeze())
}

/// Decode a complete message; leftover bytes are an error.
pub fn from_bytes<T: WireDeserialize>(mut data: Bytes) -> Result<T, WireError> {
    let value = T::wire_deserialize(&mut data)?;
    if data.has_remaining() {
        return Err(WireError::TrailingData {
            extra: data.remaining(),
        });
    }
    Ok(value)
}

fn ensure(buf: &Bytes, need: usize) -> Result<(), WireError> {
    if buf.remaining() < need {
        return Err(WireError::InsufficientData {
            need,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<(), WireError> {
    let len = u32::try_from(len).map_err(|_| WireError::DataTooLarge { size: len })?;
    buf.put_u32_le(len);
    Ok(())
}

fn take_len_prefixed(buf: &mut Bytes) -> Result<Bytes, WireError> {
    let len = u32::wire_deserialize(buf)? as usize;
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

macro_rules! impl_wire_for_int {
    ($ty:ty, $put:ident, $get:ident) => {
        impl WireSerialize for $ty {
            fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
                buf.$put(*self);
                Ok(())
            }
        }

        impl WireDeserialize for $ty {
            fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
                ensure(buf, std::mem::size_of::<$ty>())?;
                Ok(buf.$get())
            }
        }
    };
}

impl_wire_for_int!(u8, put_u8, get_u8);
impl_wire_for_int!(u16, put_u16_le, get_u16_le);
impl_wire_for_int!(u32, put_u32_le, get_u32_le);
impl_wire_for_int!(u64, put_u64_le, get_u64_le);
impl_wire_for_int!(i32, put_i32_le, get_i32_le);
impl_wire_for_int!(i64, put_i64_le, get_i64_le);

impl WireSerialize for bool {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u8(u8::from(*self));
        Ok(())
    }
}

impl WireDeserialize for bool {
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        match u8::wire_deserialize(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(WireError::InvalidEnumVariant {
                enum_name: "bool",
                value: v as u64,
            }),
        }
    }
}

// Strings and byte blobs: u32 length prefix, then the raw bytes.

impl WireSerialize for str {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_len(buf, self.len())?;
        buf.put_slice(self.as_bytes());
        Ok(())
    }
}

impl WireSerialize for String {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.as_str().wire_serialize(buf)
    }
}

impl WireDeserialize for String {
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        let raw = take_len_prefixed(buf)?;
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

impl WireSerialize for Bytes {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_len(buf, self.len())?;
        buf.put_slice(self);
        Ok(())
    }
}

impl WireDeserialize for Bytes {
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        take_len_prefixed(buf)
    }
}

impl<T: WireSerialize> WireSerialize for Option<T> {
    fn wire_serialize(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            Some(v) => {
                buf.put_u8(1);
                v.wire_serialize(buf)
            }
            None => {
                buf.put_u8(0);
                Ok(())
            }
        }
    }
}

impl<T: WireDeserialize> WireDeserialize for Option<T> {
    fn wire_deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        if bool::wire_deserialize(buf)? {
            Ok(Some(T::wire_deserialize(buf)?))
        } else {
            Ok(None)
        }
    }
}

/// Implement both codec traits for a struct by encoding the listed fields in
/// order.
///
/// ```ignore
/// wire_struct!(FetchReq { path });
/// ```
#[macro_export]
macro_rules! wire_struct {
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl $crate::WireSerialize for $name {
            #[allow(unused_variables)]
            fn wire_serialize(&self, buf: &mut $crate::bytes::BytesMut) -> Result<(), $crate::WireError> {
                $( $crate::WireSerialize::wire_serialize(&self.$field, buf)?; )*
                Ok(())
            }
        }

        impl $crate::WireDeserialize for $name {
            #[allow(unused_variables)]
            fn wire_deserialize(buf: &mut $crate::bytes::Bytes) -> Result<Self, $crate::WireError> {
                Ok(Self {
                    $( $field: $crate::WireDeserialize::wire_deserialize(buf)?, )*
                })
            }
        }
    };
}
