mod wire;

pub use bytes;
pub use wire::{from_bytes, to_bytes, WireDeserialize, WireError, WireSerialize};
