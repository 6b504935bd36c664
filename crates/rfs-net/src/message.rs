use crate::error::NetError;

pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Low byte of every frame checksum.
pub const FRAME_MAGIC: u8 = 0x86;

/// Upper bound on a single frame payload (512 MiB).
pub const MESSAGE_MAX_SIZE: usize = 512 * 1024 * 1024;

/// Header in front of every frame: `[checksum: u32 LE][size: u32 LE]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub checksum: u32,
    pub size: u32,
}

impl MessageHeader {
    pub fn for_payload(payload: &[u8]) -> Result<Self, NetError> {
        let size = u32::try_from(payload.len())
            .ok()
            .filter(|size| *size as usize <= MESSAGE_MAX_SIZE)
            .ok_or(NetError::MessageTooLarge {
                size: payload.len(),
                max: MESSAGE_MAX_SIZE,
            })?;
        Ok(Self {
            checksum: frame_checksum(payload),
            size,
        })
    }

    pub fn has_magic(&self) -> bool {
        (self.checksum & 0xFF) as u8 == FRAME_MAGIC
    }

    pub fn from_bytes(data: &[u8; MESSAGE_HEADER_SIZE]) -> Self {
        let (checksum, size) = data.split_at(4);
        Self {
            checksum: u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]),
            size: u32::from_le_bytes([size[0], size[1], size[2], size[3]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut buf = [0u8; MESSAGE_HEADER_SIZE];
        buf[..4].copy_from_slice(&self.checksum.to_le_bytes());
        buf[4..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Checks the magic and the declared size, without looking at the payload.
    /// Stream transports call this before reading the body.
    pub fn check(&self) -> Result<(), NetError> {
        if !self.has_magic() {
            return Err(NetError::InvalidMagic((self.checksum & 0xFF) as u8));
        }
        if self.size as usize > MESSAGE_MAX_SIZE {
            return Err(NetError::MessageTooLarge {
                size: self.size as usize,
                max: MESSAGE_MAX_SIZE,
            });
        }
        Ok(())
    }

    pub fn validate(&self, payload: &[u8]) -> Result<(), NetError> {
        self.check()?;
        let expected = frame_checksum(payload);
        if self.checksum != expected {
            return Err(NetError::ChecksumMismatch {
                expected,
                actual: self.checksum,
            });
        }
        Ok(())
    }
}

/// CRC32C of `data` with the low byte replaced by [`FRAME_MAGIC`].
pub fn frame_checksum(data: &[u8]) -> u32 {
    (crc32c::crc32c(data) & !0xFF) | FRAME_MAGIC as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let hdr = MessageHeader::from_bytes(&[0x86, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(hdr.checksum, 0x0403_0286);
        assert_eq!(hdr.size, 0x0807_0605);
        assert_eq!(MessageHeader::from_bytes(&hdr.to_bytes()), hdr);
    }

    #[test]
    fn test_checksum_carries_magic() {
        assert_eq!(frame_checksum(b"hello world") & 0xFF, FRAME_MAGIC as u32);
        assert_eq!(frame_checksum(b"") & 0xFF, FRAME_MAGIC as u32);
    }

    #[test]
    fn test_validate_success() {
        let payload = b"some payload data";
        let hdr = MessageHeader::for_payload(payload).unwrap();
        assert_eq!(hdr.size as usize, payload.len());
        hdr.validate(payload).unwrap();
    }

    #[test]
    fn test_validate_bad_magic() {
        let hdr = MessageHeader {
            checksum: 0x1234_5678,
            size: 5,
        };
        assert!(matches!(hdr.validate(b"12345"), Err(NetError::InvalidMagic(0x78))));
    }

    #[test]
    fn test_validate_bad_checksum() {
        let payload = b"some data";
        let mut hdr = MessageHeader::for_payload(payload).unwrap();
        hdr.checksum ^= 0xFF00_0000;
        assert!(matches!(
            hdr.validate(payload),
            Err(NetError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_check_too_large() {
        let hdr = MessageHeader {
            checksum: FRAME_MAGIC as u32,
            size: (MESSAGE_MAX_SIZE + 1) as u32,
        };
        assert!(matches!(hdr.check(), Err(NetError::MessageTooLarge { .. })));
    }
}
