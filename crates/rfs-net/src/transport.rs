use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::NetError;
use crate::message::{MessageHeader, MESSAGE_HEADER_SIZE};
use crate::socket::Socket;

/// Establishes connections to `host:port` endpoints.
#[async_trait]
pub trait AsyncConnector<S: Socket>: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<S, NetError>;
}

/// Prefix `payload` with a [`MessageHeader`].
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, NetError> {
    let header = MessageHeader::for_payload(payload)?;
    let mut frame = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    frame.put_slice(&header.to_bytes());
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Strip and validate the header of one complete frame.
pub fn decode_frame(frame: Bytes) -> Result<Bytes, NetError> {
    if frame.is_empty() {
        return Err(NetError::ConnectionClosed);
    }
    let header_bytes: &[u8; MESSAGE_HEADER_SIZE] = frame
        .get(..MESSAGE_HEADER_SIZE)
        .and_then(|head| head.try_into().ok())
        .ok_or(NetError::IncompleteHeader {
            need: MESSAGE_HEADER_SIZE,
            have: frame.len(),
        })?;
    let header = MessageHeader::from_bytes(header_bytes);
    header.check()?;

    let end = MESSAGE_HEADER_SIZE + header.size as usize;
    if frame.len() < end {
        return Err(NetError::IncompleteHeader {
            need: end,
            have: frame.len(),
        });
    }
    let payload = frame.slice(MESSAGE_HEADER_SIZE..end);
    header.validate(&payload)?;
    Ok(payload)
}

pub async fn send_message<S: Socket + ?Sized>(socket: &S, payload: &[u8]) -> Result<(), NetError> {
    socket.send(encode_frame(payload)?).await
}

pub async fn recv_message<S: Socket + ?Sized>(socket: &S) -> Result<Bytes, NetError> {
    decode_frame(socket.recv().await?)
}
