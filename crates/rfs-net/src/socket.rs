use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::NetError;

/// A connected, bidirectional, frame-preserving socket.
///
/// `recv` yields one complete frame (header included) per call, so stream
/// transports have to do their own length-delimited reads.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    async fn send(&self, frame: Bytes) -> Result<(), NetError>;

    /// Next complete frame. `NetError::ConnectionClosed` once the peer is gone.
    async fn recv(&self) -> Result<Bytes, NetError>;

    fn peer_addr(&self) -> SocketAddr;

    fn local_addr(&self) -> SocketAddr;

    async fn close(&self);
}

/// Accepts incoming connections on a bound address.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    type Socket: Socket;

    async fn accept(&self) -> Result<Self::Socket, NetError>;

    fn local_addr(&self) -> SocketAddr;
}
