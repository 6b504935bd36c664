//! TCP transport: one persistent stream per endpoint.
//!
//! [`TcpSocket`] splits the stream into read and write halves behind
//! separate async mutexes so the inbound and outbound drains never contend.
//! `recv` performs length-delimited reads and yields whole frames.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use rfs_net::message::{MessageHeader, MESSAGE_HEADER_SIZE};
use rfs_net::{AsyncConnector, Listener, NetError, Socket};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

pub struct TcpSocket {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl TcpSocket {
    pub fn from_stream(stream: tokio::net::TcpStream) -> Result<Self, NetError> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer_addr,
            local_addr,
        })
    }
}

fn eof_as_closed(err: std::io::Error) -> NetError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe => NetError::ConnectionClosed,
        _ => NetError::Io(err),
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[async_trait]
impl Socket for TcpSocket {
    async fn send(&self, frame: Bytes) -> Result<(), NetError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await.map_err(eof_as_closed)?;
        writer.flush().await.map_err(eof_as_closed)
    }

    async fn recv(&self) -> Result<Bytes, NetError> {
        let mut reader = self.reader.lock().await;

        let mut head = [0u8; MESSAGE_HEADER_SIZE];
        reader.read_exact(&mut head).await.map_err(eof_as_closed)?;
        let header = MessageHeader::from_bytes(&head);
        header.check()?;

        let size = header.size as usize;
        let mut frame = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + size);
        frame.put_slice(&head);
        frame.resize(MESSAGE_HEADER_SIZE + size, 0);
        reader
            .read_exact(&mut frame[MESSAGE_HEADER_SIZE..])
            .await
            .map_err(eof_as_closed)?;
        Ok(frame.freeze())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(peer = %self.peer_addr, error = %e, "shutdown after close");
        }
    }
}

pub struct TcpListener {
    inner: tokio::net::TcpListener,
    local_addr: SocketAddr,
}

impl TcpListener {
    /// Bind `addr` (`host:port`; port 0 picks a free one).
    pub async fn bind(addr: &str) -> Result<Self, NetError> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        tracing::info!(%local_addr, "TCP listener bound");
        Ok(Self { inner, local_addr })
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[async_trait]
impl Listener for TcpListener {
    type Socket = TcpSocket;

    async fn accept(&self) -> Result<TcpSocket, NetError> {
        let (stream, peer) = self.inner.accept().await?;
        tracing::debug!(%peer, "accepted TCP connection");
        TcpSocket::from_stream(stream)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AsyncConnector<TcpSocket> for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<TcpSocket, NetError> {
        tracing::debug!(%addr, "connecting via TCP");
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused(addr.to_string()),
                std::io::ErrorKind::InvalidInput => NetError::InvalidAddress(addr.to_string()),
                _ => NetError::Io(e),
            })?;
        TcpSocket::from_stream(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfs_net::{recv_message, send_message, Receiver, Sender};
    use rfs_proto::{FetchReq, ReplyPayload, RequestPayload};
    use std::sync::Arc;
    use std::time::Duration;

    async fn connected_pair() -> (TcpSocket, TcpSocket) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let client = TcpConnector.connect(&addr).await.unwrap();
        (client, accept.await.unwrap())
    }

    #[tokio::test]
    async fn test_listener_picks_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_frames_survive_stream_boundaries() {
        let (client, server) = connected_pair().await;
        assert_eq!(server.peer_addr(), client.local_addr());

        let big = vec![0xABu8; 256 * 1024];
        send_message(&client, b"small").await.unwrap();
        send_message(&client, &big).await.unwrap();
        send_message(&client, b"").await.unwrap();

        assert_eq!(recv_message(&server).await.unwrap().as_ref(), b"small");
        assert_eq!(recv_message(&server).await.unwrap().len(), big.len());
        assert!(recv_message(&server).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_reports_connection_closed() {
        let (client, server) = connected_pair().await;
        client.close().await;
        assert!(matches!(server.recv().await, Err(NetError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_bad_magic_rejected() {
        let (client, server) = connected_pair().await;
        client
            .send(Bytes::from_static(&[0x00, 0, 0, 0, 0, 0, 0, 0]))
            .await
            .unwrap();
        assert!(matches!(server.recv().await, Err(NetError::InvalidMagic(0))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().to_string();
        drop(listener);
        assert!(TcpConnector.connect(&addr).await.is_err());
    }

    #[tokio::test]
    async fn test_sender_receiver_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().to_string();
        let receiver = Receiver::bind(listener);
        let sender = Sender::new(Arc::new(TcpConnector), Duration::from_secs(5));

        let agent = tokio::spawn(async move {
            for _ in 0..2 {
                let incoming = receiver.recv_request().await.unwrap();
                let data = incoming.payload.path().as_bytes().to_vec();
                receiver
                    .send_reply(incoming.id, &incoming.sender, ReplyPayload::file_data(data.into()))
                    .await
                    .unwrap();
            }
            receiver
        });

        for path in ["/one", "/two"] {
            let reply = sender
                .send_request(&addr, RequestPayload::Fetch(FetchReq { path: path.into() }))
                .await
                .unwrap();
            assert_eq!(reply, ReplyPayload::file_data(path.as_bytes().to_vec().into()));
        }
        sender.disconnect().await;
        agent.await.unwrap().unbind().await;
    }
}
