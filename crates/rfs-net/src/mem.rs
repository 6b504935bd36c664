//! In-process sockets for tests and single-binary setups.
//!
//! A [`MemNetwork`] is a tiny address registry: listeners bind a
//! `host:port`, connectors look it up and hand the listener one end of a
//! [`MemSocket`] pair.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::NetError;
use crate::socket::{Listener, Socket};
use crate::transport::AsyncConnector;

/// One end of an in-memory duplex channel. Frames are delivered whole.
pub struct MemSocket {
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    local: SocketAddr,
    peer: SocketAddr,
}

impl MemSocket {
    /// Connected pair on two loopback addresses.
    pub fn pair() -> (MemSocket, MemSocket) {
        Self::pair_with(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 1)),
            SocketAddr::from((Ipv4Addr::LOCALHOST, 2)),
        )
    }

    pub fn pair_with(a: SocketAddr, b: SocketAddr) -> (MemSocket, MemSocket) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemSocket {
                tx: parking_lot::Mutex::new(Some(a_tx)),
                rx: tokio::sync::Mutex::new(a_rx),
                local: a,
                peer: b,
            },
            MemSocket {
                tx: parking_lot::Mutex::new(Some(b_tx)),
                rx: tokio::sync::Mutex::new(b_rx),
                local: b,
                peer: a,
            },
        )
    }
}

#[async_trait]
impl Socket for MemSocket {
    async fn send(&self, frame: Bytes) -> Result<(), NetError> {
        let tx = self.tx.lock().clone().ok_or(NetError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| NetError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Bytes, NetError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(NetError::ConnectionClosed)
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn close(&self) {
        self.tx.lock().take();
    }
}

impl std::fmt::Debug for MemSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemSocket")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .finish()
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, NetError> {
    addr.parse()
        .map_err(|_| NetError::InvalidAddress(addr.to_string()))
}

/// Registry of bound in-memory listeners. Clones share the registry.
#[derive(Clone)]
pub struct MemNetwork {
    listeners: Arc<DashMap<SocketAddr, mpsc::UnboundedSender<MemSocket>>>,
    next_port: Arc<AtomicU16>,
}

impl MemNetwork {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            next_port: Arc::new(AtomicU16::new(49152)),
        }
    }

    pub fn bind(&self, addr: &str) -> Result<MemListener, NetError> {
        let addr = parse_addr(addr)?;
        let (tx, rx) = mpsc::unbounded_channel();
        match self.listeners.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(NetError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("{addr} already bound"),
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        Ok(MemListener {
            addr,
            incoming: tokio::sync::Mutex::new(rx),
            network: self.clone(),
        })
    }

    pub fn connector(&self) -> MemConnector {
        MemConnector {
            network: self.clone(),
        }
    }

    fn connect(&self, addr: &str) -> Result<MemSocket, NetError> {
        let server = parse_addr(addr)?;
        let listener = self
            .listeners
            .get(&server)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NetError::ConnectionRefused(addr.to_string()))?;
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let client = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let (client_end, server_end) = MemSocket::pair_with(client, server);
        listener
            .send(server_end)
            .map_err(|_| NetError::ConnectionRefused(addr.to_string()))?;
        Ok(client_end)
    }
}

impl Default for MemNetwork {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemListener {
    addr: SocketAddr,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemSocket>>,
    network: MemNetwork,
}

#[async_trait]
impl Listener for MemListener {
    type Socket = MemSocket;

    async fn accept(&self) -> Result<MemSocket, NetError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(NetError::ShuttingDown)
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MemListener {
    fn drop(&mut self) {
        self.network.listeners.remove(&self.addr);
    }
}

#[derive(Clone)]
pub struct MemConnector {
    network: MemNetwork,
}

#[async_trait]
impl AsyncConnector<MemSocket> for MemConnector {
    async fn connect(&self, addr: &str) -> Result<MemSocket, NetError> {
        self.network.connect(addr)
    }
}
