//! Agent half of the transport.
//!
//! The accept loop runs in the background and starts one read task per
//! connection. Decoded requests from all connections are funnelled into a
//! single queue drained by [`Receiver::recv_request`]; replies are routed
//! back by the sender key that came with the request. When a connection
//! ends its key is reported through [`Receiver::recv_departed`].

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use rfs_proto::{PayloadType, Reply, ReplyPayload, Request, RequestPayload};
use rfs_types::RequestId;
use tokio::sync::{mpsc, Notify};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::NetError;
use crate::socket::{Listener, Socket};
use crate::transport::{recv_message, send_message};

const INCOMING_QUEUE_DEPTH: usize = 1024;

/// One decoded request together with the peer that sent it.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub id: RequestId,
    /// Key of the connection the reply has to go back on.
    pub sender: String,
    pub payload: RequestPayload,
}

impl Incoming {
    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }
}

type Peers<S> = Arc<DashMap<String, Arc<S>>>;

pub struct Receiver<S: Socket> {
    local_addr: SocketAddr,
    peers: Peers<S>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Incoming>>,
    departed: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    shutdown: Arc<Notify>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<S: Socket> Receiver<S> {
    /// Start accepting connections on `listener`.
    pub fn bind<L>(listener: L) -> Self
    where
        L: Listener<Socket = S>,
    {
        let local_addr = listener.local_addr();
        let peers: Peers<S> = Arc::new(DashMap::new());
        let shutdown = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel(INCOMING_QUEUE_DEPTH);
        let (departed_tx, departed_rx) = mpsc::unbounded_channel();

        tracing::info!(%local_addr, "receiver bound");
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&peers),
            tx,
            departed_tx,
            Arc::clone(&shutdown),
        ));

        Self {
            local_addr,
            peers,
            incoming: tokio::sync::Mutex::new(rx),
            departed: tokio::sync::Mutex::new(departed_rx),
            shutdown,
            accept_task: parking_lot::Mutex::new(Some(accept_task)),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next request from any peer. `NetError::ShuttingDown` after `unbind`.
    pub async fn recv_request(&self) -> Result<Incoming, NetError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(NetError::ShuttingDown)
    }

    /// Key of the next connection that ended, for whatever reason. `None`
    /// once the receiver is unbound and every connection is gone.
    pub async fn recv_departed(&self) -> Option<String> {
        self.departed.lock().await.recv().await
    }

    pub async fn send_reply(
        &self,
        id: RequestId,
        sender: &str,
        payload: ReplyPayload,
    ) -> Result<(), NetError> {
        let peer = self
            .peers
            .get(sender)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| NetError::UnknownPeer(sender.to_string()))?;
        let envelope = Reply::new(id, payload).encode()?;
        send_message(&*peer, &envelope).await
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Close one peer connection.
    pub async fn disconnect_peer(&self, sender: &str) {
        if let Some((_, peer)) = self.peers.remove(sender) {
            peer.close().await;
        }
    }

    /// Stop accepting, end every read task and close all peers.
    pub async fn unbind(&self) {
        self.shutdown.notify_one();
        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "accept loop ended abnormally");
            }
        }
        let keys: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.disconnect_peer(&key).await;
        }
        tracing::info!(local_addr = %self.local_addr, "receiver unbound");
    }
}

impl<S: Socket> Drop for Receiver<S> {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

async fn accept_loop<L: Listener>(
    listener: L,
    peers: Peers<L::Socket>,
    incoming: mpsc::Sender<Incoming>,
    departed: mpsc::UnboundedSender<String>,
    shutdown: Arc<Notify>,
) {
    let mut readers = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => break,

            result = listener.accept() => match result {
                Ok(socket) => {
                    let socket = Arc::new(socket);
                    let key = socket.peer_addr().to_string();
                    tracing::debug!(peer = %key, "accepted connection");
                    peers.insert(key.clone(), Arc::clone(&socket));
                    readers.spawn(read_loop(
                        socket,
                        key,
                        Arc::clone(&peers),
                        incoming.clone(),
                        departed.clone(),
                    ));
                }
                Err(NetError::ShuttingDown) => break,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            },

            // Reap finished readers so the set does not grow without bound.
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }

    readers.shutdown().await;
}

async fn read_loop<S: Socket>(
    socket: Arc<S>,
    key: String,
    peers: Peers<S>,
    incoming: mpsc::Sender<Incoming>,
    departed: mpsc::UnboundedSender<String>,
) {
    loop {
        let payload = match recv_message(&*socket).await {
            Ok(payload) => payload,
            Err(NetError::ConnectionClosed) => {
                tracing::debug!(peer = %key, "peer disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %key, error = %e, "dropping connection");
                break;
            }
        };
        let request = match Request::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %key, error = %e, "undecodable request dropped");
                continue;
            }
        };
        let item = Incoming {
            id: request.id,
            sender: key.clone(),
            payload: request.payload,
        };
        if incoming.send(item).await.is_err() {
            break;
        }
    }
    peers.remove_if(&key, |_, peer| Arc::ptr_eq(peer, &socket));
    let _ = departed.send(key);
}
