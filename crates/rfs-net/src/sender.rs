//! Client half of the transport.
//!
//! Every endpoint gets one persistent connection with two background drains:
//! the outbound drain frames and writes enqueued envelopes, the inbound drain
//! decodes replies and hands each one to the caller waiting on its id. A
//! caller's waiter is registered before its request is enqueued, so a reply
//! can never arrive ahead of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rfs_proto::{Reply, ReplyPayload, Request, RequestPayload};
use rfs_types::{IdAllocator, RequestId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::NetError;
use crate::socket::Socket;
use crate::transport::{recv_message, send_message, AsyncConnector};

struct Pending {
    conn_id: u64,
    tx: oneshot::Sender<Result<Reply, NetError>>,
}

struct Connection<S> {
    id: u64,
    socket: Arc<S>,
    outbound: mpsc::UnboundedSender<Bytes>,
    drains: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<S> Connection<S> {
    fn abort_drains(&self) {
        for drain in self.drains.lock().drain(..) {
            drain.abort();
        }
    }
}

/// State shared between the `Sender` and its drain tasks.
struct Inner<S> {
    pending: DashMap<u64, Pending>,
    connections: DashMap<String, Arc<Connection<S>>>,
}

impl<S: Socket> Inner<S> {
    fn complete(&self, reply: Reply) {
        match self.pending.remove(&reply.id.0) {
            Some((_, pending)) => {
                // The waiter may have given up in the meantime.
                let _ = pending.tx.send(Ok(reply));
            }
            None => {
                tracing::warn!(id = reply.id.0, "dropping reply with no waiter");
            }
        }
    }

    /// Fail the requests waiting on `conn_id`, or every request when `None`.
    fn fail_pending(&self, conn_id: Option<u64>, err: impl Fn() -> NetError) -> usize {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| conn_id.map_or(true, |id| entry.value().conn_id == id))
            .map(|entry| *entry.key())
            .collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.tx.send(Err(err()));
                failed += 1;
            }
        }
        failed
    }

    /// Evict a broken connection and fail whatever was waiting on it.
    fn connection_lost(&self, addr: &str, conn_id: u64) {
        if let Some((_, conn)) = self
            .connections
            .remove_if(addr, |_, conn| conn.id == conn_id)
        {
            conn.abort_drains();
        }
        let failed = self.fail_pending(Some(conn_id), || NetError::ConnectionClosed);
        tracing::info!(%addr, conn_id, failed, "connection lost");
    }
}

/// Removes the pending entry if the caller stops waiting for any reason.
struct PendingGuard<'a, S: Socket> {
    inner: &'a Inner<S>,
    id: u64,
}

impl<S: Socket> Drop for PendingGuard<'_, S> {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.id);
    }
}

/// Correlating request sender.
///
/// `send_request` is safe to call from many tasks at once; all requests to
/// the same address share one connection and complete independently of
/// the order in which the agent answers.
pub struct Sender<S: Socket> {
    connector: Arc<dyn AsyncConnector<S>>,
    inner: Arc<Inner<S>>,
    request_ids: IdAllocator<RequestId>,
    conn_ids: IdAllocator<u64>,
    timeout_nanos: AtomicU64,
}

impl<S: Socket> Sender<S> {
    pub fn new(connector: Arc<dyn AsyncConnector<S>>, timeout: Duration) -> Self {
        Self {
            connector,
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                connections: DashMap::new(),
            }),
            request_ids: IdAllocator::new(),
            conn_ids: IdAllocator::new(),
            timeout_nanos: AtomicU64::new(duration_nanos(timeout)),
        }
    }

    /// Connect eagerly to every endpoint. Later requests to other addresses
    /// still connect lazily.
    pub async fn connect<I, A>(&self, endpoints: I) -> Result<(), NetError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        for endpoint in endpoints {
            self.get_or_connect(endpoint.as_ref()).await?;
        }
        Ok(())
    }

    /// Send `payload` to `addr` and wait for the matching reply.
    ///
    /// An error-typed reply comes back as `NetError::Remote`.
    pub async fn send_request(
        &self,
        addr: &str,
        payload: RequestPayload,
    ) -> Result<ReplyPayload, NetError> {
        let conn = self.get_or_connect(addr).await?;

        let id = self.request_ids.allocate();
        let payload_type = payload.payload_type();
        let envelope = Request::new(id, payload).encode()?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(
            id.0,
            Pending {
                conn_id: conn.id,
                tx,
            },
        );
        let _guard = PendingGuard {
            inner: &self.inner,
            id: id.0,
        };

        tracing::debug!(%addr, id = id.0, ?payload_type, "sending request");
        conn.outbound
            .send(envelope)
            .map_err(|_| NetError::ConnectionClosed)?;

        let timeout = self.timeout();
        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(NetError::Cancelled),
            Err(_) => {
                tracing::warn!(%addr, id = id.0, ?payload_type, ?timeout, "request timed out");
                return Err(NetError::Timeout);
            }
        };
        reply.payload.into_result().map_err(NetError::Remote)
    }

    /// Stop all drains, close every connection and cancel outstanding requests.
    pub async fn disconnect(&self) {
        let addrs: Vec<String> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for addr in addrs {
            if let Some((_, conn)) = self.inner.connections.remove(&addr) {
                conn.abort_drains();
                conn.socket.close().await;
            }
        }
        let cancelled = self.inner.fail_pending(None, || NetError::Cancelled);
        tracing::info!(cancelled, "sender disconnected");
    }

    /// Number of requests currently waiting for a reply.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_nanos.load(Ordering::Relaxed))
    }

    /// Applies to requests sent from now on.
    pub fn set_timeout(&self, timeout: Duration) {
        let old = self.timeout_nanos.swap(duration_nanos(timeout), Ordering::Relaxed);
        if old != duration_nanos(timeout) {
            tracing::info!(old = ?Duration::from_nanos(old), new = ?timeout, "request timeout changed");
        }
    }

    async fn get_or_connect(&self, addr: &str) -> Result<Arc<Connection<S>>, NetError> {
        if let Some(conn) = self.inner.connections.get(addr) {
            return Ok(Arc::clone(conn.value()));
        }

        let socket = Arc::new(self.connector.connect(addr).await?);

        match self.inner.connections.entry(addr.to_string()) {
            // Someone else connected first; ours is dropped unused.
            Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                let conn_id = self.conn_ids.allocate();
                let (outbound, queue) = mpsc::unbounded_channel();
                let conn = Arc::new(Connection {
                    id: conn_id,
                    socket: Arc::clone(&socket),
                    outbound,
                    drains: parking_lot::Mutex::new(Vec::with_capacity(2)),
                });
                slot.insert(Arc::clone(&conn));

                let outbound_drain = tokio::spawn(outbound_drain(
                    Arc::clone(&self.inner),
                    addr.to_string(),
                    conn_id,
                    Arc::clone(&socket),
                    queue,
                ));
                let inbound_drain = tokio::spawn(inbound_drain(
                    Arc::clone(&self.inner),
                    addr.to_string(),
                    conn_id,
                    socket,
                ));
                conn.drains.lock().extend([outbound_drain, inbound_drain]);

                tracing::info!(%addr, conn_id, "connected");
                Ok(conn)
            }
        }
    }
}

impl<S: Socket> Drop for Sender<S> {
    fn drop(&mut self) {
        for entry in self.inner.connections.iter() {
            entry.value().abort_drains();
        }
        self.inner.connections.clear();
        self.inner.fail_pending(None, || NetError::Cancelled);
    }
}

async fn outbound_drain<S: Socket>(
    inner: Arc<Inner<S>>,
    addr: String,
    conn_id: u64,
    socket: Arc<S>,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(envelope) = queue.recv().await {
        if let Err(e) = send_message(&*socket, &envelope).await {
            tracing::warn!(%addr, conn_id, error = %e, "outbound drain failed");
            inner.connection_lost(&addr, conn_id);
            return;
        }
    }
}

async fn inbound_drain<S: Socket>(inner: Arc<Inner<S>>, addr: String, conn_id: u64, socket: Arc<S>) {
    loop {
        let payload = match recv_message(&*socket).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%addr, conn_id, error = %e, "inbound drain failed");
                inner.connection_lost(&addr, conn_id);
                return;
            }
        };
        match Reply::decode(payload) {
            Ok(reply) => inner.complete(reply),
            Err(e) => tracing::warn!(%addr, conn_id, error = %e, "undecodable reply dropped"),
        }
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{MemNetwork, MemSocket};
    use crate::receiver::Receiver;
    use bytes::Bytes;
    use rand::seq::SliceRandom;
    use rfs_proto::{FetchReq, PayloadType, RemoveReq};
    use rfs_types::{FileCode, Status};
    use std::collections::HashSet;

    const AGENT: &str = "127.0.0.1:7070";

    fn fetch(path: &str) -> RequestPayload {
        RequestPayload::Fetch(FetchReq { path: path.into() })
    }

    fn setup(timeout: Duration) -> (MemNetwork, Receiver<MemSocket>, Sender<MemSocket>) {
        let network = MemNetwork::new();
        let receiver = Receiver::bind(network.bind(AGENT).unwrap());
        let sender = Sender::new(Arc::new(network.connector()), timeout);
        (network, receiver, sender)
    }

    async fn wait_for_pending(sender: &Sender<MemSocket>, n: usize) {
        while sender.pending_len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_round_trip() {
        let (_net, receiver, sender) = setup(Duration::from_secs(5));

        let agent = tokio::spawn(async move {
            let incoming = receiver.recv_request().await.unwrap();
            assert_eq!(incoming.payload_type(), PayloadType::Fetch);
            receiver
                .send_reply(
                    incoming.id,
                    &incoming.sender,
                    ReplyPayload::file_data(Bytes::from_static(b"content")),
                )
                .await
                .unwrap();
            receiver
        });

        let reply = sender.send_request(AGENT, fetch("/a")).await.unwrap();
        assert_eq!(reply, ReplyPayload::file_data(Bytes::from_static(b"content")));
        assert_eq!(sender.pending_len(), 0);
        assert_eq!(sender.connection_count(), 1);
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_reply_surfaces_as_remote() {
        let (_net, receiver, sender) = setup(Duration::from_secs(5));

        tokio::spawn(async move {
            let incoming = receiver.recv_request().await.unwrap();
            let status = Status::with_message(FileCode::NOT_FOUND, "no such file");
            receiver
                .send_reply(incoming.id, &incoming.sender, ReplyPayload::error(&status))
                .await
                .unwrap();
            receiver
        });

        let err = sender
            .send_request(AGENT, RequestPayload::Remove(RemoveReq { path: "/x".into() }))
            .await
            .unwrap_err();
        match err {
            NetError::Remote(status) => {
                assert_eq!(status.code(), FileCode::NOT_FOUND);
                assert_eq!(status.message(), Some("no such file"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ten_thousand_reordered_replies() {
        const N: usize = 10_000;
        let (_net, receiver, sender) = setup(Duration::from_secs(60));
        let sender = Arc::new(sender);

        let agent = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(N);
            for _ in 0..N {
                batch.push(receiver.recv_request().await.unwrap());
            }
            {
                let mut rng = rand::thread_rng();
                batch.shuffle(&mut rng);
            }
            for incoming in batch {
                let data = Bytes::from(incoming.payload.path().as_bytes().to_vec());
                receiver
                    .send_reply(incoming.id, &incoming.sender, ReplyPayload::file_data(data))
                    .await
                    .unwrap();
            }
            receiver
        });

        let mut callers = tokio::task::JoinSet::new();
        for i in 0..N {
            let sender = Arc::clone(&sender);
            callers.spawn(async move {
                let path = format!("/file-{i}");
                let reply = sender.send_request(AGENT, fetch(&path)).await.unwrap();
                match reply {
                    ReplyPayload::FileData(rsp) => assert_eq!(rsp.data.as_ref(), path.as_bytes()),
                    other => panic!("unexpected reply {other:?}"),
                }
                i
            });
        }

        let mut seen = HashSet::new();
        while let Some(done) = callers.join_next().await {
            assert!(seen.insert(done.unwrap()));
        }
        assert_eq!(seen.len(), N);
        assert_eq!(sender.pending_len(), 0);
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (_net, receiver, sender) = setup(Duration::from_millis(50));

        let err = sender.send_request(AGENT, fetch("/slow")).await.unwrap_err();
        assert!(matches!(err, NetError::Timeout));
        assert_eq!(sender.pending_len(), 0);

        // The late reply is dropped and the connection stays usable.
        let late = receiver.recv_request().await.unwrap();
        receiver
            .send_reply(late.id, &late.sender, ReplyPayload::Ok)
            .await
            .unwrap();

        let agent = tokio::spawn(async move {
            let incoming = receiver.recv_request().await.unwrap();
            receiver
                .send_reply(incoming.id, &incoming.sender, ReplyPayload::Ok)
                .await
                .unwrap();
            receiver
        });
        let reply = sender.send_request(AGENT, fetch("/fast")).await.unwrap();
        assert_eq!(reply, ReplyPayload::Ok);
        assert_eq!(sender.connection_count(), 1);
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn test_set_timeout_applies_to_next_request() {
        let (_net, receiver, sender) = setup(Duration::from_secs(30));
        sender.set_timeout(Duration::from_millis(20));
        assert_eq!(sender.timeout(), Duration::from_millis(20));

        let err = sender.send_request(AGENT, fetch("/slow")).await.unwrap_err();
        assert!(matches!(err, NetError::Timeout));
        drop(receiver);
    }

    #[tokio::test]
    async fn test_request_ids_are_distinct_and_increasing() {
        let (_net, receiver, sender) = setup(Duration::from_secs(5));
        let agent = tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..3 {
                let incoming = receiver.recv_request().await.unwrap();
                ids.push(incoming.id);
                receiver
                    .send_reply(incoming.id, &incoming.sender, ReplyPayload::Ok)
                    .await
                    .unwrap();
            }
            ids
        });
        for i in 0..3 {
            sender.send_request(AGENT, fetch(&format!("/{i}"))).await.unwrap();
        }
        let ids = agent.await.unwrap();
        assert_eq!(ids, vec![RequestId(1), RequestId(2), RequestId(3)]);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_waiters() {
        let (_net, _receiver, sender) = setup(Duration::from_secs(30));
        let sender = Arc::new(sender);

        let waiter = {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { sender.send_request(AGENT, fetch("/never")).await })
        };
        wait_for_pending(&sender, 1).await;

        sender.disconnect().await;
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, NetError::Cancelled));
        assert_eq!(sender.pending_len(), 0);
        assert_eq!(sender.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_and_reconnects() {
        let (_net, receiver, sender) = setup(Duration::from_secs(30));
        let sender = Arc::new(sender);

        let waiter = {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { sender.send_request(AGENT, fetch("/dropped")).await })
        };

        let incoming = receiver.recv_request().await.unwrap();
        receiver.disconnect_peer(&incoming.sender).await;

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed));
        assert_eq!(sender.pending_len(), 0);

        let agent = tokio::spawn(async move {
            let incoming = receiver.recv_request().await.unwrap();
            receiver
                .send_reply(incoming.id, &incoming.sender, ReplyPayload::Ok)
                .await
                .unwrap();
            receiver
        });
        assert_eq!(sender.send_request(AGENT, fetch("/again")).await.unwrap(), ReplyPayload::Ok);
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let network = MemNetwork::new();
        let sender: Sender<MemSocket> =
            Sender::new(Arc::new(network.connector()), Duration::from_secs(1));
        let err = sender.connect(["127.0.0.1:1"]).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionRefused(_)));
        assert_eq!(sender.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_reply_id_is_ignored() {
        let network = MemNetwork::new();
        let listener = network.bind(AGENT).unwrap();
        let sender = Sender::new(Arc::new(network.connector()), Duration::from_secs(5));
        sender.connect([AGENT]).await.unwrap();

        use crate::socket::Listener;
        let agent_side = listener.accept().await.unwrap();
        let stray = Reply::new(RequestId(999), ReplyPayload::Ok).encode().unwrap();
        send_message(&agent_side, &stray).await.unwrap();

        let answer = tokio::spawn(async move {
            let request = Request::decode(recv_message(&agent_side).await.unwrap()).unwrap();
            let reply = Reply::new(request.id, ReplyPayload::Ok).encode().unwrap();
            send_message(&agent_side, &reply).await.unwrap();
            agent_side
        });
        assert_eq!(sender.send_request(AGENT, fetch("/a")).await.unwrap(), ReplyPayload::Ok);
        answer.await.unwrap();
    }
}
