use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rfs_net::{Incoming, NetError, Receiver, Socket};
use rfs_proto::ReplyPayload;
use rfs_types::Status;
use tokio::sync::Notify;

use crate::error::AgentError;
use crate::ops::LocalFileOps;

/// Stops a running [`Executor`] between requests.
#[derive(Clone, Default)]
pub struct ExecutorHandle {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    stopped: AtomicBool,
    notify: Notify,
    open_handles: AtomicUsize,
}

impl ExecutorHandle {
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        // `notify_one` keeps a permit if the loop is not waiting yet.
        self.inner.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// File handles currently pinned for clients.
    pub fn open_handles(&self) -> usize {
        self.inner.open_handles.load(Ordering::Relaxed)
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    pub served: u64,
    pub failed: u64,
    pub dropped_replies: u64,
    /// Handles dropped because their client went away without closing.
    pub released_handles: u64,
}

/// Single dispatch loop: receive, execute locally, reply.
///
/// A failed file operation becomes an error reply. A reply that cannot be
/// delivered is logged and dropped. Handles pinned by a client are released
/// when its connection ends. Only the transport shutting down or
/// [`ExecutorHandle::stop`] ends the loop.
pub struct Executor<S: Socket> {
    receiver: Receiver<S>,
    ops: LocalFileOps,
    handle: ExecutorHandle,
    stats: ExecutorStats,
}

impl<S: Socket> Executor<S> {
    pub fn new(receiver: Receiver<S>, ops: LocalFileOps) -> Self {
        Self {
            receiver,
            ops,
            handle: ExecutorHandle::default(),
            stats: ExecutorStats::default(),
        }
    }

    pub fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    /// Run until stopped, then unbind the receiver.
    pub async fn run(mut self) -> Result<ExecutorStats, AgentError> {
        tracing::info!(
            listen = %self.receiver.local_addr(),
            root = %self.ops.root().display(),
            "executor started"
        );
        let result = self.serve().await;
        self.receiver.unbind().await;
        tracing::info!(
            served = self.stats.served,
            failed = self.stats.failed,
            dropped_replies = self.stats.dropped_replies,
            released_handles = self.stats.released_handles,
            "executor stopped"
        );
        result.map(|()| self.stats)
    }

    async fn serve(&mut self) -> Result<(), AgentError> {
        loop {
            if self.handle.is_stopped() {
                return Ok(());
            }
            let incoming = tokio::select! {
                biased;

                _ = self.handle.inner.notify.notified() => continue,

                result = self.receiver.recv_request() => match result {
                    Ok(incoming) => incoming,
                    Err(NetError::ShuttingDown) => return Ok(()),
                    Err(e) => return Err(e.into()),
                },

                Some(peer) = self.receiver.recv_departed() => {
                    self.release_peer(&peer);
                    continue;
                }
            };
            self.dispatch(incoming).await;
        }
    }

    async fn dispatch(&mut self, incoming: Incoming) {
        let Incoming {
            id,
            sender,
            payload,
        } = incoming;
        let payload_type = payload.payload_type();
        let path = payload.path().to_string();

        let reply = match self.ops.execute(&sender, payload).await {
            Ok(reply) => reply,
            Err(status) => {
                tracing::debug!(%sender, id = id.0, ?payload_type, %path, %status, "operation failed");
                self.stats.failed += 1;
                ReplyPayload::error(&status)
            }
        };
        self.stats.served += 1;
        self.publish_handle_count();

        let mut result = self.receiver.send_reply(id, &sender, reply).await;
        if let Some(fallback) = result.as_ref().err().and_then(fallback_reply) {
            tracing::warn!(
                %sender,
                id = id.0,
                ?payload_type,
                %path,
                "reply not encodable, sending error instead"
            );
            self.stats.failed += 1;
            result = self.receiver.send_reply(id, &sender, fallback).await;
        }
        match result {
            Ok(()) => tracing::debug!(%sender, id = id.0, ?payload_type, %path, "replied"),
            Err(e) => {
                self.stats.dropped_replies += 1;
                tracing::warn!(%sender, id = id.0, ?payload_type, error = %e, "reply dropped");
                if matches!(e, NetError::UnknownPeer(_)) {
                    self.release_peer(&sender);
                }
            }
        }
    }

    fn release_peer(&mut self, peer: &str) {
        let released = self.ops.release_peer(peer);
        if released > 0 {
            self.stats.released_handles += released as u64;
            self.publish_handle_count();
            tracing::debug!(%peer, released, "released handles of departed peer");
        }
    }

    fn publish_handle_count(&self) {
        self.handle
            .inner
            .open_handles
            .store(self.ops.open_handles(), Ordering::Relaxed);
    }
}

/// Error reply for a reply the transport refused to encode, so the client
/// learns of the failure instead of waiting out its deadline.
fn fallback_reply(err: &NetError) -> Option<ReplyPayload> {
    match err {
        NetError::MessageTooLarge { .. } | NetError::Wire(_) => Some(ReplyPayload::error(
            &Status::with_message(err.code(), err.to_string()),
        )),
        _ => None,
    }
}
