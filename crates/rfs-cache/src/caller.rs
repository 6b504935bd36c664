use async_trait::async_trait;
use rfs_net::{NetError, Sender, Socket};
use rfs_proto::{ReplyPayload, RequestPayload};

/// Issues one request to an agent and waits for its reply.
///
/// The cache manager only depends on this seam, so tests can substitute an
/// in-process fake agent.
#[async_trait]
pub trait RemoteCaller: Send + Sync {
    async fn call(&self, addr: &str, payload: RequestPayload) -> Result<ReplyPayload, NetError>;
}

#[async_trait]
impl<S: Socket> RemoteCaller for Sender<S> {
    async fn call(&self, addr: &str, payload: RequestPayload) -> Result<ReplyPayload, NetError> {
        self.send_request(addr, payload).await
    }
}
