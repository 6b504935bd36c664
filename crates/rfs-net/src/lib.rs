//! Message transport between the cache manager and the agent.
//!
//! Frames are `[checksum][size][payload]` (see [`message`]). On the client
//! side a [`Sender`] multiplexes concurrent requests over one persistent
//! connection per endpoint and matches replies to callers by request id. On
//! the agent side a [`Receiver`] accepts connections and routes each reply
//! back to the peer that asked.

pub mod error;
pub mod mem;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod transport;

pub use error::NetError;
pub use mem::{MemConnector, MemListener, MemNetwork, MemSocket};
pub use message::MessageHeader;
pub use receiver::{Incoming, Receiver};
pub use sender::Sender;
pub use socket::{Listener, Socket};
pub use transport::{recv_message, send_message, AsyncConnector};
