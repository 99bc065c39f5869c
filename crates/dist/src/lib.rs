//! Distributed take protocol for hive nodes.
//!
//! A node whose local driver runs out of work asks its neighbors for
//! tasks ([`TakeProtocol`], driven by [`DistributedScheduler`]); each node
//! answers such requests from its own driver ([`TakeResponder`]).
//! Messages travel in a MessagePack [`Message`] envelope, either over
//! ZeroMQ DEALER/ROUTER sockets or in process through [`LoopbackNetwork`].

pub mod config;
pub mod error;
pub mod loopback;
pub mod message;
pub mod messenger;
pub mod node;
pub mod protocol;
pub mod reqrep;
pub mod take;
pub mod traits;
pub mod transport;

pub use config::{DistConfig, NeighborConfig, ProtocolConfig};
pub use error::DistError;
pub use loopback::LoopbackNetwork;
pub use message::Message;
pub use messenger::ZmqMessenger;
pub use node::{DistributedScheduler, TakeResponder};
pub use protocol::{TakeRequest, TakeResponse, TAKE_REQUEST, TAKE_RESPONSE};
pub use reqrep::{LateReplies, ReplyToken, ZmqRequestClient, ZmqRequestServer};
pub use take::{Neighbor, NeighborStatus, TakeProtocol};
pub use traits::{Messenger, RequestHandler, RequestSender};
pub use transport::Transport;
