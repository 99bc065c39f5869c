use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use hive_core::Location;

use crate::error::DistError;
use crate::message::Message;
use crate::reqrep::ReplyToken;

/// Issues a request and waits for the reply matched by correlation id.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn request(&self, message: Message, timeout: Duration) -> Result<Message, DistError>;
}

/// Receives requests and routes replies back to their senders.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Next request from any peer, with the token needed to answer it.
    async fn recv_request(&self) -> Result<(ReplyToken, Message), DistError>;

    async fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), DistError>;
}

/// Sends a message to another node and resolves with its response.
///
/// An error (including a timeout) means the node did not answer; the
/// caller decides whether that makes the node unavailable.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, to: Location, message: Message, timeout: Duration) -> Result<Message, DistError>;

    /// Replies that arrived after `send` gave up on them. Handed out once;
    /// `None` for transports that never deliver late.
    fn take_late_replies(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        None
    }
}

/// Blanket implementation so `Arc<dyn Messenger>` can be used directly.
#[async_trait]
impl<T: Messenger + ?Sized> Messenger for Arc<T> {
    async fn send(&self, to: Location, message: Message, timeout: Duration) -> Result<Message, DistError> {
        (**self).send(to, message, timeout).await
    }

    fn take_late_replies(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        (**self).take_late_replies()
    }
}
