//! [`Messenger`] over ZeroMQ: one DEALER client per neighbor.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use hive_core::Location;

use crate::config::NeighborConfig;
use crate::error::DistError;
use crate::message::Message;
use crate::reqrep::ZmqRequestClient;
use crate::traits::{Messenger, RequestSender};
use crate::transport::Transport;

pub struct ZmqMessenger {
    clients: HashMap<Location, ZmqRequestClient>,
    /// Shared by every client; taken by the scheduler.
    late_replies: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl ZmqMessenger {
    /// Connect a client to every neighbor's responder.
    ///
    /// ZeroMQ connects lazily, so a neighbor that is not up yet is not an
    /// error here; its requests time out until it is.
    pub async fn connect(neighbors: &[NeighborConfig]) -> Result<Self, DistError> {
        let (late_tx, late_rx) = mpsc::unbounded_channel();
        let mut clients = HashMap::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let transport = Transport::parse(&neighbor.endpoint)?;
            let client = ZmqRequestClient::connect_with_late_replies(&transport, late_tx.clone()).await?;
            clients.insert(neighbor.location, client);
        }
        info!(neighbors = clients.len(), "zmq messenger connected");
        Ok(Self {
            clients,
            late_replies: Mutex::new(Some(late_rx)),
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl Messenger for ZmqMessenger {
    async fn send(&self, to: Location, message: Message, timeout: Duration) -> Result<Message, DistError> {
        let client = self.clients.get(&to).ok_or(DistError::Unreachable(to))?;
        client.request(message, timeout).await
    }

    fn take_late_replies(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.late_replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
