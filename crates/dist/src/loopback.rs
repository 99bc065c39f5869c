//! In-process [`Messenger`] connecting nodes that live in one process.
//!
//! Messages still go through their MessagePack encoding, so a loopback
//! exchange exercises the same envelope code as the ZeroMQ transport.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use hive_core::Location;

use crate::error::DistError;
use crate::message::Message;
use crate::node::TakeResponder;
use crate::traits::Messenger;

#[derive(Default)]
pub struct LoopbackNetwork {
    responders: RwLock<HashMap<Location, Weak<TakeResponder>>>,
    down: RwLock<HashSet<Location>>,
    delays: RwLock<HashMap<Location, Duration>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route requests for the responder's node to it. Only a weak
    /// reference is kept; a dropped responder reads as unreachable.
    pub fn register(&self, responder: &Arc<TakeResponder>) {
        let node = responder.scheduler().node();
        self.responders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node, Arc::downgrade(responder));
    }

    pub fn set_reachable(&self, node: Location, reachable: bool) {
        let mut down = self.down.write().unwrap_or_else(PoisonError::into_inner);
        if reachable {
            down.remove(&node);
        } else {
            down.insert(node);
        }
    }

    /// Hold every answer from `node` back by `delay`.
    pub fn set_delay(&self, node: Location, delay: Duration) {
        self.delays
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node, delay);
    }

    fn responder(&self, node: Location) -> Option<Arc<TakeResponder>> {
        if self.down.read().unwrap_or_else(PoisonError::into_inner).contains(&node) {
            return None;
        }
        self.responders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node)
            .and_then(Weak::upgrade)
    }

    fn delay(&self, node: Location) -> Option<Duration> {
        self.delays
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node)
            .copied()
    }
}

#[async_trait]
impl Messenger for LoopbackNetwork {
    async fn send(&self, to: Location, message: Message, timeout: Duration) -> Result<Message, DistError> {
        let responder = self.responder(to).ok_or(DistError::Unreachable(to))?;
        let request = Message::from_bytes(&message.to_bytes()?)?;
        trace!(%to, topic = %request.topic, "loopback request");

        match self.delay(to) {
            Some(delay) if delay >= timeout => {
                tokio::time::sleep(timeout).await;
                return Err(DistError::Timeout(timeout));
            }
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let reply = responder.respond(&request)?;
        Ok(Message::from_bytes(&reply.to_bytes()?)?)
    }
}
