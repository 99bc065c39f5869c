//! Request/reply over ZeroMQ DEALER/ROUTER sockets.
//!
//! - [`ZmqRequestClient`] wraps a DEALER socket connected to one neighbor
//! - [`ZmqRequestServer`] wraps the ROUTER socket a node's responder binds
//! - [`ReplyToken`] carries the ZMQ identity frame needed to route a reply
//!
//! A reply whose requester already gave up (timed out) is not dropped: a
//! client built with [`ZmqRequestClient::connect_with_late_replies`]
//! forwards it to a channel instead.
//!
//! ## Framing (zeromq-rs 0.4)
//!
//! ROUTER pushes the peer identity as first frame on recv and pops it on
//! send. DEALER sends and receives raw application frames:
//! - DEALER sends: `[topic, envelope]`
//! - ROUTER receives: `[identity, topic, envelope]`
//! - ROUTER sends: `[identity, topic, envelope]`
//! - DEALER receives: `[topic, envelope]`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use crate::error::DistError;
use crate::message::Message;
use crate::traits::{RequestHandler, RequestSender};
use crate::transport::Transport;

/// Opaque token carrying the ZMQ routing identity of a requester.
#[derive(Debug, Clone)]
pub struct ReplyToken {
    identity: Vec<u8>,
}

impl ReplyToken {
    pub(crate) fn from_identity(identity: Vec<u8>) -> Self {
        Self { identity }
    }
}

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Message>>>>;

/// Where replies for unknown correlation ids go.
pub type LateReplies = mpsc::UnboundedSender<Message>;

/// Split `[.., topic, envelope]` frames, skipping empty delimiters.
fn decode_frames<'a>(frames: impl Iterator<Item = &'a [u8]>) -> Result<Message, DistError> {
    let data: Vec<_> = frames.skip_while(|f| f.is_empty()).collect();
    if data.len() < 2 {
        return Err(DistError::Transport(format!(
            "expected [topic, envelope] frames, got {}",
            data.len()
        )));
    }
    Ok(Message::from_bytes(data[1])?)
}

/// DEALER-socket client for one neighbor.
///
/// A background task owns the socket, multiplexing outbound requests from
/// an mpsc channel with inbound replies dispatched by `correlation_id`.
pub struct ZmqRequestClient {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: Pending,
    _loop_handle: tokio::task::JoinHandle<()>,
}

impl ZmqRequestClient {
    pub async fn connect(transport: &Transport) -> Result<Self, DistError> {
        Self::open(transport, None).await
    }

    /// Like [`ZmqRequestClient::connect`], forwarding replies that arrive
    /// after their request timed out to `late`.
    pub async fn connect_with_late_replies(transport: &Transport, late: LateReplies) -> Result<Self, DistError> {
        Self::open(transport, Some(late)).await
    }

    #[instrument(skip_all, fields(endpoint = %transport))]
    async fn open(transport: &Transport, late: Option<LateReplies>) -> Result<Self, DistError> {
        let mut socket = DealerSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting DEALER socket");
        socket.connect(&endpoint).await?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(256);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending, late).await;
        });

        Ok(Self {
            send_tx,
            pending,
            _loop_handle: loop_handle,
        })
    }

    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: Pending,
        late: Option<LateReplies>,
    ) {
        loop {
            tokio::select! {
                Some(zmq_msg) = send_rx.recv() => {
                    if let Err(e) = socket.send(zmq_msg).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => Self::dispatch_reply(&pending, late.as_ref(), zmq_msg).await,
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    async fn dispatch_reply(
        pending: &Mutex<HashMap<Uuid, oneshot::Sender<Message>>>,
        late: Option<&LateReplies>,
        zmq_msg: ZmqMessage,
    ) {
        let message = match decode_frames(zmq_msg.iter().map(|f| f.as_ref())) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping undecodable reply");
                return;
            }
        };
        let cid = message.correlation_id;
        let waiter = pending.lock().await.remove(&cid);
        // No waiter, or one that timed out just now: the requester gave up.
        let orphan = match waiter {
            Some(tx) => match tx.send(message) {
                Ok(()) => return,
                Err(message) => message,
            },
            None => message,
        };
        match late {
            Some(late) => {
                debug!(correlation_id = %cid, "forwarding late reply");
                if late.send(orphan).is_err() {
                    warn!(correlation_id = %cid, "late reply receiver gone, reply dropped");
                }
            }
            None => debug!(correlation_id = %cid, "reply for unknown correlation_id"),
        }
    }
}

#[async_trait]
impl RequestSender for ZmqRequestClient {
    /// Send a request and wait for the reply with the same `correlation_id`.
    async fn request(&self, msg: Message, timeout: Duration) -> Result<Message, DistError> {
        let cid = msg.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(cid, tx);

        let mut zmq_msg = ZmqMessage::from(msg.topic.as_str());
        zmq_msg.push_back(msg.to_bytes()?.into());
        if self.send_tx.send(zmq_msg).await.is_err() {
            self.pending.lock().await.remove(&cid);
            return Err(DistError::Transport("client event loop closed".into()));
        }
        debug!(correlation_id = %cid, topic = %msg.topic, "sent request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&cid);
                Err(DistError::Transport("reply channel closed unexpectedly".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&cid);
                Err(DistError::Timeout(timeout))
            }
        }
    }
}

/// ROUTER-socket server a node binds to receive take requests.
pub struct ZmqRequestServer {
    socket: Mutex<RouterSocket>,
}

impl ZmqRequestServer {
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, DistError> {
        transport
            .ensure_ipc_dir()
            .map_err(|e| DistError::Transport(e.to_string()))?;
        transport
            .remove_stale_socket()
            .map_err(|e| DistError::Transport(e.to_string()))?;
        let mut socket = RouterSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding ROUTER socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl RequestHandler for ZmqRequestServer {
    async fn recv_request(&self) -> Result<(ReplyToken, Message), DistError> {
        let zmq_msg = self.socket.lock().await.recv().await?;
        let mut frames = zmq_msg.iter().map(|f| f.as_ref());
        let identity = frames
            .next()
            .ok_or_else(|| DistError::Transport("ROUTER frame without identity".into()))?
            .to_vec();
        let message = decode_frames(frames)?;
        debug!(
            correlation_id = %message.correlation_id,
            topic = %message.topic,
            sender = %message.sender,
            "received request"
        );
        Ok((ReplyToken::from_identity(identity), message))
    }

    async fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), DistError> {
        let mut zmq_msg = ZmqMessage::from(token.identity);
        zmq_msg.push_back(reply.topic.as_bytes().to_vec().into());
        zmq_msg.push_back(reply.to_bytes()?.into());
        self.socket.lock().await.send(zmq_msg).await?;
        debug!(correlation_id = %reply.correlation_id, topic = %reply.topic, "sent reply");
        Ok(())
    }
}
