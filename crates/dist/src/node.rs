//! A node's side of the distributed take protocol.
//!
//! [`DistributedScheduler`] asks neighbors for work when the local driver
//! runs dry and gives whatever comes back to the local driver.
//! [`TakeResponder`] answers the requests neighbors send to this node.
//!
//! Tasks handed to a neighbor stay in flight on this node until the reply
//! carrying them is sent, and are given back locally if it cannot be.
//! On the asking side, replies the messenger reports as late are still
//! adopted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hive_core::{ContextId, Hint, Location, TaskHandle};
use hive_sched::Driver;

use crate::config::{DistConfig, ProtocolConfig};
use crate::error::DistError;
use crate::message::Message;
use crate::protocol::{TakeRequest, TakeResponse, TAKE_REQUEST, TAKE_RESPONSE};
use crate::take::{Neighbor, TakeProtocol};
use crate::traits::{Messenger, RequestHandler};

pub struct DistributedScheduler {
    node: Location,
    driver: Arc<Driver>,
    /// Service context the protocol gives and takes through.
    context: ContextId,
    messenger: Arc<dyn Messenger>,
    protocol: Mutex<TakeProtocol>,
    chunk_size: u32,
    request_timeout: Duration,
    shutting_down: AtomicBool,
    runtime: Handle,
}

impl DistributedScheduler {
    /// Join the protocol as `node`. Must be called from inside a tokio
    /// runtime, which later exchanges are spawned on; the driver must be
    /// running.
    pub fn new(
        node: Location,
        driver: Arc<Driver>,
        messenger: Arc<dyn Messenger>,
        neighbors: impl IntoIterator<Item = Location>,
        protocol: &ProtocolConfig,
    ) -> Result<Arc<Self>, DistError> {
        let runtime = Handle::try_current()
            .map_err(|e| DistError::Config(format!("distributed scheduler needs a tokio runtime: {e}")))?;
        let context = driver.open_context(Location(0))?;
        let take = TakeProtocol::new(neighbors.into_iter().filter(|n| *n != node), protocol.throttle_factor);
        info!(
            %node,
            neighbors = take.neighbors().len(),
            chunk_size = protocol.chunk_size,
            "distributed scheduler started"
        );
        let this = Arc::new(Self {
            node,
            driver,
            context,
            messenger,
            protocol: Mutex::new(take),
            chunk_size: protocol.chunk_size.max(1),
            request_timeout: protocol.request_timeout(),
            shutting_down: AtomicBool::new(false),
            runtime,
        });
        if let Some(late) = this.messenger.take_late_replies() {
            this.runtime
                .spawn(Self::collect_late_replies(Arc::downgrade(&this), late));
        }
        Ok(this)
    }

    pub fn from_config(
        config: &DistConfig,
        driver: Arc<Driver>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Arc<Self>, DistError> {
        Self::new(
            config.node,
            driver,
            messenger,
            config.neighbor_locations(),
            &config.protocol,
        )
    }

    pub fn node(&self) -> Location {
        self.node
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Snapshot of every neighbor record.
    pub fn neighbors(&self) -> Vec<Neighbor> {
        self.lock_protocol().neighbors().to_vec()
    }

    fn lock_protocol(&self) -> std::sync::MutexGuard<'_, TakeProtocol> {
        self.protocol.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The local node ran out of work; ask neighbors unless throttled.
    ///
    /// Safe to call from worker threads outside the runtime. Returns the
    /// spawned exchanges so callers (mostly tests) can await them.
    pub fn trigger(self: &Arc<Self>, requester: Option<Location>) -> Vec<JoinHandle<()>> {
        if self.is_shutting_down() {
            return Vec::new();
        }
        let targets = self.lock_protocol().on_local_exhaustion(requester);
        targets
            .into_iter()
            .map(|to| {
                let this = Arc::clone(self);
                self.runtime.spawn(async move { this.exchange(to).await })
            })
            .collect()
    }

    async fn exchange(&self, to: Location) {
        let request = TakeRequest {
            requester: self.node,
            max_tasks: self.chunk_size,
        };
        let outcome = match Message::new(TAKE_REQUEST, self.node, &request) {
            Ok(message) => self.messenger.send(to, message, self.request_timeout).await,
            Err(e) => Err(e.into()),
        };
        let response = outcome.and_then(|reply| reply.decode::<TakeResponse>().map_err(DistError::from));
        match response {
            Ok(response) => {
                let tasks = self.lock_protocol().on_response(to, &response);
                debug!(from = %to, tasks = tasks.len(), "take response");
                self.adopt(to, tasks);
            }
            Err(e) => {
                let unreachable = e.is_unreachable();
                warn!(neighbor = %to, error = %e, "take exchange failed");
                self.lock_protocol().on_send_failure(to, unreachable);
            }
        }
    }

    async fn collect_late_replies(this: Weak<Self>, mut late: mpsc::UnboundedReceiver<Message>) {
        while let Some(reply) = late.recv().await {
            let Some(this) = this.upgrade() else {
                break;
            };
            this.on_late_reply(reply);
        }
    }

    fn on_late_reply(&self, reply: Message) {
        if reply.topic != TAKE_RESPONSE {
            debug!(topic = %reply.topic, sender = %reply.sender, "ignoring late reply");
            return;
        }
        match reply.decode::<TakeResponse>() {
            Ok(response) => {
                let from = response.responder;
                let tasks = self.lock_protocol().on_late_response(from, &response);
                info!(%from, tasks = tasks.len(), "late take response");
                self.adopt(from, tasks);
            }
            Err(e) => warn!(sender = %reply.sender, error = %e, "undecodable late take response"),
        }
    }

    /// Give tasks received from `from` to the local driver.
    fn adopt(&self, from: Location, tasks: Vec<TaskHandle>) {
        for task in tasks {
            if let Err(e) = self.driver.give(self.context, task, &Hint::none()) {
                error!(%from, %task, error = %e, "received task could not be given locally");
            }
        }
    }

    /// Answer one take request whose reply is delivered in process, so
    /// the handed out tasks leave this node right away.
    pub fn respond(self: &Arc<Self>, request: &Message) -> Result<Message, DistError> {
        let (reply, tasks) = self.hand_out(request)?;
        self.settle(&tasks);
        Ok(reply)
    }

    /// Build the reply to `request`. The returned tasks are still in flight
    /// for this node until [`settle`](Self::settle) or
    /// [`restore`](Self::restore).
    fn hand_out(self: &Arc<Self>, request: &Message) -> Result<(Message, Vec<TaskHandle>), DistError> {
        if request.topic != TAKE_REQUEST {
            return Err(DistError::Transport(format!(
                "unexpected request topic '{}'",
                request.topic
            )));
        }
        let take: TakeRequest = request.decode()?;
        if self.is_shutting_down() {
            let reply = request.reply(TAKE_RESPONSE, self.node, &TakeResponse::closing(self.node))?;
            return Ok((reply, Vec::new()));
        }

        let max = take.max_tasks.min(self.chunk_size) as usize;
        let tasks = self.driver.take_batch(self.context, max)?;
        if tasks.is_empty() && max > 0 {
            self.trigger(Some(take.requester));
        }
        let response = TakeResponse {
            responder: self.node,
            tasks,
            shutting_down: false,
        };
        match request.reply(TAKE_RESPONSE, self.node, &response) {
            Ok(reply) => {
                debug!(requester = %take.requester, tasks = response.tasks.len(), "answered take request");
                Ok((reply, response.tasks))
            }
            Err(e) => {
                self.restore(&response.tasks);
                Err(e.into())
            }
        }
    }

    /// The reply carrying `tasks` went out; they belong to the requester now.
    fn settle(&self, tasks: &[TaskHandle]) {
        for task in tasks {
            if let Err(e) = self.driver.done(self.context, *task) {
                error!(%task, error = %e, "handed out task could not be released");
            }
        }
    }

    /// The reply carrying `tasks` never left; make them runnable here again.
    /// Each is given back before its take is released, so the node never
    /// looks idle in between.
    fn restore(&self, tasks: &[TaskHandle]) {
        for task in tasks {
            if let Err(e) = self.driver.give(self.context, *task, &Hint::none()) {
                error!(%task, error = %e, "undelivered task could not be given back");
            }
            if let Err(e) = self.driver.done(self.context, *task) {
                error!(%task, error = %e, "undelivered task could not be released");
            }
        }
        if !tasks.is_empty() {
            info!(tasks = tasks.len(), "kept tasks whose reply was not delivered");
        }
    }

    /// Stop asking for work and answer every further request as closing.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!(node = %self.node, "distributed scheduler shutting down");
        }
    }
}

impl std::fmt::Debug for DistributedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedScheduler")
            .field("node", &self.node)
            .field("context", &self.context)
            .field("chunk_size", &self.chunk_size)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Serves take requests arriving on a [`RequestHandler`].
pub struct TakeResponder {
    scheduler: Arc<DistributedScheduler>,
    close: Notify,
}

impl TakeResponder {
    pub fn new(scheduler: Arc<DistributedScheduler>) -> Self {
        Self {
            scheduler,
            close: Notify::new(),
        }
    }

    pub fn scheduler(&self) -> &Arc<DistributedScheduler> {
        &self.scheduler
    }

    pub fn respond(&self, request: &Message) -> Result<Message, DistError> {
        self.scheduler.respond(request)
    }

    /// Answer requests until [`TakeResponder::close`] is called.
    ///
    /// A request that cannot be answered, or whose reply cannot be sent, is
    /// logged and skipped; the requester sees it as a timeout and any tasks
    /// it would have carried stay on this node.
    pub async fn serve(&self, handler: &dyn RequestHandler) -> Result<(), DistError> {
        loop {
            let (token, request) = tokio::select! {
                _ = self.close.notified() => break,
                next = handler.recv_request() => match next {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(error = %e, "dropping unreadable request");
                        continue;
                    }
                },
            };
            let (reply, tasks) = match self.scheduler.hand_out(&request) {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(sender = %request.sender, error = %e, "take request not answered");
                    continue;
                }
            };
            match handler.send_reply(token, reply).await {
                Ok(()) => self.scheduler.settle(&tasks),
                Err(e) => {
                    warn!(sender = %request.sender, tasks = tasks.len(), error = %e, "take reply not sent");
                    self.scheduler.restore(&tasks);
                }
            }
        }
        info!(node = %self.scheduler.node(), "take responder stopped");
        Ok(())
    }

    pub fn close(&self) {
        self.close.notify_one();
    }
}
