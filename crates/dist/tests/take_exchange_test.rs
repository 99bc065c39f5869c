//! Integration tests for the take protocol between in-process nodes.
//!
//! Nodes are wired through a `LoopbackNetwork`, so every exchange goes
//! through the MessagePack envelope without opening sockets.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use hive_core::{ContextId, Hint, Location, TaskHandle};
use hive_dist::{
    DistributedScheduler, LoopbackNetwork, NeighborStatus, ProtocolConfig, TakeResponder,
};
use hive_sched::{Driver, SchedulerConfig};

const SETTLE: Duration = Duration::from_millis(50);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn protocol() -> ProtocolConfig {
    ProtocolConfig {
        throttle_factor: 20,
        chunk_size: 4,
        request_timeout_ms: 200,
    }
}

struct TestNode {
    driver: Arc<Driver>,
    scheduler: Arc<DistributedScheduler>,
    _responder: Arc<TakeResponder>,
}

impl TestNode {
    fn join(net: &Arc<LoopbackNetwork>, id: u32, neighbors: &[u32]) -> Self {
        let driver = Driver::new(SchedulerConfig::with_workers(2))
            .unwrap()
            .started()
            .unwrap();
        let scheduler = DistributedScheduler::new(
            Location(id),
            Arc::clone(&driver),
            net.clone(),
            neighbors.iter().copied().map(Location),
            &protocol(),
        )
        .unwrap();
        let responder = Arc::new(TakeResponder::new(Arc::clone(&scheduler)));
        net.register(&responder);
        Self {
            driver,
            scheduler,
            _responder: responder,
        }
    }

    fn load(&self, first: u64, count: u64) {
        for n in first..first + count {
            self.driver
                .give(ContextId(0), TaskHandle::new(n), &Hint::none())
                .unwrap();
        }
    }

    /// Take and complete everything this node holds.
    fn drain(&self) -> Vec<TaskHandle> {
        let mut ran = Vec::new();
        for w in 0..2 {
            while let Some(task) = self.driver.take(ContextId(w)).unwrap() {
                self.driver.done(ContextId(w), task).unwrap();
                ran.push(task);
            }
        }
        ran
    }

    fn status_of(&self, neighbor: u32) -> hive_dist::Neighbor {
        self.scheduler
            .neighbors()
            .into_iter()
            .find(|n| n.location == Location(neighbor))
            .unwrap()
    }
}

async fn finish(handles: Vec<tokio::task::JoinHandle<()>>) {
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn starving_node_receives_a_chunk() {
    init_tracing();
    let net = LoopbackNetwork::new();
    let a = TestNode::join(&net, 0, &[1]);
    let b = TestNode::join(&net, 1, &[0]);
    b.load(1, 10);

    let handles = a.scheduler.trigger(None);
    assert_eq!(handles.len(), 1);
    finish(handles).await;

    assert_eq!(a.driver.outstanding(), 4);
    assert_eq!(b.driver.outstanding(), 6);
    let n = a.status_of(1);
    assert_eq!(n.status, NeighborStatus::Idle);
    assert_eq!(n.tasks_received, 4);

    // Every task runs exactly once across both nodes.
    let mut all = a.drain();
    all.extend(b.drain());
    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(all.len(), 10);
    assert_eq!(unique.len(), 10);
}

#[tokio::test]
async fn repeated_exhaustion_sends_one_request() {
    let net = LoopbackNetwork::new();
    let a = TestNode::join(&net, 0, &[1, 2]);
    let _b = TestNode::join(&net, 1, &[0]);
    let _c = TestNode::join(&net, 2, &[0]);

    let first = a.scheduler.trigger(None);
    assert_eq!(first.len(), 2);
    // Throttled until factor * (neighbors - 1) exhaustions pass.
    for _ in 0..19 {
        assert!(a.scheduler.trigger(None).is_empty());
    }
    finish(first).await;
    assert!(a.scheduler.neighbors().iter().all(|n| n.requests_sent == 1));
}

#[tokio::test]
async fn empty_responder_asks_others_but_not_the_requester() {
    init_tracing();
    let net = LoopbackNetwork::new();
    let a = TestNode::join(&net, 0, &[1]);
    let b = TestNode::join(&net, 1, &[0, 2]);
    let c = TestNode::join(&net, 2, &[1]);
    c.load(100, 10);

    finish(a.scheduler.trigger(None)).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(a.driver.outstanding(), 0, "b had nothing to hand out");
    assert_eq!(b.status_of(0).requests_sent, 0, "the requester is not asked back");
    assert_eq!(b.status_of(2).tasks_received, 4);
    assert_eq!(b.driver.outstanding(), 4);
    assert_eq!(c.driver.outstanding(), 6);
}

#[tokio::test]
async fn shutting_down_neighbor_stops_accepting() {
    let net = LoopbackNetwork::new();
    let a = TestNode::join(&net, 0, &[1]);
    let b = TestNode::join(&net, 1, &[0]);
    b.load(1, 3);
    b.scheduler.shutdown();

    finish(a.scheduler.trigger(None)).await;
    assert!(!a.status_of(1).can_accept_requests);
    assert_eq!(a.driver.outstanding(), 0);
    assert_eq!(b.driver.outstanding(), 3, "a closing node keeps its work");
}

#[tokio::test]
async fn unreachable_neighbor_is_dropped() {
    let net = LoopbackNetwork::new();
    let a = TestNode::join(&net, 0, &[1, 2]);
    let _b = TestNode::join(&net, 1, &[0]);
    let c = TestNode::join(&net, 2, &[0]);
    c.load(1, 2);
    net.set_reachable(Location(1), false);

    finish(a.scheduler.trigger(None)).await;
    let b_status = a.status_of(1);
    assert!(!b_status.can_accept_requests);
    assert_eq!(b_status.failures, 1);
    assert_eq!(a.driver.outstanding(), 2);

    // The failure made the next exhaustion trigger straight away.
    let retry = a.scheduler.trigger(None);
    assert_eq!(retry.len(), 1, "only the reachable neighbor is asked");
    finish(retry).await;
}

#[tokio::test]
async fn timeout_counts_as_failure() {
    let net = LoopbackNetwork::new();
    let a = TestNode::join(&net, 0, &[1]);
    let b = TestNode::join(&net, 1, &[0]);
    b.load(1, 4);
    net.set_delay(Location(1), Duration::from_secs(1));

    finish(a.scheduler.trigger(None)).await;
    let n = a.status_of(1);
    assert_eq!(n.status, NeighborStatus::Idle);
    assert_eq!(n.failures, 1);
    assert!(n.can_accept_requests, "a slow node is retried");
    assert_eq!(b.driver.outstanding(), 4, "nothing was taken");
}
