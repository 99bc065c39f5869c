use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hive_core::{AffinityKey, ContextId, HiveError, Hint, Location, TaskHandle};

use crate::driver::Driver;
use crate::idle::IdleNotifier;
use crate::resolver::{MapResolver, TaskState};
use crate::runlevel::{RunLevel, RunlevelManager};
use crate::types::{Count, CountScope, SchedulerConfig};

fn t(n: u64) -> TaskHandle {
    TaskHandle::new(n)
}

fn started(workers: usize) -> Arc<Driver> {
    Driver::new(SchedulerConfig::with_workers(workers))
        .unwrap()
        .started()
        .unwrap()
}

const C0: ContextId = ContextId(0);
const C1: ContextId = ContextId(1);

#[derive(Default)]
struct RecordingNotifier {
    idle: Mutex<Vec<Location>>,
    ready: AtomicUsize,
}

impl IdleNotifier for RecordingNotifier {
    fn idle(&self, worker: Location) {
        self.idle.lock().unwrap().push(worker);
    }

    fn ready(&self, _worker: Option<Location>) {
        self.ready.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn give_take_done_bookkeeping() {
    let d = started(2);
    d.give(C0, t(1), &Hint::none()).unwrap();
    d.give(C0, t(2), &Hint::none()).unwrap();
    assert_eq!(d.outstanding(), 2);

    assert_eq!(d.take(C0).unwrap(), Some(t(2)));
    assert_eq!(d.outstanding(), 2, "taken tasks stay outstanding until done");
    d.done(C0, t(2)).unwrap();
    assert_eq!(d.outstanding(), 1);

    let err = d.done(C0, t(2)).unwrap_err();
    assert!(matches!(err, HiveError::ProtocolViolation(_)));
    let err = d.done(C1, t(1)).unwrap_err();
    assert!(matches!(err, HiveError::ProtocolViolation(_)), "done must come from the taker");
}

#[test]
fn empty_handle_is_rejected() {
    let d = started(1);
    let err = d.give(C0, TaskHandle::EMPTY, &Hint::none()).unwrap_err();
    assert!(matches!(err, HiveError::ProtocolViolation(_)));
    assert_eq!(d.outstanding(), 0);
}

#[test]
fn give_requires_running_driver() {
    let d = Driver::new(SchedulerConfig::with_workers(1)).unwrap();
    let err = d.give(C0, t(1), &Hint::none()).unwrap_err();
    assert!(matches!(err, HiveError::NotRunning(_)));
}

#[test]
fn unknown_context_is_reported() {
    let d = started(2);
    let err = d.take(ContextId(9)).unwrap_err();
    assert!(matches!(err, HiveError::UnknownContext(ContextId(9))));
    assert_eq!(d.outstanding(), 0);
    assert!(d.give(ContextId(9), t(1), &Hint::none()).is_err());
    assert_eq!(d.outstanding(), 0, "failed give leaves no trace");
}

#[test]
fn register_context_is_one_time() {
    let d = started(2);
    d.register_context(C1, Location(1)).unwrap();
    let err = d.register_context(C1, Location(0)).unwrap_err();
    assert!(matches!(err, HiveError::ProtocolViolation(_)));
    let err = d.register_context(C1, Location(7)).unwrap_err();
    assert!(matches!(err, HiveError::ProtocolViolation(_)));
}

#[test]
fn contexts_are_bound_at_compute_ok() {
    let d = Driver::new(SchedulerConfig::with_workers(2)).unwrap();
    let d = Arc::new(d);
    let mut mgr = RunlevelManager::new();
    mgr.register(d.clone());

    mgr.bring_up_to(RunLevel::MemoryOk).unwrap();
    assert_eq!(d.context_count(), 2);
    let err = d.take(C0).unwrap_err();
    assert!(matches!(err, HiveError::ProtocolViolation(_)), "unbound context");

    // An early explicit binding survives bring-up.
    d.register_context(C0, Location(0)).unwrap();
    mgr.bring_up().unwrap();
    assert!(d.is_accepting());
    assert_eq!(d.take(C1).unwrap(), None);
}

#[test]
fn tear_down_stops_gives_and_frees_contexts() {
    let d = Arc::new(Driver::new(SchedulerConfig::with_workers(2)).unwrap());
    let mut mgr = RunlevelManager::new();
    mgr.register(d.clone());
    mgr.bring_up().unwrap();
    d.give(C0, t(1), &Hint::none()).unwrap();

    mgr.tear_down().unwrap();
    assert!(!d.is_accepting());
    assert!(matches!(
        d.give(C0, t(2), &Hint::none()),
        Err(HiveError::NotRunning(_))
    ));
    assert_eq!(d.context_count(), 0);
}

#[test]
fn give_resolved_uses_task_state() {
    let resolver = Arc::new(MapResolver::new());
    resolver.insert(
        t(5),
        TaskState {
            priority: Some(0),
            ..TaskState::default()
        },
    );
    let d = Driver::new(SchedulerConfig::with_workers(1))
        .unwrap()
        .with_resolver(resolver)
        .started()
        .unwrap();

    d.give_resolved(C0, t(6)).unwrap();
    d.give_resolved(C0, t(5)).unwrap();
    assert_eq!(d.take(C0).unwrap(), Some(t(5)), "resolved priority 0 runs first");
    assert_eq!(d.take(C0).unwrap(), Some(t(6)));
}

#[test]
fn give_resolved_without_resolver() {
    let d = started(1);
    let err = d.give_resolved(C0, t(1)).unwrap_err();
    assert!(matches!(err, HiveError::Config(_)));
}

#[test]
fn affinity_group_released_by_done() {
    let d = started(2);
    let key = AffinityKey(21);
    d.create_affinity_group(key);
    d.give(C0, t(1), &Hint::affinity(key)).unwrap();
    assert_eq!(d.count(CountScope::Staging), Count::Exact(1));

    let task = d.take(C1).unwrap().unwrap();
    assert_eq!(task, t(1));
    assert_eq!(d.take(C1).unwrap(), None);
    assert!(d.retire_affinity_group(key).is_err(), "task still in flight");

    d.done(C1, task).unwrap();
    d.retire_affinity_group(key).unwrap();
    assert_eq!(d.metrics().affinity_groups, 0);
}

#[test]
fn duplicate_handle_is_handed_out_and_released() {
    let d = started(2);
    let key = AffinityKey(22);
    d.create_affinity_group(key);
    d.give(C0, t(7), &Hint::affinity(key)).unwrap();
    d.give(C0, t(7), &Hint::affinity(key)).unwrap();

    assert_eq!(d.take(C1).unwrap(), Some(t(7)));
    assert_eq!(d.take(C1).unwrap(), Some(t(7)), "second copy is not dropped");
    assert_eq!(d.outstanding(), 2);
    assert_eq!(d.take(C1).unwrap(), None);

    d.done(C1, t(7)).unwrap();
    assert!(d.retire_affinity_group(key).is_err(), "one copy still in flight");
    d.done(C1, t(7)).unwrap();
    assert_eq!(d.outstanding(), 0);
    d.retire_affinity_group(key).unwrap();
}

#[test]
fn take_batch_stops_when_empty() {
    let d = started(2);
    for n in 1..=5 {
        d.give(C0, t(n), &Hint::none()).unwrap();
    }
    let batch = d.take_batch(C1, 3).unwrap();
    assert_eq!(batch, vec![t(1), t(2), t(3)], "thief batch comes from the old end");
    let rest = d.take_batch(C1, 10).unwrap();
    assert_eq!(rest.len(), 2);
    assert!(d.take_batch(C1, 4).unwrap().is_empty());
}

#[test]
fn idle_and_ready_are_notified() {
    let notifier = Arc::new(RecordingNotifier::default());
    let d = Driver::new(SchedulerConfig::with_workers(2))
        .unwrap()
        .with_idle_notifier(notifier.clone())
        .started()
        .unwrap();

    assert_eq!(d.take(C1).unwrap(), None);
    d.give(C0, t(1), &Hint::none()).unwrap();
    assert_eq!(*notifier.idle.lock().unwrap(), vec![Location(1)]);
    assert_eq!(notifier.ready.load(Ordering::SeqCst), 1);
}

#[test]
fn open_context_shares_a_worker_container() {
    let d = started(2);
    let service = d.open_context(Location(1)).unwrap();
    assert_eq!(service, ContextId(2));

    d.give(service, t(8), &Hint::none()).unwrap();
    assert_eq!(d.count(CountScope::Worker(Location(1))), Count::Exact(1));
    assert_eq!(d.take(C1).unwrap(), Some(t(8)));
    assert!(d.open_context(Location(5)).is_err());
}

#[test]
fn metrics_reflect_activity() {
    let d = started(2);
    d.give(C0, t(1), &Hint::none()).unwrap();
    d.give(C0, t(2), &Hint::none()).unwrap();
    let own = d.take(C0).unwrap().unwrap();
    let stolen = d.take(C1).unwrap().unwrap();
    d.done(C0, own).unwrap();
    d.done(C1, stolen).unwrap();
    assert_eq!(d.take(C1).unwrap(), None);

    let m = d.metrics();
    assert_eq!(m.workers, 2);
    assert_eq!(m.gives, 2);
    assert_eq!(m.takes_own, 1);
    assert_eq!(m.steals, 1);
    assert_eq!(m.empty_takes, 1);
    assert_eq!(m.done, 2);
    assert_eq!(m.outstanding, 0);
    assert_eq!(m.max_load, 2);
    assert_eq!(m.contexts.len(), 2);
    assert_eq!(m.contexts[1].stolen, 1);

    let json = serde_json::to_value(&m).unwrap();
    assert_eq!(json["steals"], 1);
}
