//! Integration tests for the scheduler driver under real worker threads.
//!
//! Tests verify that every given task is taken exactly once, that idle
//! workers steal from busy ones, and that affinity groups are drained
//! without losing or duplicating work.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use hive_core::{AffinityKey, ContextId, Hint, Location, TaskHandle};
use hive_sched::{Driver, ParkingNotifier, SchedulerConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn driver(config: SchedulerConfig) -> Arc<Driver> {
    Driver::new(config).unwrap().started().unwrap()
}

fn t(n: u64) -> TaskHandle {
    TaskHandle::new(n)
}

/// Run `workers` threads that take and complete tasks until `stop` is set
/// and the driver has nothing outstanding. Returns what each worker ran.
fn run_workers(d: &Arc<Driver>, workers: usize, stop: &Arc<AtomicBool>) -> Vec<Vec<TaskHandle>> {
    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let d = Arc::clone(d);
            let stop = Arc::clone(stop);
            thread::spawn(move || {
                let ctx = ContextId(w as u32);
                let mut ran = Vec::new();
                loop {
                    match d.take(ctx).unwrap() {
                        Some(task) => {
                            ran.push(task);
                            d.done(ctx, task).unwrap();
                        }
                        None if stop.load(Ordering::Acquire) && d.outstanding() == 0 => break,
                        None => thread::yield_now(),
                    }
                }
                ran
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn no_loss_no_duplication_under_concurrent_take() {
    init_tracing();
    let workers = 4;
    let per_producer = 2_000u64;
    let d = driver(SchedulerConfig::with_workers(workers));
    let stop = Arc::new(AtomicBool::new(false));

    // Two producers give into their own containers while all four take.
    let producers: Vec<_> = (0..2u32)
        .map(|p| {
            let d = Arc::clone(&d);
            let service = d.open_context(Location(p)).unwrap();
            thread::spawn(move || {
                for n in 0..per_producer {
                    let task = t(u64::from(p) * 1_000_000 + n + 1);
                    let hint = Hint::priority((n % 4) as u32);
                    d.give(service, task, &hint).unwrap();
                }
            })
        })
        .collect();

    let consumers = {
        let d = Arc::clone(&d);
        let stop = Arc::clone(&stop);
        thread::spawn(move || run_workers(&d, workers, &stop))
    };
    for p in producers {
        p.join().unwrap();
    }
    stop.store(true, Ordering::Release);
    let ran = consumers.join().unwrap();

    let mut seen = HashSet::new();
    for task in ran.iter().flatten() {
        assert!(seen.insert(*task), "{task} ran twice");
    }
    assert_eq!(seen.len() as u64, 2 * per_producer, "every task ran");

    let m = d.metrics();
    assert_eq!(m.outstanding, 0);
    assert_eq!(m.done, 2 * per_producer);
}

#[test]
fn idle_workers_drain_busy_workers() {
    init_tracing();
    let d = driver(SchedulerConfig::with_workers(4));

    // Ten tasks land on workers 0 and 1; workers 2 and 3 take everything.
    for n in 1..=10u64 {
        let ctx = ContextId((n % 2) as u32);
        d.give(ctx, t(n), &Hint::none()).unwrap();
    }

    let taken = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(2));
    let thieves: Vec<_> = [2u32, 3]
        .into_iter()
        .map(|w| {
            let d = Arc::clone(&d);
            let taken = Arc::clone(&taken);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ctx = ContextId(w);
                barrier.wait();
                // A contended victim can make one round come up empty.
                loop {
                    match d.take(ctx).unwrap() {
                        Some(task) => {
                            taken.lock().unwrap().push(task);
                            d.done(ctx, task).unwrap();
                        }
                        None if d.outstanding() == 0 => break,
                        None => thread::yield_now(),
                    }
                }
            })
        })
        .collect();
    for h in thieves {
        h.join().unwrap();
    }

    let taken = taken.lock().unwrap();
    let unique: HashSet<_> = taken.iter().copied().collect();
    assert_eq!(taken.len(), 10);
    assert_eq!(unique, (1..=10).map(t).collect());
    assert_eq!(d.outstanding(), 0);
    assert_eq!(d.metrics().steals, 10);
    assert_eq!(d.take(ContextId(0)).unwrap(), None);
    assert_eq!(d.take(ContextId(1)).unwrap(), None);
}

#[test]
fn steal_round_terminates_when_idle() {
    let d = driver(SchedulerConfig::with_workers(8));
    for w in 0..8 {
        for _ in 0..3 {
            assert_eq!(d.take(ContextId(w)).unwrap(), None);
        }
    }
    assert_eq!(d.metrics().empty_takes, 24);
}

#[test]
fn affinity_groups_survive_concurrent_drain() {
    init_tracing();
    let workers = 4;
    let d = driver(SchedulerConfig {
        workers,
        deque_max_capacity: 1 << 14,
        ..SchedulerConfig::default()
    });
    let keys: Vec<_> = (1..=3).map(AffinityKey).collect();
    for key in &keys {
        d.create_affinity_group(*key);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let consumers = {
        let d = Arc::clone(&d);
        let stop = Arc::clone(&stop);
        thread::spawn(move || run_workers(&d, workers, &stop))
    };

    let service = d.open_context(Location(0)).unwrap();
    let total = 3_000u64;
    for n in 1..=total {
        let key = keys[(n % 3) as usize];
        d.give(service, t(n), &Hint::affinity(key)).unwrap();
        if n % 500 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    stop.store(true, Ordering::Release);
    let ran = consumers.join().unwrap();

    let all: Vec<_> = ran.into_iter().flatten().collect();
    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(all.len() as u64, total);
    assert_eq!(unique.len() as u64, total);

    // Every group is idle again and can be retired.
    for key in keys {
        d.retire_affinity_group(key).unwrap();
    }
}

#[test]
fn parked_worker_wakes_on_give() {
    let notifier = Arc::new(ParkingNotifier::new(2));
    let d = Driver::new(SchedulerConfig::with_workers(2))
        .unwrap()
        .with_idle_notifier(notifier.clone())
        .started()
        .unwrap();

    let worker = {
        let d = Arc::clone(&d);
        let notifier = Arc::clone(&notifier);
        thread::spawn(move || loop {
            if let Some(task) = d.take(ContextId(1)).unwrap() {
                d.done(ContextId(1), task).unwrap();
                return task;
            }
            notifier.park_timeout(Location(1), Duration::from_millis(50));
        })
    };

    thread::sleep(Duration::from_millis(20));
    d.give(ContextId(0), t(42), &Hint::none()).unwrap();
    assert_eq!(worker.join().unwrap(), t(42));
}
