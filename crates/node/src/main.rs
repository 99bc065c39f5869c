//! hive-node: a worker pool on a scheduler driver, optionally taking part
//! in the distributed take protocol.
//!
//! The node seeds itself with synthetic tasks, runs them on one thread per
//! worker, and prints the scheduler metrics as JSON when it stops. With a
//! distributed config it also serves take requests and asks its
//! neighbors for work whenever a worker comes up empty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use hive_core::{AffinityKey, ContextId, Hint, Location, TaskHandle};
use hive_dist::{DistConfig, DistributedScheduler, TakeResponder, ZmqMessenger, ZmqRequestServer};
use hive_sched::{Driver, ParkingNotifier, RunlevelManager, SchedulerConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Run a hive scheduling node.
#[derive(Parser, Debug)]
#[command(name = "hive-node", version, about)]
struct Cli {
    /// Worker threads (overrides HIVE_WORKERS; 0 = available parallelism).
    #[arg(long)]
    workers: Option<usize>,

    /// Synthetic tasks to seed this node with.
    #[arg(long, env = "HIVE_NODE_TASKS", default_value_t = 10_000)]
    tasks: u64,

    /// Spread seeded tasks over this many affinity groups (0 = none).
    #[arg(long, env = "HIVE_NODE_AFFINITY_GROUPS", default_value_t = 0)]
    affinity_groups: u64,

    /// Simulated run time per task, in microseconds.
    #[arg(long, env = "HIVE_NODE_WORK_US", default_value_t = 50)]
    work_us: u64,

    /// Distributed take protocol config (TOML). Overrides HIVE_DIST_CONFIG.
    #[arg(long)]
    dist_config: Option<String>,

    /// Exit once every local task is done instead of waiting for Ctrl-C.
    #[arg(long, env = "HIVE_NODE_EXIT_WHEN_IDLE")]
    exit_when_idle: bool,
}

/// Handles are unique across nodes: the node id fills the upper bits.
fn task_handle(node: u32, n: u64) -> TaskHandle {
    TaskHandle::new((u64::from(node) << 40) | n)
}

// ── Distributed mode ────────────────────────────────────────────────

struct DistNode {
    scheduler: Arc<DistributedScheduler>,
    responder: Arc<TakeResponder>,
    serving: tokio::task::JoinHandle<Result<(), hive_dist::DistError>>,
}

async fn join_ring(path: &str, driver: &Arc<Driver>) -> anyhow::Result<DistNode> {
    let config = DistConfig::from_file(path).with_context(|| format!("loading {path}"))?;
    info!(
        node = %config.node,
        listen = %config.listen,
        neighbors = config.neighbors.len(),
        "joining distributed ring"
    );

    let server = ZmqRequestServer::bind(&config.listen_transport()?).await?;
    let messenger = Arc::new(ZmqMessenger::connect(&config.neighbors).await?);
    let scheduler = DistributedScheduler::from_config(&config, Arc::clone(driver), messenger)?;
    let responder = Arc::new(TakeResponder::new(Arc::clone(&scheduler)));
    let serving = {
        let responder = Arc::clone(&responder);
        tokio::spawn(async move { responder.serve(&server).await })
    };
    Ok(DistNode {
        scheduler,
        responder,
        serving,
    })
}

// ── Workers ─────────────────────────────────────────────────────────

fn spawn_worker(
    worker: u32,
    driver: Arc<Driver>,
    notifier: Arc<ParkingNotifier>,
    dist: Option<Arc<DistributedScheduler>>,
    stop: Arc<AtomicBool>,
    work: Duration,
) -> thread::JoinHandle<u64> {
    thread::spawn(move || {
        let ctx = ContextId(worker);
        let loc = Location(worker);
        let mut ran = 0u64;
        while !stop.load(Ordering::Acquire) {
            match driver.take(ctx) {
                Ok(Some(task)) => {
                    if !work.is_zero() {
                        thread::sleep(work);
                    }
                    if let Err(e) = driver.done(ctx, task) {
                        warn!(worker, %task, error = %e, "done failed");
                    }
                    ran += 1;
                }
                Ok(None) => {
                    if let Some(dist) = &dist {
                        dist.trigger(None);
                    }
                    notifier.park_timeout(loc, Duration::from_millis(10));
                }
                Err(e) => {
                    warn!(worker, error = %e, "take failed, stopping worker");
                    break;
                }
            }
        }
        ran
    })
}

/// Every seeded group is staged at once, so staging must hold them all.
fn check_affinity_groups(config: &SchedulerConfig, groups: u64) -> anyhow::Result<()> {
    if !config.affinity {
        return Ok(());
    }
    let capacity = config.staging_capacity();
    if groups > capacity as u64 {
        anyhow::bail!(
            "--affinity-groups {groups} exceeds the staging capacity of {capacity} \
             ({} slots of {} groups each)",
            config.resolved_staging_slots(),
            config.staging_slot_capacity
        );
    }
    Ok(())
}

fn seed(driver: &Driver, node: u32, tasks: u64, groups: u64) -> anyhow::Result<()> {
    check_affinity_groups(driver.config(), groups)?;
    let ctx = driver.open_context(Location(0))?;
    let levels = driver.config().priority_levels.max(1) as u64;
    for g in 0..groups {
        driver.create_affinity_group(AffinityKey(g));
    }
    for n in 1..=tasks {
        let mut hint = Hint::priority((n % levels) as u32);
        if groups > 0 {
            hint.affinity = Some(AffinityKey(n % groups));
        }
        driver.give(ctx, task_handle(node, n), &hint)?;
    }
    info!(tasks, groups, "seeded tasks");
    Ok(())
}

async fn wait_for_stop(driver: &Driver, exit_when_idle: bool) {
    if !exit_when_idle {
        let _ = tokio::signal::ctrl_c().await;
        return;
    }
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            _ = tick.tick() => {
                if driver.outstanding() == 0 {
                    return;
                }
            }
        }
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    hive_core::config::load_dotenv();
    let config = hive_core::Config::from_env();
    config.log_summary();

    let mut sched_config = SchedulerConfig::from(&config.scheduler);
    if let Some(workers) = cli.workers {
        sched_config.workers = workers;
    }
    let workers = sched_config.resolved_workers();
    let notifier = Arc::new(ParkingNotifier::new(workers));
    let driver = Arc::new(Driver::new(sched_config)?.with_idle_notifier(notifier.clone()));

    let mut runlevels = RunlevelManager::new();
    runlevels.register(driver.clone());
    runlevels.bring_up().context("bringing the scheduler up")?;

    let dist_path = cli.dist_config.clone().or(config.node.dist_config.clone());
    let dist = match dist_path.as_deref() {
        Some(path) => Some(join_ring(path, &driver).await?),
        None => None,
    };
    let node_id = dist
        .as_ref()
        .map(|d| d.scheduler.node().0)
        .unwrap_or(config.node.node_id);

    seed(&driver, node_id, cli.tasks, cli.affinity_groups)?;

    let stop = Arc::new(AtomicBool::new(false));
    let work = Duration::from_micros(cli.work_us);
    let handles: Vec<_> = (0..workers as u32)
        .map(|w| {
            spawn_worker(
                w,
                Arc::clone(&driver),
                Arc::clone(&notifier),
                dist.as_ref().map(|d| Arc::clone(&d.scheduler)),
                Arc::clone(&stop),
                work,
            )
        })
        .collect();
    info!(workers, node = node_id, "hive-node running");

    wait_for_stop(&driver, cli.exit_when_idle).await;

    info!("stopping workers");
    stop.store(true, Ordering::Release);
    notifier.unpark_all();
    let ran = tokio::task::spawn_blocking(move || {
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(0))
            .collect::<Vec<_>>()
    })
    .await?;
    info!(?ran, "workers stopped");

    if let Some(dist) = dist {
        dist.scheduler.shutdown();
        dist.responder.close();
        dist.serving.await??;
    }
    runlevels.tear_down().context("tearing the scheduler down")?;

    println!("{}", serde_json::to_string_pretty(&driver.metrics())?);
    Ok(())
}
