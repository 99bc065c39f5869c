use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub scheduler: SchedulerSettings,
    pub node: NodeSettings,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `HIVE_PROFILE`. When set (e.g. `BENCH`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("HIVE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            scheduler: SchedulerSettings::from_env_profiled(p),
            node: NodeSettings::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   workers={}, levels={}, repels={}, affinity={}",
            self.scheduler.workers,
            self.scheduler.priority_levels,
            self.scheduler.max_steal_repels,
            self.scheduler.affinity_enabled
        );
        tracing::info!(
            "  deque:       max={}",
            self.scheduler.deque_max_capacity
        );
        tracing::info!(
            "  node:        id={}, dist_config={}",
            self.node.node_id,
            self.node.dist_config.as_deref().unwrap_or("(none)")
        );
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Worker count, 0 = available parallelism.
    pub workers: usize,
    pub priority_levels: usize,
    pub max_steal_repels: u32,
    pub deque_max_capacity: usize,
    pub affinity_enabled: bool,
}

impl SchedulerSettings {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            workers: profiled_env_usize(p, "HIVE_WORKERS", 0),
            priority_levels: profiled_env_usize(p, "HIVE_PRIORITY_LEVELS", 4),
            max_steal_repels: profiled_env_u32(p, "HIVE_MAX_STEAL_REPELS", 0),
            deque_max_capacity: profiled_env_usize(p, "HIVE_DEQUE_MAX_CAPACITY", 1 << 20),
            affinity_enabled: profiled_env_bool(p, "HIVE_AFFINITY", true),
        }
    }
}

// ── Node ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub node_id: u32,
    /// Path to the distributed take protocol TOML file, if any.
    pub dist_config: Option<String>,
}

impl NodeSettings {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            node_id: profiled_env_u32(p, "HIVE_NODE_ID", 0),
            dist_config: profiled_env_opt(p, "HIVE_DIST_CONFIG"),
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.dist_config.is_some()
    }
}
