//! Centralized default-value functions for `#[serde(default = "...")]`
//! fields on [`crate::config::AppConfig`]. Kept as free functions, one per
//! field, the way the teacher's `shared::defaults` module does it.

// --- cluster / election ---

pub fn default_cluster_name() -> String {
    "default".to_string()
}

pub fn default_election_driver() -> String {
    "none".to_string()
}

pub fn default_election_endpoints() -> Vec<String> {
    Vec::new()
}

// --- worker pools ---

pub fn default_task_worker_pool_size() -> usize {
    100
}

pub fn default_health_worker_pool_size() -> usize {
    100
}

pub fn default_check_health_interval_sec() -> u64 {
    5
}

pub fn default_sweep_page_size() -> i64 {
    1000
}

// --- storage ---

pub fn default_sqlite_path() -> String {
    "./data/task.db".to_string()
}

// --- http ---

pub fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_http_port() -> u16 {
    8080
}

pub fn default_pprof_port() -> u16 {
    6060
}

pub fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

// --- logging ---

pub fn default_log_dir() -> String {
    "./logs".to_string()
}

pub fn default_log_rotation_mb() -> u64 {
    100
}

// --- task-level defaults, used by `NewTask` when a caller omits them ---

pub fn default_max_run_time_sec() -> i64 {
    30
}

/// `allowMaxRunTimes` used for periodic (interval/cron) tasks: effectively
/// unbounded per spec §3 invariants ("TimeInterval/TimeCron -> max int").
pub fn unbounded_run_times() -> i64 {
    i64::MAX
}
