//! Application configuration, loaded once at process startup from a TOML
//! file (spec §6 "Config"). Field defaults live in [`crate::defaults`],
//! following the teacher's `ServerConfig` pattern.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "crate::defaults::default_cluster_name")]
    pub cluster_name: String,

    #[serde(default = "crate::defaults::default_task_worker_pool_size")]
    pub task_worker_pool_size: usize,

    #[serde(default = "crate::defaults::default_health_worker_pool_size")]
    pub health_worker_pool_size: usize,

    #[serde(default = "crate::defaults::default_check_health_interval_sec")]
    pub check_health_interval_sec: u64,

    #[serde(default = "crate::defaults::default_sweep_page_size")]
    pub sweep_page_size: i64,

    /// Leader-election backend. Any value other than `"none"` requires
    /// `election_endpoints` to be non-empty. The election primitive itself
    /// is out of scope (spec §2 "Out of scope") — this only selects which
    /// `Elector` implementation the binary wires up.
    #[serde(default = "crate::defaults::default_election_driver")]
    pub election_driver: String,

    #[serde(default = "crate::defaults::default_election_endpoints")]
    pub election_endpoints: Vec<String>,

    #[serde(default = "crate::defaults::default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "crate::defaults::default_http_host")]
    pub http_host: String,

    #[serde(default = "crate::defaults::default_http_port")]
    pub http_port: u16,

    #[serde(default = "crate::defaults::default_pprof_port")]
    pub pprof_port: u16,

    #[serde(default = "crate::defaults::default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "crate::defaults::default_log_dir")]
    pub log_dir: String,

    #[serde(default = "crate::defaults::default_log_rotation_mb")]
    pub log_rotation_mb: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty document must parse against all-default fields")
    }
}

impl AppConfig {
    /// Field-by-field validation, mirroring `AgentConfig::validate()` in the
    /// teacher: each check produces a descriptive `CoreError::Config`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cluster_name.trim().is_empty() {
            return Err(CoreError::Config("cluster_name must not be empty".into()));
        }
        if self.task_worker_pool_size == 0 {
            return Err(CoreError::Config(
                "task_worker_pool_size must be greater than zero".into(),
            ));
        }
        if self.health_worker_pool_size == 0 {
            return Err(CoreError::Config(
                "health_worker_pool_size must be greater than zero".into(),
            ));
        }
        if self.check_health_interval_sec == 0 {
            return Err(CoreError::Config(
                "check_health_interval_sec must be greater than zero".into(),
            ));
        }
        if self.sweep_page_size <= 0 {
            return Err(CoreError::Config(
                "sweep_page_size must be greater than zero".into(),
            ));
        }
        match self.election_driver.as_str() {
            "none" => {}
            "etcd" | "redis" => {
                if self.election_endpoints.is_empty() {
                    return Err(CoreError::Config(format!(
                        "election_driver={} requires at least one election_endpoints entry",
                        self.election_driver
                    )));
                }
            }
            other => {
                return Err(CoreError::Config(format!(
                    "unknown election_driver: {other}"
                )));
            }
        }
        if self.sqlite_path.trim().is_empty() {
            return Err(CoreError::Config("sqlite_path must not be empty".into()));
        }
        if self.http_host.trim().is_empty() {
            return Err(CoreError::Config("http_host must not be empty".into()));
        }
        if self.http_port == 0 {
            return Err(CoreError::Config("http_port must not be zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.task_worker_pool_size, 100);
        assert_eq!(cfg.check_health_interval_sec, 5);
    }

    #[test]
    fn rejects_empty_cluster_name() {
        let mut cfg = AppConfig::default();
        cfg.cluster_name = "".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_election_without_endpoints() {
        let mut cfg = AppConfig::default();
        cfg.election_driver = "etcd".into();
        assert!(cfg.validate().is_err());
        cfg.election_endpoints.push("127.0.0.1:2379".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            cluster_name = "prod"
            http_port = 9090
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cluster_name, "prod");
        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.task_worker_pool_size, 100);
    }
}
