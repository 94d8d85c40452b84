//! Configuration management for the dispatch server (spec §1.3): loading,
//! validating, and reloading a `server.toml` into a [`taskcore::config::AppConfig`].
//! Grounded on the teacher's `ConfigManager` load/reload pattern.

use anyhow::{Context, Result};
use std::path::PathBuf;
use taskcore::config::AppConfig;
use tracing::{debug, info};

const SERVER_CONFIG_FILE: &str = "server.toml";

pub struct ConfigManager {
    pub config_path: PathBuf,
    pub app_config: Option<AppConfig>,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_path = if config_path.is_dir() {
            config_path.join(SERVER_CONFIG_FILE)
        } else {
            config_path
        };

        if !config_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                config_path.display()
            ));
        }

        let mut manager = Self {
            config_path,
            app_config: None,
        };
        manager.load_config()?;
        Ok(manager)
    }

    pub fn load_config(&mut self) -> Result<()> {
        info!("loading server configuration from {}", self.config_path.display());

        let config_content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("failed to read {}", self.config_path.display()))?;

        let app_config: AppConfig = toml::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", self.config_path.display()))?;

        app_config
            .validate()
            .with_context(|| format!("invalid server configuration in {}", self.config_path.display()))?;

        debug!(
            cluster = %app_config.cluster_name,
            http_port = app_config.http_port,
            sqlite_path = %app_config.sqlite_path,
            "server configuration loaded"
        );

        self.app_config = Some(app_config);
        Ok(())
    }

    /// Returns `Ok(true)` if the reloaded config differs from what was loaded
    /// before, restoring the prior config on parse/validation failure so the
    /// server keeps running with a known-good configuration.
    pub fn reload_config(&mut self) -> Result<bool> {
        let old = self.app_config.clone();
        match self.load_config() {
            Ok(()) => {
                let changed = old.as_ref() != self.app_config.as_ref();
                Ok(changed)
            }
            Err(e) => {
                self.app_config = old;
                Err(e)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.app_config.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_minimal_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"cluster_name = "test-cluster""#).unwrap();
        let manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        assert!(manager.is_loaded());
        assert_eq!(manager.app_config.unwrap().cluster_name, "test-cluster");
    }

    #[test]
    fn rejects_missing_file() {
        let result = ConfigManager::new(PathBuf::from("/nonexistent/server.toml"));
        assert!(result.is_err());
    }
}
