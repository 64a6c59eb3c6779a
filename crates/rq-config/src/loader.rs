//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &["config.toml", "rq-worker.toml", "./config/config.toml", "/etc/rq-worker/config.toml"];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("RQ_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("RQ_AMQP_URI") {
            config.amqp.uri = val;
        }
        if let Ok(val) = env::var("RQ_AMQP_QUEUE_NAME") {
            config.amqp.queue_name = val;
        }
        if let Ok(val) = env::var("RQ_AMQP_PREFETCH_COUNT") {
            if let Ok(count) = val.parse() {
                config.amqp.prefetch_count = count;
            }
        }
        if let Ok(val) = env::var("RQ_AMQP_DURABLE") {
            if let Ok(durable) = val.parse() {
                config.amqp.durable = durable;
            }
        }

        if let Ok(val) = env::var("RQ_REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("RQ_REDIS_GC_SAMPLE_RATE") {
            if let Ok(rate) = val.parse() {
                config.redis.gc_sample_rate = rate;
            }
        }

        if let Ok(val) = env::var("RQ_POLICY_TIMEOUT_SECONDS") {
            if let Ok(v) = val.parse() {
                config.policy.timeout_seconds = v;
            }
        }
        if let Ok(val) = env::var("RQ_POLICY_DELAY_SECONDS") {
            if let Ok(v) = val.parse() {
                config.policy.delay_seconds = v;
            }
        }
        if let Ok(val) = env::var("RQ_POLICY_ATTEMPTS_LIMIT") {
            if let Ok(v) = val.parse() {
                config.policy.attempts_limit = v;
            }
        }
        if let Ok(val) = env::var("RQ_POLICY_EXCEPTIONS_LIMIT") {
            if let Ok(v) = val.parse() {
                config.policy.exceptions_limit = v;
            }
        }

        if let Ok(val) = env::var("RQ_WORKER_POLL_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                config.worker.poll_timeout_ms = v;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_when_no_file_and_no_env_present() {
        let loader = ConfigLoader::with_path("/nonexistent/path/rq-worker.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.amqp.queue_name, AppConfig::default().amqp.queue_name);
    }

    #[test]
    fn explicit_path_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[amqp]\nqueue_name = \"orders\"\n").unwrap();

        let loader = ConfigLoader::with_path(file.path());
        let config = loader.load().unwrap();
        assert_eq!(config.amqp.queue_name, "orders");
    }
}
