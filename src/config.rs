//! Configuration types for evalpool-rs.
//!
//! ```yaml
//! model:
//!   path: models/classifier.json
//!   device: cpu
//!   engine: dense
//! pool:
//!   size: 4
//! run:
//!   threads: 8
//!   iterations: 1000
//! ```

use serde::Deserialize;
use std::path::PathBuf;

use crate::engine::Device;
use crate::error::{EvalPoolError, Result};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model configuration.
    #[serde(default)]
    pub model: ModelConfig,

    /// Pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Batch run configuration.
    #[serde(default)]
    pub run: RunConfig,
}

/// Model configuration.
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    /// Path to the model artifact.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Device to load replicas on.
    #[serde(default = "default_device")]
    pub device: String,

    /// Engine used to load the artifact.
    #[serde(default = "default_engine")]
    pub engine: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            device: default_device(),
            engine: default_engine(),
        }
    }
}

impl ModelConfig {
    /// Parse the configured device.
    pub fn device(&self) -> Result<Device> {
        self.device.parse()
    }
}

/// Pool configuration.
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// Number of model replicas.
    #[serde(default = "default_pool_size")]
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
        }
    }
}

/// Batch run configuration.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Worker threads feeding the pool; defaults to the pool size.
    #[serde(default)]
    pub threads: Option<usize>,

    /// Number of evaluations in a run.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: None,
            iterations: default_iterations(),
        }
    }
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_engine() -> String {
    "dense".to_string()
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_iterations() -> usize {
    100
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EvalPoolError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that can never produce a working pool.
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            return Err(EvalPoolError::config("pool.size must be at least 1"));
        }
        if self.run.threads == Some(0) {
            return Err(EvalPoolError::config("run.threads must be at least 1"));
        }
        self.model.device()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert!(config.model.path.is_none());
        assert_eq!(config.model.device().unwrap(), Device::Cpu);
        assert_eq!(config.model.engine, "dense");
        assert!(config.pool.size >= 1);
        assert_eq!(config.run.iterations, 100);
        assert!(config.run.threads.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
model:
  path: models/classifier.json
  device: "gpu:1"
  engine: native
pool:
  size: 4
run:
  threads: 8
  iterations: 1000
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.model.path.as_deref(),
            Some(std::path::Path::new("models/classifier.json"))
        );
        assert_eq!(config.model.device().unwrap(), Device::Gpu(1));
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.run.threads, Some(8));
        assert_eq!(config.run.iterations, 1000);
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_yaml_str("pool:\n  size: 0\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = Config::from_yaml_str("model:\n  device: tpu\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = Config::from_yaml_str("pool: [").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
