//! Run configuration: a TOML file covering the run, network and logging
//! sections, validated on load.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};

/// Upper bound on topology size; beyond this a partition is busywork.
const MAX_WORKERS: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub run: RunConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// What to process and with how many participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub workers: usize,
    /// Convolution backend: "host", "lanes" or "gpu".
    pub backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Coordinator listen address for the TCP topology.
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run: RunConfig {
                input: PathBuf::from("images/input.png"),
                output: PathBuf::from("images/output.png"),
                workers: 4,
                backend: "lanes".to_string(),
            },
            network: NetworkConfig {
                listen_addr: "127.0.0.1:4400".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_to_file: false,
                log_dir: PathBuf::from("logs"),
            },
        }
    }
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to disk atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.run.workers == 0 || self.run.workers > MAX_WORKERS {
            return Err(PipelineError::Config(format!(
                "workers must be between 1 and {MAX_WORKERS}"
            )));
        }

        match self.run.backend.as_str() {
            "host" | "lanes" | "gpu" => {}
            other => {
                return Err(PipelineError::Config(format!(
                    "backend must be host, lanes or gpu, got '{other}'"
                )))
            }
        }

        self.network
            .listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| {
                PipelineError::Config(format!(
                    "invalid listen address '{}': {e}",
                    self.network.listen_addr
                ))
            })?;

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(PipelineError::Config(format!(
                    "log level must be one of trace, debug, info, warn, error; got '{other}'"
                )))
            }
        }

        Ok(())
    }

    /// The parsed listen address. Call after `validate`.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.network.listen_addr.parse().map_err(|e| {
            PipelineError::Config(format!(
                "invalid listen address '{}': {e}",
                self.network.listen_addr
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.run.workers, 4);
        assert_eq!(config.run.backend, "lanes");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = PipelineConfig::default();
        config.run.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = PipelineConfig::default();
        config.run.backend = "tpu".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_listen_addr_rejected() {
        let mut config = PipelineConfig::default();
        config.network.listen_addr = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = PipelineConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("halopipe.toml");

        let original = PipelineConfig::default();
        original.save(&path).unwrap();
        assert!(path.exists());

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.run.workers, original.run.workers);
        assert_eq!(loaded.run.backend, original.run.backend);
        assert_eq!(loaded.network.listen_addr, original.network.listen_addr);

        // No temp file left behind.
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "run = \"nope\"").unwrap();
        assert!(PipelineConfig::load(&path).is_err());
    }
}
