//! Configuration loading and parsing.
//!
//! ```toml
//! [marshal]
//! call_event = "<<marshal-call>>"
//! queue_warn_depth = 1024
//! poll_budget = 64
//!
//! [log]
//! filter = "info"
//!
//! [demo]
//! workers = 3
//! ```
//!
//! Every section and field is optional. A missing file is not an error.

use std::path::{Path, PathBuf};
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;

use marshal_types::{DEFAULT_CALL_EVENT, EventName};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "MARSHAL_CONFIG";

const fn default_queue_warn_depth() -> usize {
    1024
}

const fn default_poll_budget() -> usize {
    64
}

const fn default_workers() -> usize {
    3
}

fn default_call_event() -> EventName {
    DEFAULT_CALL_EVENT.to_event_name()
}

#[derive(Debug, Default, Deserialize)]
pub struct MarshalConfig {
    #[serde(default)]
    pub marshal: MarshalSection,
    pub log: Option<LogConfig>,
    pub demo: Option<DemoConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MarshalSection {
    /// Symbolic event proxy calls are delivered on.
    #[serde(default = "default_call_event")]
    pub call_event: EventName,
    /// Pending-call depth above which a warning is logged. 0 disables it.
    #[serde(default = "default_queue_warn_depth")]
    pub queue_warn_depth: usize,
    /// Notifications handled per `RunLoop::poll` batch.
    #[serde(default = "default_poll_budget")]
    pub poll_budget: usize,
}

impl Default for MarshalSection {
    fn default() -> Self {
        Self {
            call_event: default_call_event(),
            queue_warn_depth: default_queue_warn_depth(),
            poll_budget: default_poll_budget(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"marshal_core=debug"`.
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DemoConfig {
    /// Worker threads spawned by the demo binary.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl MarshalConfig {
    /// Load from [`config_path`]. `Ok(None)` when no file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.log.as_ref().and_then(|log| log.filter.as_deref())
    }

    #[must_use]
    pub fn demo_workers(&self) -> usize {
        self.demo
            .as_ref()
            .map_or_else(default_workers, |demo| demo.workers)
    }
}

/// `$MARSHAL_CONFIG`, else `~/.marshal/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".marshal").join("config.toml"))
}
