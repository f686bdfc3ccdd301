//! Configuration loading for recorderd.
//!
//! Shared by the daemon and by clients: both sides must agree on the socket
//! location and on the directory exported buffers live in.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/recorderd/config.toml` (system)
//! 2. `~/.config/recorderd/config.toml` (user)
//! 3. `./recorderd.toml` (local override, or the path given on the command line)
//! 4. Environment variables (`RECORDERD_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! socket_dir = "/run/recorderd"
//! buffer_dir = "/dev/shm/recorderd"
//!
//! [bind]
//! endpoint = "ipc:///run/recorderd/recorderd.sock"
//!
//! [telemetry]
//! log_level = "info,recorderd=debug"
//!
//! [dispatch]
//! idle_timeout_secs = 30
//!
//! [client]
//! timeout_ms = 3000
//! heartbeat_ms = 5000
//!
//! [security]
//! privilege = "recorder"
//! granted = ["recorder"]
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use settings::{
    BindConfig, ClientConfig, DispatchConfig, PathsConfig, SecurityConfig, TelemetryConfig,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete recorderd configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

impl RecConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./recorderd.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, sources.files.last())?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// ZMQ endpoint of the daemon's ROUTER socket.
    pub fn endpoint(&self) -> String {
        if self.bind.endpoint.is_empty() {
            format!("ipc://{}/recorderd.sock", self.paths.socket_dir.display())
        } else {
            self.bind.endpoint.clone()
        }
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
