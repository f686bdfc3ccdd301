//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Filesystem locations shared by the daemon and its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory for the daemon's IPC socket.
    /// Default: /tmp
    #[serde(default = "PathsConfig::default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Directory holding exported audio buffers. Both sides must agree on it,
    /// an export key is only meaningful relative to this directory.
    /// Default: /dev/shm/recorderd
    #[serde(default = "PathsConfig::default_buffer_dir")]
    pub buffer_dir: PathBuf,
}

impl PathsConfig {
    fn default_socket_dir() -> PathBuf {
        PathBuf::from("/tmp")
    }

    fn default_buffer_dir() -> PathBuf {
        PathBuf::from("/dev/shm/recorderd")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            socket_dir: Self::default_socket_dir(),
            buffer_dir: Self::default_buffer_dir(),
        }
    }
}

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BindConfig {
    /// ZMQ endpoint for the ROUTER socket. Empty means
    /// `ipc://{socket_dir}/recorderd.sock`.
    #[serde(default)]
    pub endpoint: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// EnvFilter directive (trace, debug, info, warn, error, or a full filter).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Daemon dispatch loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// A peer silent for this long is treated as disconnected and its session
    /// goes through the shutdown sequence.
    /// Default: 30
    #[serde(default = "DispatchConfig::default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often idle peers are looked for.
    /// Default: 5
    #[serde(default = "DispatchConfig::default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl DispatchConfig {
    fn default_idle_timeout_secs() -> u64 {
        30
    }

    fn default_reap_interval_secs() -> u64 {
        5
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: Self::default_idle_timeout_secs(),
            reap_interval_secs: Self::default_reap_interval_secs(),
        }
    }
}

/// Client-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bounded wait for a Return, in milliseconds.
    /// Default: 3000
    #[serde(default = "ClientConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Keepalive interval in milliseconds, so a quiet client is not reaped
    /// as idle. Keep it well below `dispatch.idle_timeout_secs`. Zero disables.
    /// Default: 5000
    #[serde(default = "ClientConfig::default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl ClientConfig {
    fn default_timeout_ms() -> u64 {
        3_000
    }

    fn default_heartbeat_ms() -> u64 {
        5_000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_ms > 0).then(|| Duration::from_millis(self.heartbeat_ms))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            heartbeat_ms: Self::default_heartbeat_ms(),
        }
    }
}

/// Privilege policy for CREATE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Privilege a peer must hold to create a recorder.
    /// Default: recorder
    #[serde(default = "SecurityConfig::default_privilege")]
    pub privilege: String,

    /// Privileges granted to connecting peers.
    /// Default: ["recorder"]
    #[serde(default = "SecurityConfig::default_granted")]
    pub granted: Vec<String>,
}

impl SecurityConfig {
    fn default_privilege() -> String {
        "recorder".to_string()
    }

    fn default_granted() -> Vec<String> {
        vec!["recorder".to_string()]
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            privilege: Self::default_privilege(),
            granted: Self::default_granted(),
        }
    }
}
