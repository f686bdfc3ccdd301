//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, RecConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// Returns existing files in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/recorderd/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("recorderd/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("recorderd.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file as a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Load a single config file on top of the compiled defaults.
pub fn load_from_file(path: &Path) -> Result<RecConfig, ConfigError> {
    let table = load_table(path)?;
    from_table(table, Some(&path.to_path_buf()))
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key, any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table; missing sections and keys take defaults.
pub fn from_table(table: toml::Table, origin: Option<&PathBuf>) -> Result<RecConfig, ConfigError> {
    let mut config: RecConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.cloned().unwrap_or_default(),
                message: e.to_string(),
            })?;

    config.paths.socket_dir = expand_path(&config.paths.socket_dir.to_string_lossy());
    config.paths.buffer_dir = expand_path(&config.paths.buffer_dir.to_string_lossy());

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut RecConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("RECORDERD_SOCKET_DIR") {
        config.paths.socket_dir = expand_path(&v);
        sources.env_overrides.push("RECORDERD_SOCKET_DIR".to_string());
    }
    if let Ok(v) = env::var("RECORDERD_BUFFER_DIR") {
        config.paths.buffer_dir = expand_path(&v);
        sources.env_overrides.push("RECORDERD_BUFFER_DIR".to_string());
    }
    if let Ok(v) = env::var("RECORDERD_ENDPOINT") {
        config.bind.endpoint = v;
        sources.env_overrides.push("RECORDERD_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("RECORDERD_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RECORDERD_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RECORDERD_CLIENT_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.client.timeout_ms = ms;
            sources.env_overrides.push("RECORDERD_CLIENT_TIMEOUT_MS".to_string());
        }
    }
}

/// Expand a leading `~/` or `$VAR/` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(pos) => (&stripped[..pos], Some(&stripped[pos + 1..])),
            None => (stripped, None),
        };
        return match (env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        };
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(contents: &str) -> RecConfig {
        let table: toml::Table = contents.parse().unwrap();
        from_table(table, None).unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/buffers");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("buffers"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/dev/shm/rec"), PathBuf::from("/dev/shm/rec"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[paths]
buffer_dir = "/tmp/recbufs"
"#,
        );
        assert_eq!(config.paths.buffer_dir, PathBuf::from("/tmp/recbufs"));
        assert_eq!(config.paths.socket_dir, PathBuf::from("/tmp"));
        assert_eq!(config.dispatch.idle_timeout_secs, 30);
        assert_eq!(
            config.client.heartbeat_interval(),
            Some(std::time::Duration::from_secs(5))
        );
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[paths]
socket_dir = "/run/rec"
buffer_dir = "/dev/shm/rec"

[bind]
endpoint = "tcp://0.0.0.0:5590"

[telemetry]
log_level = "debug"

[dispatch]
idle_timeout_secs = 10
reap_interval_secs = 2

[client]
timeout_ms = 500
heartbeat_ms = 0

[security]
privilege = "http://tizen.org/privilege/recorder"
granted = ["http://tizen.org/privilege/recorder", "camera"]
"#,
        );

        assert_eq!(config.paths.socket_dir, PathBuf::from("/run/rec"));
        assert_eq!(config.endpoint(), "tcp://0.0.0.0:5590");
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.dispatch.idle_timeout().as_secs(), 10);
        assert_eq!(config.client.timeout().as_millis(), 500);
        assert_eq!(config.client.heartbeat_interval(), None);
        assert_eq!(config.security.granted.len(), 2);
    }

    #[test]
    fn test_merge_later_wins_per_key() {
        let mut base: toml::Table = r#"
[paths]
socket_dir = "/run/a"
buffer_dir = "/dev/shm/a"
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = r#"
[paths]
buffer_dir = "/dev/shm/b"
"#
        .parse()
        .unwrap();

        merge_tables(&mut base, overlay);
        let config = from_table(base, None).unwrap();

        assert_eq!(config.paths.socket_dir, PathBuf::from("/run/a"));
        assert_eq!(config.paths.buffer_dir, PathBuf::from("/dev/shm/b"));
    }

    #[test]
    fn test_bad_type_is_parse_error() {
        let table: toml::Table = "[client]\ntimeout_ms = \"soon\"\n".parse().unwrap();
        assert!(matches!(
            from_table(table, None),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\nidle_timeout_secs = 7").unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.dispatch.idle_timeout_secs, 7);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = load_table(Path::new("/nonexistent/recorderd.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }
}
