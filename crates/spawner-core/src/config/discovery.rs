//! Configuration resolution

use super::types::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("TOML parsing error in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Environment variable holds an unusable value
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    /// Resolved configuration is inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Path to config file
    pub config_path: Option<PathBuf>,
    /// Override socket directory
    pub socket_dir: Option<PathBuf>,
    /// Override selector socket name
    pub selector_name: Option<String>,
    /// Override maximum busy workers
    pub max_processes: Option<usize>,
    /// Override worker command (empty = keep)
    pub worker_command: Vec<String>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables (`SPAWNER_SOCKET_DIR`, `SPAWNER_SELECTOR_NAME`,
///    `SPAWNER_MAX_PROCESSES`)
/// 3. Config file named by `--config`
/// 4. Defaults
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    let mut config = match overrides.config_path {
        Some(ref path) => load_config_file(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config)?;
    apply_cli_overrides(&mut config, overrides);
    validate(&config)?;

    debug!(
        "Resolved config: socket={} max_processes={:?}",
        config.selector_socket_path().display(),
        config.workers.max_processes
    );
    Ok(config)
}

/// Load config from a TOML file
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Check invariants the rest of the system relies on.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let name = &config.selector.name;
    if name.is_empty() || name.contains('/') {
        return Err(ConfigError::Invalid(format!(
            "selector name {name:?} must be a non-empty file name"
        )));
    }
    if config.workers.max_processes == Some(0) {
        return Err(ConfigError::Invalid(
            "max_processes must be at least 1 (omit it for no limit)".to_string(),
        ));
    }
    if config.workers.startup_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "startup_timeout_secs must be positive".to_string(),
        ));
    }
    if config.workers.self_test_timeout_ms == 0 || config.selector.accept_poll_ms == 0 {
        return Err(ConfigError::Invalid(
            "self_test_timeout_ms and accept_poll_ms must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(dir) = std::env::var("SPAWNER_SOCKET_DIR")
        && !dir.is_empty()
    {
        config.selector.socket_dir = PathBuf::from(dir);
    }

    if let Ok(name) = std::env::var("SPAWNER_SELECTOR_NAME")
        && !name.is_empty()
    {
        config.selector.name = name;
    }

    if let Ok(value) = std::env::var("SPAWNER_MAX_PROCESSES") {
        config.workers.max_processes = parse_max_processes(&value)?;
    }

    Ok(())
}

/// `"unbounded"`/`"none"`/empty clear the limit; anything else must be a count.
fn parse_max_processes(value: &str) -> Result<Option<usize>, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "none" | "unbounded" => Ok(None),
        other => other
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: "SPAWNER_MAX_PROCESSES",
                value: value.to_string(),
            }),
    }
}

/// Apply command-line overrides
fn apply_cli_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(ref dir) = overrides.socket_dir {
        config.selector.socket_dir = dir.clone();
    }

    if let Some(ref name) = overrides.selector_name {
        config.selector.name = name.clone();
    }

    if let Some(max) = overrides.max_processes {
        config.workers.max_processes = Some(max);
    }

    if !overrides.worker_command.is_empty() {
        config.workers.command = overrides.worker_command.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        unsafe {
            std::env::remove_var("SPAWNER_SOCKET_DIR");
            std::env::remove_var("SPAWNER_SELECTOR_NAME");
            std::env::remove_var("SPAWNER_MAX_PROCESSES");
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_sources() {
        clear_env();
        let config = resolve_config(&ConfigOverrides::default()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("SPAWNER_SOCKET_DIR", "/tmp/env-pool");
            std::env::set_var("SPAWNER_SELECTOR_NAME", "env-selector");
            std::env::set_var("SPAWNER_MAX_PROCESSES", "3");
        }

        let config = resolve_config(&ConfigOverrides::default()).unwrap();
        assert_eq!(config.selector.socket_dir, PathBuf::from("/tmp/env-pool"));
        assert_eq!(config.selector.name, "env-selector");
        assert_eq!(config.workers.max_processes, Some(3));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_unbounded_clears_file_limit() {
        clear_env();
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("spawner.toml");
        std::fs::write(&path, "[workers]\nmax_processes = 8\n").unwrap();
        unsafe {
            std::env::set_var("SPAWNER_MAX_PROCESSES", "unbounded");
        }

        let overrides = ConfigOverrides {
            config_path: Some(path),
            ..Default::default()
        };
        let config = resolve_config(&overrides).unwrap();
        assert_eq!(config.workers.max_processes, None);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_an_error() {
        clear_env();
        unsafe {
            std::env::set_var("SPAWNER_MAX_PROCESSES", "lots");
        }

        let err = resolve_config(&ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "SPAWNER_MAX_PROCESSES", .. }));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_cli_overrides_beat_env_and_file() {
        clear_env();
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("spawner.toml");
        std::fs::write(
            &path,
            "[selector]\nname = \"from-file\"\n[workers]\ncommand = [\"file-worker\"]\n",
        )
        .unwrap();
        unsafe {
            std::env::set_var("SPAWNER_SELECTOR_NAME", "from-env");
        }

        let overrides = ConfigOverrides {
            config_path: Some(path),
            selector_name: Some("from-cli".to_string()),
            max_processes: Some(2),
            worker_command: vec!["cli-worker".to_string(), "--fast".to_string()],
            ..Default::default()
        };
        let config = resolve_config(&overrides).unwrap();
        assert_eq!(config.selector.name, "from-cli");
        assert_eq!(config.workers.max_processes, Some(2));
        assert_eq!(config.workers.command, vec!["cli-worker", "--fast"]);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_config_file_is_an_error() {
        clear_env();
        let overrides = ConfigOverrides {
            config_path: Some(PathBuf::from("/nonexistent/spawner.toml")),
            ..Default::default()
        };
        assert!(matches!(
            resolve_config(&overrides),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_malformed_config_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "[workers\nmax_processes = ").unwrap();
        assert!(matches!(
            load_config_file(&path),
            Err(ConfigError::TomlParse { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_max_processes() {
        let mut config = Config::default();
        config.workers.max_processes = Some(0);
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_nested_selector_name() {
        let mut config = Config::default();
        config.selector.name = "a/b".to_string();
        assert!(validate(&config).is_err());
        config.selector.name = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_parse_max_processes() {
        assert_eq!(parse_max_processes("4").unwrap(), Some(4));
        assert_eq!(parse_max_processes(" None ").unwrap(), None);
        assert_eq!(parse_max_processes("").unwrap(), None);
        assert!(parse_max_processes("-1").is_err());
    }
}
