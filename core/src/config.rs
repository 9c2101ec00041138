use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Network settings for the `dynad` daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Concurrent client connections accepted before new ones wait
    pub max_connections: usize,
    /// Close a client connection after this long without a request
    pub idle_timeout_secs: u64,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 20060,
            max_connections: 100,
            idle_timeout_secs: 300,
            log_level: "info".to_string(),
        }
    }
}

/// Storage engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file path, `sqlite:///path` URL, or `:memory:`
    pub database_url: String,
    /// Pooled connections (forced to 1 for in-memory databases)
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    /// Deadline applied to every operation; 0 disables it
    pub operation_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "./dyna.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
            operation_timeout_ms: 30_000,
        }
    }
}

/// Where the database lives, after URL prefixes are stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            ..Self::default()
        }
    }

    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            database_url: path.as_ref().display().to_string(),
            ..Self::default()
        }
    }

    pub fn location(&self) -> DatabaseLocation {
        let url = self.database_url.trim();
        let path = ["sqlite+aiosqlite:///", "sqlite:///", "sqlite://", "sqlite:"]
            .iter()
            .find_map(|prefix| url.strip_prefix(prefix))
            .unwrap_or(url);

        if path.is_empty() || path == ":memory:" {
            DatabaseLocation::Memory
        } else {
            DatabaseLocation::File(PathBuf::from(path))
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_ms > 0).then(|| Duration::from_millis(self.operation_timeout_ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load config from a TOML file, then apply `DYNADB_*` environment
    /// overrides. `DYNADB_CONFIG` replaces the path; a missing file means
    /// defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = env::var("DYNADB_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let mut cfg = match fs::read_to_string(&path) {
            Ok(s) => toml::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };
        cfg.apply_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DYNADB_DATABASE_URL").or_else(|| lookup("SQL_DATABASE_URL")) {
            self.storage.database_url = v;
        }

        if let Some(v) = lookup("DYNADB_HOST") {
            self.server.host = v;
        }

        if let Some(p) = lookup("DYNADB_PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.server.port = p;
        }

        if let Some(v) = lookup("DYNADB_LOG") {
            self.server.log_level = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 7000

            [storage]
            database_url = ":memory:"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 7000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.storage.location(), DatabaseLocation::Memory);
        assert_eq!(cfg.storage.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SQL_DATABASE_URL", "sqlite+aiosqlite:///./test.db"),
            ("DYNADB_PORT", "not a port"),
            ("DYNADB_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(
            cfg.storage.location(),
            DatabaseLocation::File(PathBuf::from("./test.db"))
        );
        assert_eq!(cfg.server.port, 20060);
        assert_eq!(cfg.server.log_level, "debug");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.server.port, 20060);
    }

    #[test]
    fn test_operation_timeout_zero_disables() {
        let storage = StorageConfig {
            operation_timeout_ms: 0,
            ..StorageConfig::default()
        };
        assert_eq!(storage.operation_timeout(), None);
    }
}
