use crate::core::{ColdQueryError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure parsed from a TOML file.
///
/// Every section and field is optional in the file; missing values take
/// their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sessions: SessionConfig,
    pub auth: AuthConfig,
}

/// Database and pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file
    pub path: String,
    pub pool_size: u32,
    /// How long a caller waits for a free connection
    pub pool_timeout_ms: u64,
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout_ms: u64,
    pub statement_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "coldquery.db".to_string(),
            pool_size: 10,
            pool_timeout_ms: 5000,
            busy_timeout_ms: 5000,
            statement_timeout_ms: None,
        }
    }
}

impl DatabaseConfig {
    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted and rolled back
    pub ttl_secs: u64,
    pub reaper_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ttl_secs: 30 * 60,
            reaper_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

/// Shared-secret gate configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub token: Option<String>,
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = coldquery::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| ColdQueryError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    toml::from_str(&content).map_err(|e| ColdQueryError::Config(format!("invalid {}: {}", path.display(), e)))
}

/// `<config_dir>/coldquery/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("coldquery").join("config.toml"))
}

/// Loads the effective configuration: the explicit file, else the default
/// file when it exists, else defaults; then environment overrides.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_config(&path)?,
            _ => Config::default(),
        },
    };
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ColdQueryError::Config(format!("{} has an invalid value '{}'", name, raw)))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ColdQueryError::Config(format!("{} has an invalid value '{}'", name, raw))),
    }
}

impl Config {
    /// Applies `COLDQUERY_*` overrides. `lookup` is `std::env::var` in the
    /// binary and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COLDQUERY_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("COLDQUERY_POOL_SIZE") {
            self.database.pool_size = parse_var("COLDQUERY_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("COLDQUERY_POOL_TIMEOUT_MS") {
            self.database.pool_timeout_ms = parse_var("COLDQUERY_POOL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("COLDQUERY_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_var("COLDQUERY_BUSY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("COLDQUERY_STATEMENT_TIMEOUT_MS") {
            self.database.statement_timeout_ms = Some(parse_var("COLDQUERY_STATEMENT_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("COLDQUERY_SESSION_TTL_SECS") {
            self.sessions.ttl_secs = parse_var("COLDQUERY_SESSION_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("COLDQUERY_REAPER_INTERVAL_SECS") {
            self.sessions.reaper_interval_secs = parse_var("COLDQUERY_REAPER_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("COLDQUERY_AUTH_ENABLED") {
            self.auth.enabled = parse_flag("COLDQUERY_AUTH_ENABLED", &v)?;
        }
        if let Some(v) = lookup("COLDQUERY_AUTH_TOKEN") {
            self.auth.token = Some(v);
        }
        Ok(())
    }

    /// Rejects configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let db = &self.database;
        if db.path.trim().is_empty() {
            return Err(ColdQueryError::Config("database.path must not be empty".to_string()));
        }
        // every pooled connection would get its own private database
        if db.path.trim() == ":memory:" {
            return Err(ColdQueryError::Config(
                "database.path must be a file; in-memory databases are not shared across connections".to_string(),
            ));
        }
        if db.pool_size == 0 {
            return Err(ColdQueryError::Config("database.pool_size must be at least 1".to_string()));
        }
        if db.pool_timeout_ms == 0 {
            return Err(ColdQueryError::Config("database.pool_timeout_ms must be positive".to_string()));
        }
        if db.statement_timeout_ms == Some(0) {
            return Err(ColdQueryError::Config(
                "database.statement_timeout_ms must be positive when set".to_string(),
            ));
        }
        if self.sessions.ttl_secs == 0 || self.sessions.reaper_interval_secs == 0 {
            return Err(ColdQueryError::Config(
                "sessions.ttl_secs and sessions.reaper_interval_secs must be positive".to_string(),
            ));
        }
        if self.auth.enabled && self.auth.token.as_deref().map_or(true, |t| t.is_empty()) {
            return Err(ColdQueryError::Config("auth.enabled requires auth.token".to_string()));
        }
        Ok(())
    }
}
