//! Configuration: a TOML file under `~/.lore/`, overridden by `LORE_*`
//! environment variables. Every setting has a safe default except the
//! server database path, which `lore serve` requires explicitly.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoreConfig {
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub redact: RedactConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub project: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub half_life_days: f64,
    pub default_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RedactConfig {
    pub enabled: bool,
    /// Extra `(pattern, label)` layers on top of the built-ins.
    pub patterns: Vec<RedactPatternConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedactPatternConfig {
    pub pattern: String,
    pub label: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path of the server database. The only setting without a safe
    /// default — `lore serve` refuses to start without it.
    pub database: Option<String>,
    pub rate_limit_per_minute: u32,
    pub log_level: String,
}

impl Default for LoreConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            retrieval: RetrievalConfig::default(),
            redact: RedactConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: lore_home()
                .join("lessons.db")
                .to_string_lossy()
                .into_owned(),
            project: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            half_life_days: crate::score::DEFAULT_HALF_LIFE_DAYS,
            default_limit: 5,
        }
    }
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: Vec::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8765,
            database: None,
            rate_limit_per_minute: 100,
            log_level: "info".into(),
        }
    }
}

/// Where lore keeps its files: `~/.lore/`.
pub fn lore_home() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".lore")
}

impl LoreConfig {
    /// Read `~/.lore/config.toml`, then let `LORE_*` variables win.
    pub fn load() -> Result<Self> {
        Self::load_from(lore_home().join("config.toml"))
    }

    /// Same, from an explicit path. A missing file is not an error — the
    /// defaults stand in for it.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("invalid config TOML at {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("cannot read config at {}", path.display()))
            }
        };
        config.override_from_env();
        Ok(config)
    }

    /// Environment beats file: LORE_DB, LORE_PROJECT, LORE_LOG_LEVEL,
    /// LORE_DATABASE, LORE_PORT, LORE_RATE_LIMIT.
    fn override_from_env(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if let Some(db_path) = var("LORE_DB") {
            self.storage.db_path = db_path;
        }
        if let Some(project) = var("LORE_PROJECT") {
            self.storage.project = Some(project);
        }
        if let Some(level) = var("LORE_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(database) = var("LORE_DATABASE") {
            self.server.database = Some(database);
        }
        if let Some(port) = var("LORE_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(ceiling) = var("LORE_RATE_LIMIT").and_then(|v| v.parse().ok()) {
            self.server.rate_limit_per_minute = ceiling;
        }
    }

    /// The embedded database location, with a leading `~/` expanded to the
    /// caller's home directory.
    pub fn resolved_db_path(&self) -> PathBuf {
        match self.storage.db_path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .expect("home directory must exist")
                .join(rest),
            None => PathBuf::from(&self.storage.db_path),
        }
    }

    /// Custom redaction patterns as the `(pattern, label)` pairs the
    /// redactor consumes.
    pub fn redact_patterns(&self) -> Vec<(String, String)> {
        self.redact
            .patterns
            .iter()
            .map(|p| (p.pattern.clone(), p.label.clone()))
            .collect()
    }
}
