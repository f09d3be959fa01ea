//! Configuration for the taskboard server.
//!
//! Settings are layered file → environment → CLI. The file is
//! `taskboard.toml` in the working directory unless `--config` names
//! another one; a missing default file simply yields the defaults.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3142
//! dev_mode = false
//!
//! [database]
//! path = ".taskboard/taskboard.db"
//!
//! [ordering]
//! weight_increment = 200.0
//!
//! [auth]
//! access_token_ttl_secs = 900
//! refresh_token_ttl_secs = 1209600
//! reset_token_ttl_secs = 3600
//! expose_reset_tokens = false
//!
//! [attachments]
//! dir = ".taskboard/attachments"
//! max_bytes = 10485760
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ordering::{DEFAULT_WEIGHT_INCREMENT, WeightedOrdering};

pub const DEFAULT_CONFIG_FILE: &str = "taskboard.toml";

const PORT_ENV: &str = "TASKBOARD_PORT";
const DB_PATH_ENV: &str = "TASKBOARD_DB_PATH";
const ATTACHMENTS_DIR_ENV: &str = "TASKBOARD_ATTACHMENTS_DIR";
const LOG_LEVEL_ENV: &str = "TASKBOARD_LOG_LEVEL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub ordering: OrderingSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub attachments: AttachmentsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a local frontend dev server.
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderingSection {
    #[serde(default = "default_weight_increment")]
    pub weight_increment: f64,
}

impl Default for OrderingSection {
    fn default() -> Self {
        Self {
            weight_increment: default_weight_increment(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: i64,
    #[serde(default = "default_reset_ttl")]
    pub reset_token_ttl_secs: i64,
    /// Return password reset tokens in the API response. Development only:
    /// there is no mail delivery, so this is the only way to complete a reset
    /// without reading the server log.
    #[serde(default)]
    pub expose_reset_tokens: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            reset_token_ttl_secs: default_reset_ttl(),
            expose_reset_tokens: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsSection {
    #[serde(default = "default_attachments_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for AttachmentsSection {
    fn default() -> Self {
        Self {
            dir: default_attachments_dir(),
            max_bytes: default_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3142
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskboard/taskboard.db")
}

fn default_weight_increment() -> f64 {
    DEFAULT_WEIGHT_INCREMENT
}

fn default_access_ttl() -> i64 {
    15 * 60
}

fn default_refresh_ttl() -> i64 {
    14 * 24 * 60 * 60
}

fn default_reset_ttl() -> i64 {
    60 * 60
}

fn default_attachments_dir() -> PathBuf {
    PathBuf::from(".taskboard/attachments")
}

fn default_max_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values given on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: bool,
}

impl BoardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    /// Load an explicitly named file (which must exist), else
    /// `taskboard.toml` in the working directory if present, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Configuration file does not exist: {}", path.display());
            }
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Full resolution used by the CLI: file, then environment, then flags.
    pub fn resolve(explicit: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        let mut config = Self::load_or_default(explicit)?;
        config.apply_env_overrides()?;
        config.apply_cli_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", PORT_ENV, port))?;
        }
        if let Some(path) = lookup(DB_PATH_ENV) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ATTACHMENTS_DIR_ENV) {
            self.attachments.dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ref path) = cli.db_path {
            self.database.path = path.clone();
        }
        if cli.dev_mode {
            self.server.dev_mode = true;
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let increment = self.ordering.weight_increment;
        if !increment.is_finite() || increment <= 0.0 {
            problems.push(format!(
                "ordering.weight_increment must be a positive number, got {}",
                increment
            ));
        }
        for (name, ttl) in [
            ("auth.access_token_ttl_secs", self.auth.access_token_ttl_secs),
            ("auth.refresh_token_ttl_secs", self.auth.refresh_token_ttl_secs),
            ("auth.reset_token_ttl_secs", self.auth.reset_token_ttl_secs),
        ] {
            if ttl <= 0 {
                problems.push(format!("{} must be greater than zero, got {}", name, ttl));
            }
        }
        if self.attachments.max_bytes == 0 {
            problems.push("attachments.max_bytes must be greater than zero".to_string());
        }

        if !problems.is_empty() {
            bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
        }
        Ok(())
    }

    pub fn ordering(&self) -> WeightedOrdering {
        WeightedOrdering::new(self.ordering.weight_increment)
    }

    pub fn bind_address(&self) -> String {
        if self.server.dev_mode {
            format!("0.0.0.0:{}", self.server.port)
        } else {
            format!("{}:{}", self.server.host, self.server.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = BoardConfig::default();
        assert_eq!(config.server.port, 3142);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.ordering.weight_increment, 200.0);
        assert_eq!(config.auth.access_token_ttl_secs, 900);
        assert_eq!(config.auth.refresh_token_ttl_secs, 1_209_600);
        assert_eq!(config.auth.reset_token_ttl_secs, 3600);
        assert!(!config.auth.expose_reset_tokens);
        assert_eq!(config.attachments.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let content = r#"
[server]
port = 8080

[ordering]
weight_increment = 1000.0

[logging]
format = "json"
"#;
        let config = BoardConfig::parse(content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.ordering().increment(), 1000.0);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.database.path, PathBuf::from(".taskboard/taskboard.db"));
    }

    #[test]
    fn test_parse_rejects_malformed_toml() {
        assert!(BoardConfig::parse("[server\nport = ").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BoardConfig::default();
        config.ordering.weight_increment = 0.0;
        config.auth.reset_token_ttl_secs = -1;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("weight_increment"));
        assert!(err.contains("reset_token_ttl_secs"));
    }

    #[test]
    fn test_env_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TASKBOARD_PORT", "9000"),
            ("TASKBOARD_DB_PATH", "/tmp/board.db"),
            ("TASKBOARD_LOG_LEVEL", "debug"),
        ]);
        let mut config = BoardConfig::default();
        config
            .apply_env_overrides_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path, PathBuf::from("/tmp/board.db"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.attachments.dir,
            PathBuf::from(".taskboard/attachments")
        );
    }

    #[test]
    fn test_env_override_rejects_invalid_port() {
        let mut config = BoardConfig::default();
        let result = config.apply_env_overrides_from(|name| {
            (name == "TASKBOARD_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = BoardConfig::default();
        config.apply_cli_overrides(&CliOverrides {
            port: Some(4000),
            db_path: Some(PathBuf::from("cli.db")),
            dev_mode: true,
        });
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.database.path, PathBuf::from("cli.db"));
        assert_eq!(config.bind_address(), "0.0.0.0:4000");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taskboard.toml");
        let mut config = BoardConfig::default();
        config.server.port = 5555;
        config.auth.expose_reset_tokens = true;
        config.save(&path).unwrap();

        let loaded = BoardConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.server.port, 5555);
        assert!(loaded.auth.expose_reset_tokens);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = BoardConfig::load_or_default(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
