//! Configuration for the IA3 backend.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use crate::logging::{Level, SinkKind};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allows `/api` forwarding from any client address.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub owner: OwnerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            owner: OwnerConfig::default(),
        }
    }
}

/// Operator identity sent upstream in the `User-Agent` and `From` headers.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OwnerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Level,
    /// Which sinks loggers attach by default.
    #[serde(default = "default_handlers")]
    pub handlers: Vec<SinkKind>,
    /// Root directory for per-logger log files.
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Audit store settings. Required when `handlers` contains `db`.
    #[serde(default)]
    pub db: Option<DbConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::default(),
            handlers: default_handlers(),
            dir: default_log_dir(),
            db: None,
        }
    }
}

impl LoggingConfig {
    pub fn wants(&self, kind: SinkKind) -> bool {
        self.handlers.contains(&kind)
    }
}

/// Audit store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Audit store connection settings.
///
/// For the SQLite backend `name` is the database path (`:memory:` allowed);
/// `host`, `port`, `username` and `password` are carried for server-backed
/// stores and ignored by the embedded ones.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub backend: DbBackend,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Events older than this are pruned when the audit sink starts.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base")]
    pub base: String,
    pub key: String,
    /// Cache TTL in seconds.
    #[serde(default = "default_cache_expiry")]
    pub cache_expiry: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_handlers() -> Vec<SinkKind> {
    vec![SinkKind::Console, SinkKind::File]
}
fn default_log_dir() -> String {
    "Logs".to_string()
}
fn default_api_base() -> String {
    "https://api.rawg.io/api".to_string()
}
fn default_cache_expiry() -> u64 {
    300
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (IA3__SECTION__KEY format)
    /// 2. config.toml / config.yaml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("api.base", default_api_base())?
            .set_default("api.cache_expiry", default_cache_expiry() as i64)?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("IA3")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("logging.handlers")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, Level::Info);
        assert!(logging.wants(SinkKind::Console));
        assert!(logging.wants(SinkKind::File));
        assert!(!logging.wants(SinkKind::Db));
        assert!(logging.db.is_none());
        assert_eq!(logging.dir, "Logs");
    }

    #[test]
    fn test_default_server_config() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 5000);
        assert!(!server.debug);
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            debug = true

            [server.owner]
            name = "Jo Bloggs"
            email = "jo@example.com"

            [logging]
            level = "DEBUG"
            handlers = ["console", "db"]

            [logging.db]
            backend = "sqlite"
            name = "./data/audit.db"
            retention_days = 7

            [api]
            base = "https://api.example.com"
            key = "secret"
            cache_expiry = 60
        "#;

        let config: Config = ConfigLoader::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.owner.name, "Jo Bloggs");
        assert_eq!(config.logging.level, Level::Debug);
        assert!(config.logging.wants(SinkKind::Db));
        let db = config.logging.db.unwrap();
        assert_eq!(db.backend, DbBackend::Sqlite);
        assert_eq!(db.name, "./data/audit.db");
        assert_eq!(db.retention_days, Some(7));
        assert_eq!(config.api.cache_expiry, 60);
    }

    #[test]
    fn test_api_key_is_required() {
        let result: Result<Config, _> = ConfigLoader::builder()
            .add_source(File::from_str("[api]\nbase = \"x\"", config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }
}
