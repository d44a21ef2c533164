use std::{
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use time::Duration;

use expin_core::Area;

#[derive(Parser, Debug)]
#[command(name = "expin", about = "expin - expense/income ledger with invoice export")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "expin.toml")]
    pub config: String,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Directory holding the ledger and invoices (overrides config file)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Delete every stored invoice in an area
    PurgeInvoices {
        #[arg(long, default_value = "active")]
        area: Area,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_cache")]
    pub cache: CacheConfig,

    #[serde(default = "default_export")]
    pub export: ExportConfig,

    #[serde(default)]
    pub oauth: OAuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Lifetime of a cached invoice listing, in milliseconds.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    /// Clear the live ledger after a successful export.
    #[serde(default = "default_true")]
    pub reset_ledger: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    /// When true, invoice routes require a stored credential and the
    /// client secret file must be present at startup.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,

    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        OAuthConfig {
            enabled: false,
            credentials_file: default_credentials_file(),
            token_file: default_token_file(),
            scopes: default_scopes(),
        }
    }
}

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_cache() -> CacheConfig {
    CacheConfig {
        ttl_ms: default_ttl_ms(),
    }
}

fn default_export() -> ExportConfig {
    ExportConfig { reset_ledger: true }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_ttl_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/drive.file".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: default_server(),
            logging: default_logging(),
            storage: default_storage(),
            cache: default_cache(),
            export: default_export(),
            oauth: OAuthConfig::default(),
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref dir) = cli.data_dir {
            config.storage.data_dir = dir.clone();
        }

        config
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("data.json")
    }

    pub fn invoices_dir(&self) -> PathBuf {
        self.data_dir.join("invoices")
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::milliseconds(i64::from(self.ttl_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cache.ttl_ms, 5000);
        assert!(config.export.reset_ledger);
        assert!(!config.oauth.enabled);
        assert_eq!(config.storage.ledger_path(), PathBuf::from("data/data.json"));
        assert_eq!(config.storage.invoices_dir(), PathBuf::from("data/invoices"));
    }

    #[test]
    fn test_partial_sections_fill_in_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [cache]
            ttl_ms = 3000

            [oauth]
            enabled = true
            token_file = "secrets/token.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.ttl(), Duration::milliseconds(3000));
        assert!(config.oauth.enabled);
        assert_eq!(config.oauth.token_file, PathBuf::from("secrets/token.json"));
        assert_eq!(config.oauth.credentials_file, PathBuf::from("credentials.json"));
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = CliArgs::parse_from([
            "expin",
            "--config",
            "/nonexistent/expin.toml",
            "--port",
            "4000",
            "--data-dir",
            "/tmp/ledger",
            "purge-invoices",
            "--area",
            "downloaded",
        ]);
        let config = Config::load(&cli);
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(cli.command, Some(Command::PurgeInvoices { area: Area::Downloaded }));
    }
}
