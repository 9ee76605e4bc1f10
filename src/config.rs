use std::{
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
};

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "ledger-node", about = "Two-phase-commit worker node for a partitioned account ledger")]
pub struct CliArgs {
    /// Port to listen on (overrides config file)
    pub port: Option<u16>,

    /// Ledger data file, one `id,balance` per line (overrides config file)
    pub data_file: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, default_value = "ledger-node.toml")]
    pub config: String,

    /// Address to bind (overrides config file)
    #[arg(long)]
    pub host: Option<String>,

    /// SQLite database receiving the audit trail (overrides config file)
    #[arg(long)]
    pub audit_db: Option<String>,

    /// Disable the audit trail
    #[arg(long)]
    pub no_audit: bool,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_ledger")]
    pub ledger: LedgerConfig,

    #[serde(default = "default_audit")]
    pub audit: AuditConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_audit_database")]
    pub database: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint. Disabled when unset.
    #[serde(default)]
    pub listen: Option<String>,
}

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_ledger() -> LedgerConfig {
    LedgerConfig {
        data_file: default_data_file(),
    }
}

fn default_audit() -> AuditConfig {
    AuditConfig {
        enabled: true,
        database: default_audit_database(),
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9001
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/cuentas.txt")
}

fn default_audit_database() -> String {
    "db/banco_chat.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: default_server(),
            ledger: default_ledger(),
            audit: default_audit(),
            logging: default_logging(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        config.apply_overrides(cli);
        config
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    // CLI overrides
    fn apply_overrides(&mut self, cli: &CliArgs) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ref host) = cli.host {
            self.server.host = host.clone();
        }
        if let Some(ref data_file) = cli.data_file {
            self.ledger.data_file = data_file.clone();
        }
        if let Some(ref database) = cli.audit_db {
            self.audit.database = database.clone();
        }
        if cli.no_audit {
            self.audit.enabled = false;
        }
        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.ledger.data_file, PathBuf::from("data/cuentas.txt"));
        assert!(config.audit.enabled);
        assert_eq!(config.logging.level, "info");
        assert!(config.metrics.listen.is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::parse(
            r#"
            [server]
            host = "127.0.0.1"
            port = 5001

            [ledger]
            data_file = "data/particion0_replica0/cuentas_part0.txt"

            [audit]
            enabled = false

            [logging]
            level = "debug"
            json = true

            [metrics]
            listen = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr().unwrap(), "127.0.0.1:5001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.ledger.data_file, PathBuf::from("data/particion0_replica0/cuentas_part0.txt"));
        assert!(!config.audit.enabled);
        assert_eq!(config.audit.database, "db/banco_chat.db");
        assert!(config.logging.json);
        assert_eq!(config.metrics.listen.as_deref(), Some("127.0.0.1:9100"));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = CliArgs::parse_from([
            "ledger-node",
            "5002",
            "data/part1.txt",
            "--config",
            "does-not-exist.toml",
            "--no-audit",
            "-l",
            "warn",
        ]);
        let config = Config::load(&cli);

        assert_eq!(config.server.port, 5002);
        assert_eq!(config.ledger.data_file, PathBuf::from("data/part1.txt"));
        assert!(!config.audit.enabled);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_invalid_listen_addr() {
        let mut config = Config::default();
        config.server.host = "not a host".to_string();
        assert!(config.listen_addr().is_err());
    }
}
