//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod cache;
mod messaging;
mod server;

pub use cache::CacheConfig;
pub use messaging::{BrokerEndpoint, MessagingConfig, DEFAULT_EXCHANGE, DEFAULT_EXCHANGE_TYPE};
pub use server::{parse_port, ServerConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ORDERS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ORDERS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ORDERS_LOG";

/// Legacy environment variable for the broker URL.
pub const RABBITMQ_URL_ENV_VAR: &str = "RABBITMQ_URL";
/// Legacy environment variable for the cache URL.
pub const REDIS_URL_ENV_VAR: &str = "REDIS_URL";
/// Legacy environment variable for the HTTP port (`8080` or `:8080`).
pub const PORT_ENV_VAR: &str = "PORT";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Broker configuration.
    pub messaging: MessagingConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. Legacy `RABBITMQ_URL`, `REDIS_URL` and `PORT` variables
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("messaging.url", std::env::var(RABBITMQ_URL_ENV_VAR).ok())?
            .set_override_option("cache.url", std::env::var(REDIS_URL_ENV_VAR).ok())?
            .build()?;

        let mut config: Config = config.try_deserialize()?;

        if let Ok(port) = std::env::var(PORT_ENV_VAR) {
            config.server.port =
                parse_port(&port).ok_or_else(|| format!("invalid {}: {:?}", PORT_ENV_VAR, port))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for var in [
            CONFIG_ENV_VAR,
            RABBITMQ_URL_ENV_VAR,
            REDIS_URL_ENV_VAR,
            PORT_ENV_VAR,
            "ORDERS__MESSAGING__RELIABLE",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.messaging.exchange, "services_direct");
        assert_eq!(config.cache.url, "redis://localhost:6379");
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "messaging:\n  url: amqp://file:5672\n  reliable: false\n  routing_keys: [order.update]\nserver:\n  port: 9000"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();

        assert_eq!(config.messaging.url, "amqp://file:5672");
        assert!(!config.messaging.reliable);
        assert_eq!(config.messaging.routing_keys, vec!["order.update".to_string()]);
        assert_eq!(config.messaging.exchange, "services_direct");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    #[serial]
    fn test_legacy_env_overrides() {
        clear_env();
        std::env::set_var(RABBITMQ_URL_ENV_VAR, "amqp://legacy:5672");
        std::env::set_var(REDIS_URL_ENV_VAR, "redis://legacy:6379");
        std::env::set_var(PORT_ENV_VAR, ":3000");

        let config = Config::load(None);
        clear_env();
        let config = config.unwrap();

        assert_eq!(config.messaging.url, "amqp://legacy:5672");
        assert_eq!(config.cache.url, "redis://legacy:6379");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    #[serial]
    fn test_prefixed_env() {
        clear_env();
        std::env::set_var("ORDERS__MESSAGING__RELIABLE", "false");

        let config = Config::load(None);
        clear_env();

        assert!(!config.unwrap().messaging.reliable);
    }

    #[test]
    #[serial]
    fn test_invalid_port_rejected() {
        clear_env();
        std::env::set_var(PORT_ENV_VAR, "eighty");

        let result = Config::load(None);
        clear_env();

        assert!(result.is_err());
    }
}
