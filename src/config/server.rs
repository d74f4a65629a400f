//! HTTP server configuration types.

use std::net::SocketAddr;

use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port for the order HTTP API.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Parse a port given either as `8080` or in listen-address form `:8080`.
pub fn parse_port(value: &str) -> Option<u16> {
    value.trim().trim_start_matches(':').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 8080);
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_parse_port_forms() {
        assert_eq!(parse_port("9000"), Some(9000));
        assert_eq!(parse_port(":9000"), Some(9000));
        assert_eq!(parse_port("nope"), None);
    }
}
