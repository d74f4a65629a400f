//! Messaging and broker endpoint configuration types.

use serde::Deserialize;

use crate::bus::ExchangeSpec;

/// Exchange all order services publish to.
pub const DEFAULT_EXCHANGE: &str = "services_direct";
/// Exchange type for order events.
pub const DEFAULT_EXCHANGE_TYPE: &str = "direct";

/// Messaging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Exchange name for publishing and binding.
    pub exchange: String,
    /// Exchange type (e.g. "direct").
    pub exchange_type: String,
    /// Wait for publisher confirms before a publish counts as done.
    pub reliable: bool,
    /// Routing keys to start a subscriber for.
    pub routing_keys: Vec<String>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            exchange_type: DEFAULT_EXCHANGE_TYPE.to_string(),
            reliable: true,
            routing_keys: crate::orders::routing::SUBSCRIBED
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl MessagingConfig {
    /// Endpoint handed to each publisher and subscriber.
    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint {
            uri: self.url.clone(),
            exchange: self.exchange.clone(),
            exchange_type: self.exchange_type.clone(),
            reliable: self.reliable,
        }
    }
}

/// Where and how to talk to the broker.
///
/// Built once at startup and passed by value; nothing here is validated
/// locally, the broker is the judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub uri: String,
    pub exchange: String,
    pub exchange_type: String,
    pub reliable: bool,
}

impl BrokerEndpoint {
    pub fn new(
        uri: impl Into<String>,
        exchange: impl Into<String>,
        exchange_type: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            exchange: exchange.into(),
            exchange_type: exchange_type.into(),
            reliable: false,
        }
    }

    /// Enable or disable publisher confirms.
    pub fn with_reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    pub fn exchange_spec(&self) -> ExchangeSpec {
        ExchangeSpec::new(&self.exchange, &self.exchange_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_config_default() {
        let config = MessagingConfig::default();
        assert_eq!(config.url, "amqp://localhost:5672");
        assert_eq!(config.exchange, "services_direct");
        assert_eq!(config.exchange_type, "direct");
        assert!(config.reliable);
        assert_eq!(config.routing_keys.len(), 7);
        assert!(!config.routing_keys.iter().any(|k| k == "order.find"));
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = MessagingConfig {
            url: "amqp://rabbit:5672".to_string(),
            reliable: false,
            ..Default::default()
        };
        let endpoint = config.endpoint();
        assert_eq!(endpoint.uri, "amqp://rabbit:5672");
        assert!(!endpoint.reliable);
        assert_eq!(
            endpoint.exchange_spec(),
            ExchangeSpec::new("services_direct", "direct")
        );
    }
}
