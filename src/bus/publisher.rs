//! Single-shot publisher.
//!
//! Every publish dials, declares, publishes and tears down on its own. No
//! connection is reused across calls, so concurrent publishes share nothing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::topology::declare_exchange;
use super::{BrokerChannel, BrokerConnection, BrokerEndpoint, BusError, Connector, Publisher, Result};

/// Publisher for one broker endpoint.
#[derive(Clone)]
pub struct AmqpPublisher {
    endpoint: BrokerEndpoint,
    connector: Arc<dyn Connector>,
}

impl AmqpPublisher {
    pub fn new(endpoint: BrokerEndpoint, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoint,
            connector,
        }
    }

    /// Publisher backed by RabbitMQ.
    #[cfg(feature = "amqp")]
    pub fn rabbitmq(endpoint: BrokerEndpoint) -> Self {
        Self::new(endpoint, Arc::new(super::LapinConnector::default()))
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    async fn publish_on_connection(
        &self,
        connection: &dyn BrokerConnection,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<()> {
        debug!("got Connection, getting Channel");
        let channel = connection.create_channel().await?;

        let result = self
            .publish_on_channel(channel.as_ref(), routing_key, payload)
            .await;

        if let Err(e) = channel.close().await {
            warn!(error = %e, "Failed to close publish channel");
        }
        result
    }

    async fn publish_on_channel(
        &self,
        channel: &dyn BrokerChannel,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<()> {
        debug!(
            exchange = %self.endpoint.exchange,
            kind = %self.endpoint.exchange_type,
            "got Channel, declaring Exchange"
        );
        declare_exchange(channel, &self.endpoint.exchange_spec()).await?;

        if self.endpoint.reliable {
            debug!("enabling publishing confirms");
            channel.confirm_select().await?;
        }

        debug!(
            routing_key = %routing_key,
            bytes = payload.len(),
            "declared Exchange, publishing"
        );
        let pending = channel
            .publish(&self.endpoint.exchange, routing_key, payload)
            .await?;

        if !self.endpoint.reliable {
            return Ok(());
        }

        debug!("waiting for confirmation of one publishing");
        let confirmation = pending.wait().await?;
        if confirmation.ack {
            debug!(
                delivery_tag = confirmation.delivery_tag,
                "confirmed delivery"
            );
            Ok(())
        } else {
            warn!(
                delivery_tag = confirmation.delivery_tag,
                routing_key = %routing_key,
                "failed delivery"
            );
            Err(BusError::Nacked {
                delivery_tag: confirmation.delivery_tag,
            })
        }
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %routing_key))]
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        info!(uri = %self.endpoint.uri, "dialing");
        let connection = self.connector.connect(&self.endpoint.uri).await?;

        let result = self
            .publish_on_connection(connection.as_ref(), routing_key, payload)
            .await;

        if let Err(e) = connection.close().await {
            warn!(error = %e, "Failed to close publish connection");
        }
        result
    }
}
