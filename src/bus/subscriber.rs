//! Durable, identity-named subscriber.
//!
//! `Subscriber::subscribe` sets up a long-lived connection, binds the
//! identity-named queue to one routing key and spawns a delivery loop that
//! acks each message and hands it to a `Processor`. The returned
//! `ConsumerSession` owns the connection until `shutdown`.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::identity::identity;
use super::topology::declare_exchange;
use super::{
    BrokerChannel, BrokerConnection, BrokerEndpoint, Connector, DeliveryStream, Processor, Result,
};

/// Lifecycle of one subscriber session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Connecting,
    Consuming,
    ShuttingDown,
    Closed,
}

/// Shared view of one session's state.
///
/// Create it before subscribing with `Subscriber::subscribe_monitored` to
/// observe every transition, including `Connecting` and a setup failure.
#[derive(Clone)]
pub struct SessionMonitor {
    state: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(SessionState::Unstarted)),
        }
    }
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set(&self, state: SessionState) {
        self.state.send_replace(state);
    }
}

/// Subscriber for one broker endpoint.
#[derive(Clone)]
pub struct Subscriber {
    endpoint: BrokerEndpoint,
    connector: Arc<dyn Connector>,
}

impl Subscriber {
    pub fn new(endpoint: BrokerEndpoint, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoint,
            connector,
        }
    }

    /// Subscriber backed by RabbitMQ.
    #[cfg(feature = "amqp")]
    pub fn rabbitmq(endpoint: BrokerEndpoint) -> Self {
        Self::new(endpoint, Arc::new(super::LapinConnector::default()))
    }

    /// Bind the identity queue to `routing_key` and start delivering to
    /// `processor`. Returns as soon as consuming has started.
    pub async fn subscribe(
        &self,
        routing_key: &str,
        processor: Arc<dyn Processor>,
    ) -> Result<ConsumerSession> {
        self.subscribe_monitored(routing_key, processor, SessionMonitor::new())
            .await
    }

    /// Same as `subscribe`, reporting state changes through `monitor`.
    pub async fn subscribe_monitored(
        &self,
        routing_key: &str,
        processor: Arc<dyn Processor>,
        monitor: SessionMonitor,
    ) -> Result<ConsumerSession> {
        let tag = identity().to_string();
        monitor.set(SessionState::Connecting);

        info!(uri = %self.endpoint.uri, "dialing");
        let connection = match self.connector.connect(&self.endpoint.uri).await {
            Ok(connection) => connection,
            Err(e) => {
                monitor.set(SessionState::Closed);
                return Err(e);
            }
        };

        let (stop_watcher, stopped) = oneshot::channel();
        let watcher = tokio::spawn(watch_connection(
            connection.notify_close(),
            stopped,
            monitor.clone(),
        ));

        let setup = self.setup(connection.as_ref(), &tag, routing_key).await;
        let (channel, deliveries) = match setup {
            Ok(ready) => ready,
            Err(e) => {
                error!(routing_key = %routing_key, error = %e, "Subscriber setup failed");
                let _ = stop_watcher.send(());
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "Failed to close connection after setup failure");
                }
                monitor.set(SessionState::Closed);
                return Err(e);
            }
        };

        let span = tracing::info_span!("bus.consume", routing_key = %routing_key);
        let handler = tokio::spawn(handle(deliveries, processor).instrument(span));

        monitor.set(SessionState::Consuming);

        Ok(ConsumerSession {
            connection,
            channel,
            tag,
            routing_key: routing_key.to_string(),
            handler,
            watcher,
            stop_watcher,
            monitor,
        })
    }

    /// Open the channel, declare topology and start consuming.
    async fn setup(
        &self,
        connection: &dyn BrokerConnection,
        tag: &str,
        routing_key: &str,
    ) -> Result<(Box<dyn BrokerChannel>, DeliveryStream)> {
        debug!("got Connection, getting Channel");
        let channel = connection.create_channel().await?;

        debug!(exchange = %self.endpoint.exchange, "got Channel, declaring Exchange");
        declare_exchange(channel.as_ref(), &self.endpoint.exchange_spec()).await?;

        debug!(queue = %tag, "declared Exchange, declaring Queue");
        let queue = channel.queue_declare(tag).await?;

        info!(
            queue = %queue.name,
            messages = queue.messages,
            consumers = queue.consumers,
            routing_key = %routing_key,
            "declared Queue, binding to Exchange"
        );
        channel
            .queue_bind(&queue.name, &self.endpoint.exchange, routing_key)
            .await?;

        debug!(consumer_tag = %tag, "Queue bound to Exchange, starting Consume");
        let deliveries = channel.consume(&queue.name, tag).await?;

        Ok((channel, deliveries))
    }
}

/// Log unsolicited connection closure. Does not reconnect.
async fn watch_connection(
    closed: oneshot::Receiver<String>,
    stopped: oneshot::Receiver<()>,
    monitor: SessionMonitor,
) {
    tokio::select! {
        reason = closed => {
            if let Ok(reason) = reason {
                warn!(reason = %reason, "closing: connection closed by broker");
                monitor.set(SessionState::Closed);
            }
        }
        _ = stopped => {}
    }
}

/// Ack each delivery, then hand it to the processor, strictly in order.
async fn handle(mut deliveries: DeliveryStream, processor: Arc<dyn Processor>) {
    while let Some(delivery) = deliveries.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(error = %e, "Consumer delivery error");
                break;
            }
        };

        debug!(
            bytes = delivery.payload.len(),
            delivery_tag = delivery.delivery_tag,
            routing_key = %delivery.routing_key,
            "got delivery"
        );

        if let Err(e) = delivery.ack().await {
            error!(error = %e, delivery_tag = delivery.delivery_tag, "Failed to ack message");
        }
        processor
            .process(&delivery.routing_key, &delivery.payload)
            .await;
    }
    debug!("handle: deliveries channel closed");
}

/// A live subscription. Connection and channel are owned together.
pub struct ConsumerSession {
    connection: Box<dyn BrokerConnection>,
    channel: Box<dyn BrokerChannel>,
    tag: String,
    routing_key: String,
    handler: JoinHandle<()>,
    watcher: JoinHandle<()>,
    stop_watcher: oneshot::Sender<()>,
    monitor: SessionMonitor,
}

impl ConsumerSession {
    /// Consumer tag, which is also the queue name.
    pub fn consumer_tag(&self) -> &str {
        &self.tag
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn state(&self) -> SessionState {
        self.monitor.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.monitor.watch()
    }

    /// Cancel the consumer, close the connection and wait for the delivery
    /// loop to drain.
    ///
    /// Cancel and close errors are returned immediately without waiting for
    /// the loop, and the state stays `ShuttingDown`: the connection may
    /// still be open. There is no timeout on the wait.
    pub async fn shutdown(self) -> Result<()> {
        self.monitor.set(SessionState::ShuttingDown);

        self.channel.cancel(&self.tag).await?;
        self.connection.close().await?;

        let _ = self.stop_watcher.send(());
        let _ = self.watcher.await;

        if let Err(e) = self.handler.await {
            error!(error = %e, "Delivery handler task failed");
        }

        self.monitor.set(SessionState::Closed);
        info!(routing_key = %self.routing_key, "AMQP shutdown OK");
        Ok(())
    }
}
