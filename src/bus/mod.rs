//! Message bus for order events.
//!
//! This module contains:
//! - `Publisher` trait: fire one event at the exchange
//! - `Processor` trait: handle one delivered event
//! - Broker transport traits (`Connector`, `BrokerConnection`, `BrokerChannel`)
//! - Implementations: AMQP (RabbitMQ), Mock

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::oneshot;

pub mod identity;
pub mod publisher;
pub mod subscriber;
pub mod supervisor;
pub mod topology;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::LapinConnector;
pub use identity::identity;
pub use mock::MockBroker;
pub use publisher::AmqpPublisher;
pub use subscriber::{ConsumerSession, SessionMonitor, SessionState, Subscriber};
pub use supervisor::SubscriptionSet;
pub use topology::{declare_exchange, ExchangeSpec};

pub use crate::config::BrokerEndpoint;

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
///
/// Each variant names the stage that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Dial: {0}")]
    Dial(String),

    #[error("Channel: {0}")]
    Channel(String),

    #[error("Exchange Declare: {0}")]
    ExchangeDeclare(String),

    #[error("Channel could not be put into confirm mode: {0}")]
    ConfirmSelect(String),

    #[error("Exchange Publish: {0}")]
    Publish(String),

    #[error("Publish confirmation failed: {0}")]
    Confirm(String),

    #[error("Broker rejected publishing with delivery tag {delivery_tag}")]
    Nacked { delivery_tag: u64 },

    #[error("Queue Declare: {0}")]
    QueueDeclare(String),

    #[error("Queue Bind: {0}")]
    QueueBind(String),

    #[error("Queue Consume: {0}")]
    Consume(String),

    #[error("Delivery ack failed: {0}")]
    Ack(String),

    #[error("Consumer cancel failed: {0}")]
    Cancel(String),

    #[error("AMQP connection close error: {0}")]
    Close(String),
}

/// Broker operation stage, used to name failures and inject them in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Dial,
    Channel,
    ExchangeDeclare,
    ConfirmSelect,
    Publish,
    QueueDeclare,
    QueueBind,
    Consume,
    Ack,
    Cancel,
    Close,
}

impl Stage {
    /// Wrap a transport error message in the variant for this stage.
    pub fn error(self, message: impl fmt::Display) -> BusError {
        let message = message.to_string();
        match self {
            Stage::Dial => BusError::Dial(message),
            Stage::Channel => BusError::Channel(message),
            Stage::ExchangeDeclare => BusError::ExchangeDeclare(message),
            Stage::ConfirmSelect => BusError::ConfirmSelect(message),
            Stage::Publish => BusError::Publish(message),
            Stage::QueueDeclare => BusError::QueueDeclare(message),
            Stage::QueueBind => BusError::QueueBind(message),
            Stage::Consume => BusError::Consume(message),
            Stage::Ack => BusError::Ack(message),
            Stage::Cancel => BusError::Cancel(message),
            Stage::Close => BusError::Close(message),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Acknowledges a single delivery back to the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<()>;
}

/// One message delivered to a consumer.
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub delivery_tag: u64,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        delivery_tag: u64,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            delivery_tag,
            acker,
        }
    }

    /// Acknowledge this delivery only (never cumulative).
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack(self.delivery_tag).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("payload_len", &self.payload.len())
            .field("delivery_tag", &self.delivery_tag)
            .finish()
    }
}

/// Broker acknowledgment of a single publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub delivery_tag: u64,
    pub ack: bool,
}

/// Confirmation that has not arrived yet.
///
/// Only meaningful when the channel is in confirm mode. Dropping it without
/// awaiting is fine.
pub struct PendingConfirm(BoxFuture<'static, Result<Confirmation>>);

impl PendingConfirm {
    pub fn new(fut: BoxFuture<'static, Result<Confirmation>>) -> Self {
        Self(fut)
    }

    /// Wait for the broker to ack or nack the publishing.
    pub async fn wait(self) -> Result<Confirmation> {
        self.0.await
    }
}

/// Stream of deliveries for one consumer. Ends when the consumer is cancelled
/// or the connection goes away.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Result of declaring a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub messages: u32,
    pub consumers: u32,
}

// ============================================================================
// Transport
// ============================================================================

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<Box<dyn BrokerConnection>>;
}

/// A live broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>>;

    /// Resolves with a reason if the broker closes the connection without
    /// being asked to. Never resolves on an orderly `close`.
    fn notify_close(&self) -> oneshot::Receiver<String>;

    async fn close(&self) -> Result<()>;
}

/// A channel on a broker connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn exchange_declare(&self, spec: &ExchangeSpec) -> Result<()>;

    async fn confirm_select(&self) -> Result<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<PendingConfirm>;

    async fn queue_declare(&self, name: &str) -> Result<QueueInfo>;

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Capabilities
// ============================================================================

/// Publishes a single event.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<()>;
}

/// Handles one acknowledged delivery.
///
/// Runs inline in the delivery loop, so it must not block indefinitely. Any
/// failure handling is the implementation's own business.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, routing_key: &str, payload: &[u8]);
}
