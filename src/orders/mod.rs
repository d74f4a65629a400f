//! Order domain.
//!
//! `OrderInteractor` is what the HTTP layer talks to. `OrderService` is the
//! default implementation: orders live in the cache, creation is announced
//! on the bus, and inbound bus events are handled as a `Processor`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::{BusError, Processor, Publisher};
use crate::cache::{Cache, CacheError, CacheValue};

pub mod routing;

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;

/// Errors that can occur in the order domain.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Stored order is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// An order as exchanged over HTTP and the bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    /// Order id; assigned on creation when empty.
    pub id: String,
    /// Id in the upstream system the order came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<serde_json::Value>,
}

/// Order lookups and creation.
#[async_trait]
pub trait OrderInteractor: Send + Sync {
    async fn find_order(&self, id: &str) -> Result<Order>;

    async fn find_order_by_external_id(&self, external_id: &str) -> Result<Order>;

    async fn create_order(&self, order: Order) -> Result<Order>;
}

/// Cache-backed orders that announce themselves on the bus.
pub struct OrderService {
    publisher: Arc<dyn Publisher>,
    cache: Arc<dyn Cache>,
}

impl OrderService {
    pub fn new(publisher: Arc<dyn Publisher>, cache: Arc<dyn Cache>) -> Self {
        Self { publisher, cache }
    }

    fn order_key(id: &str) -> Vec<u8> {
        format!("order:{}", id).into_bytes()
    }

    fn external_key(external_id: &str) -> Vec<u8> {
        format!("order:external:{}", external_id).into_bytes()
    }

    async fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        match self.cache.execute("GET", &[key]).await? {
            CacheValue::Nil => Ok(None),
            value => Ok(value.as_bytes().map(<[u8]>::to_vec)),
        }
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.cache.execute("SET", &[key, value]).await?;
        Ok(())
    }

    fn keys(order: &Order) -> Vec<Vec<u8>> {
        let mut keys = vec![Self::order_key(&order.id)];
        if let Some(external_id) = &order.external_id {
            keys.push(Self::external_key(external_id));
        }
        keys
    }

    /// Store the order, then announce it.
    async fn store_and_publish(&self, order: &Order, body: &[u8]) -> Result<()> {
        self.set(Self::order_key(&order.id), body.to_vec()).await?;
        if let Some(external_id) = &order.external_id {
            self.set(
                Self::external_key(external_id),
                order.id.clone().into_bytes(),
            )
            .await?;
        }
        self.publisher.publish(routing::ORDER_CREATE, body).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderInteractor for OrderService {
    async fn find_order(&self, id: &str) -> Result<Order> {
        let bytes = self
            .get(Self::order_key(id))
            .await?
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn find_order_by_external_id(&self, external_id: &str) -> Result<Order> {
        let id = self
            .get(Self::external_key(external_id))
            .await?
            .ok_or_else(|| OrderError::NotFound(external_id.to_string()))?;
        self.find_order(&String::from_utf8_lossy(&id)).await
    }

    async fn create_order(&self, mut order: Order) -> Result<Order> {
        if order.id.is_empty() {
            order.id = uuid::Uuid::new_v4().to_string();
        }
        let body = serde_json::to_vec(&order)?;

        // A failed create leaves no order behind for lookups to find.
        if let Err(e) = self.store_and_publish(&order, &body).await {
            if let Err(del_err) = self.cache.execute("DEL", &Self::keys(&order)).await {
                warn!(
                    order_id = %order.id,
                    error = %del_err,
                    "Failed to remove order after failed create"
                );
            }
            return Err(e);
        }

        info!(order_id = %order.id, "Order created");
        Ok(order)
    }
}

#[async_trait]
impl Processor for OrderService {
    async fn process(&self, routing_key: &str, payload: &[u8]) {
        info!(
            routing_key = %routing_key,
            body = %String::from_utf8_lossy(payload),
            "Processing"
        );
        debug!(bytes = payload.len(), "Processed delivery");
    }
}
