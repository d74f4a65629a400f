//! Exchange declaration shared by publishers and subscribers.

use tracing::debug;

use super::{BrokerChannel, Result};

/// Name and type of the exchange to declare.
///
/// The type is passed through to the broker as-is; the broker decides
/// whether it is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: String,
}

impl ExchangeSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// Declare a durable, non-auto-deleted, non-internal exchange.
///
/// Redeclaring an identical exchange is a no-op on the broker; a conflicting
/// redeclaration comes back as `BusError::ExchangeDeclare`.
pub async fn declare_exchange(channel: &dyn BrokerChannel, spec: &ExchangeSpec) -> Result<()> {
    debug!(exchange = %spec.name, kind = %spec.kind, "Declaring exchange");
    channel.exchange_declare(spec).await
}
