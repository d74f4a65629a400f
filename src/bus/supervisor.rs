//! Ownership of running subscriber sessions.
//!
//! The process keeps one `SubscriptionSet` for every routing key it listens
//! on, so orderly termination can shut each session down instead of leaving
//! loops to die with the process.

use std::sync::Arc;

use tracing::{error, info};

use super::{ConsumerSession, Processor, Result, SessionState, Subscriber};

/// Sessions started from one subscriber, in start order.
#[derive(Default)]
pub struct SubscriptionSet {
    sessions: Vec<ConsumerSession>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start one independent session per routing key.
    ///
    /// Stops at the first setup failure and shuts down whatever already
    /// started.
    pub async fn start<I, K>(
        subscriber: &Subscriber,
        routing_keys: I,
        processor: Arc<dyn Processor>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut set = Self::new();
        for key in routing_keys {
            match subscriber.subscribe(key.as_ref(), Arc::clone(&processor)).await {
                Ok(session) => {
                    info!(routing_key = %key.as_ref(), "Subscriber started");
                    set.sessions.push(session);
                }
                Err(e) => {
                    error!(routing_key = %key.as_ref(), error = %e, "Failed to start subscriber");
                    if let Err(shutdown_err) = set.shutdown_all().await {
                        error!(error = %shutdown_err, "Failed to shut down started subscribers");
                    }
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn routing_keys(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.routing_key()).collect()
    }

    /// Routing keys whose connection was closed by the broker.
    ///
    /// An external supervisor can poll this and resubscribe.
    pub fn closed_sessions(&self) -> Vec<&str> {
        self.sessions
            .iter()
            .filter(|s| s.state() == SessionState::Closed)
            .map(|s| s.routing_key())
            .collect()
    }

    /// Shut every session down in start order.
    ///
    /// Every session is attempted; the first error is returned.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for session in self.sessions.drain(..) {
            let routing_key = session.routing_key().to_string();
            if let Err(e) = session.shutdown().await {
                error!(routing_key = %routing_key, error = %e, "error during shutdown");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
