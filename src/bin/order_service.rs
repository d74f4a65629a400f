//! order-service: order API and event subscribers
//!
//! ## Architecture
//! ```text
//! [HTTP clients] --(REST)--> [order-service] --(publish, confirmed)--> [services_direct]
//!                                  ^                                         |
//!                                  +------(one subscriber per routing key)---+
//! ```
//!
//! ## Configuration
//! - ORDERS_CONFIG / --config: YAML configuration file (optional)
//! - ORDERS__SECTION__KEY: configuration overrides
//! - RABBITMQ_URL, REDIS_URL, PORT: legacy overrides
//! - ORDERS_LOG: tracing filter (default: info)

use std::sync::Arc;

use tracing::{error, info};

use order_service::api;
use order_service::bus::{AmqpPublisher, Publisher, Subscriber, SubscriptionSet};
use order_service::cache::{Cache, RedisCache};
use order_service::config::Config;
use order_service::orders::OrderService;
use order_service::utils::bootstrap::{config_path_arg, init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(config_path_arg(std::env::args()).as_deref())?;
    let endpoint = config.messaging.endpoint();

    let publisher: Arc<dyn Publisher> = Arc::new(AmqpPublisher::rabbitmq(endpoint.clone()));
    let cache: Arc<dyn Cache> = Arc::new(RedisCache::new(&config.cache.url));
    let orders = Arc::new(OrderService::new(publisher, cache));

    let subscriber = Subscriber::rabbitmq(endpoint);
    let mut subscriptions =
        SubscriptionSet::start(&subscriber, &config.messaging.routing_keys, orders.clone())
            .await?;

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, subscriptions = subscriptions.len(), "start listening");

    let served = axum::serve(listener, api::router(orders))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = subscriptions.shutdown_all().await {
        error!(error = %e, "error during shutdown");
        return Err(e.into());
    }
    served?;

    info!("order-service stopped");
    Ok(())
}
