//! Bootstrap utilities for the order service binary.

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with ORDERS_LOG environment variable.
///
/// Defaults to "info" level if ORDERS_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl+C.
///
/// If the signal handler cannot be installed this never resolves, leaving
/// the process to be stopped some other way.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

/// Config file path from `--config <path>` or `--config=<path>`.
pub fn config_path_arg<I>(args: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_arg() {
        assert_eq!(
            config_path_arg(args(&["order-service", "--config", "orders.yaml"])),
            Some("orders.yaml".to_string())
        );
        assert_eq!(
            config_path_arg(args(&["order-service", "--config=orders.yaml"])),
            Some("orders.yaml".to_string())
        );
        assert_eq!(config_path_arg(args(&["order-service"])), None);
        assert_eq!(config_path_arg(args(&["order-service", "--config"])), None);
    }
}
