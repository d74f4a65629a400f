//! Order service
//!
//! Publishes order events to a direct exchange with publisher confirms,
//! subscribes to routing keys through a durable per-process queue, and
//! exposes order lookup and creation over HTTP.

pub mod api;
pub mod bus;
pub mod cache;
pub mod config;
pub mod orders;
pub mod utils;
