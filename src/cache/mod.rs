//! Key-value cache used by the order domain.
//!
//! Implementations:
//! - `RedisCache`: Redis, one connection per command
//! - `MockCache`: In-memory mock for testing

use async_trait::async_trait;

pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

pub use mock::MockCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("DialURL: {0}")]
    Connect(String),

    #[error("Do: {0}")]
    Command(String),
}

/// Reply to a cache command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Nil,
    Int(i64),
    Data(Vec<u8>),
    Array(Vec<CacheValue>),
    Status(String),
    Okay,
}

impl CacheValue {
    /// Bytes of a data or status reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Data(bytes) => Some(bytes),
            CacheValue::Status(status) => Some(status.as_bytes()),
            _ => None,
        }
    }
}

/// Executes one command against the cache.
///
/// Stateless: implementations must not hold a connection between calls.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn execute(&self, command: &str, args: &[Vec<u8>]) -> Result<CacheValue>;
}
