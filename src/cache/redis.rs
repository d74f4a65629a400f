//! Redis cache implementation.

use async_trait::async_trait;
use redis::{Client, Value};
use tracing::debug;

use super::{Cache, CacheError, CacheValue, Result};

/// Redis cache.
///
/// Dials for every command and drops the connection afterwards; there is no
/// pooling.
#[derive(Clone, Debug)]
pub struct RedisCache {
    url: String,
}

impl RedisCache {
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn execute(&self, command: &str, args: &[Vec<u8>]) -> Result<CacheValue> {
        let client =
            Client::open(self.url.as_str()).map_err(|e| CacheError::Connect(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connect(e.to_string()))?;

        let mut cmd = redis::cmd(command);
        for arg in args {
            cmd.arg(arg.as_slice());
        }

        let value: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        debug!(command = %command, args = args.len(), "Executed cache command");
        Ok(value.into())
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => CacheValue::Nil,
            Value::Int(n) => CacheValue::Int(n),
            Value::BulkString(bytes) => CacheValue::Data(bytes),
            Value::Array(values) | Value::Set(values) => {
                CacheValue::Array(values.into_iter().map(CacheValue::from).collect())
            }
            Value::SimpleString(status) => CacheValue::Status(status),
            Value::Okay => CacheValue::Okay,
            other => CacheValue::Status(format!("{:?}", other)),
        }
    }
}
