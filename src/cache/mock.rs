//! Mock cache implementation for testing.
//!
//! Understands GET, SET, DEL and PING; anything else is a command error.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Cache, CacheError, CacheValue, Result};

/// Mock cache for testing.
#[derive(Default)]
pub struct MockCache {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    fail: RwLock<bool>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn arity(command: &str, args: &[Vec<u8>], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CacheError::Command(format!(
            "ERR wrong number of arguments for '{}' command",
            command.to_lowercase()
        )))
    }
}

#[async_trait]
impl Cache for MockCache {
    async fn execute(&self, command: &str, args: &[Vec<u8>]) -> Result<CacheValue> {
        if *self.fail.read().await {
            return Err(CacheError::Connect("Mock cache failure".to_string()));
        }

        match command.to_ascii_uppercase().as_str() {
            "PING" => Ok(CacheValue::Status("PONG".to_string())),
            "GET" => {
                arity(command, args, 1)?;
                Ok(self
                    .entries
                    .read()
                    .await
                    .get(&args[0])
                    .cloned()
                    .map(CacheValue::Data)
                    .unwrap_or(CacheValue::Nil))
            }
            "SET" => {
                arity(command, args, 2)?;
                self.entries
                    .write()
                    .await
                    .insert(args[0].clone(), args[1].clone());
                Ok(CacheValue::Okay)
            }
            "DEL" => {
                let mut entries = self.entries.write().await;
                let removed = args.iter().filter(|k| entries.remove(*k).is_some()).count();
                Ok(CacheValue::Int(removed as i64))
            }
            other => Err(CacheError::Command(format!("ERR unknown command '{}'", other))),
        }
    }
}
