//! Connection pooling.
//!
//! Manages a bounded set of [`Client`] connections for concurrent access.
//! Every client pipelines independently, so a pool is only needed when one
//! connection's command ordering becomes the bottleneck.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use crate::client::{Client, ClientConfig};
use crate::error::{RedisError, RedisResult};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections.
    pub max_connections: usize,
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            max_connections: 10,
            host: host.into(),
            port,
        }
    }

    /// Set max connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }
}

/// Redis connection pool.
pub struct RedisPool {
    config: PoolConfig,
    connections: Arc<Mutex<VecDeque<Client>>>,
    semaphore: Arc<Semaphore>,
}

impl RedisPool {
    /// Create a new connection pool. Connections are dialed lazily.
    pub fn new(config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            connections: Arc::new(Mutex::new(VecDeque::new())),
            semaphore,
        }
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> RedisResult<PooledConnection> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RedisError::Closed)?;

        let client = {
            let mut conns = self.connections.lock().await;
            conns.pop_front()
        };

        let client = match client {
            Some(c) => c,
            None => {
                Client::connect_with(ClientConfig::new(
                    self.config.host.clone(),
                    self.config.port,
                ))
                .await?
            }
        };

        Ok(PooledConnection {
            client: Some(client),
            pool: self.connections.clone(),
            _permit: permit,
        })
    }
}

/// A pooled connection that returns to the pool on drop.
pub struct PooledConnection {
    client: Option<Client>,
    pool: Arc<Mutex<VecDeque<Client>>>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref().unwrap()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                let mut conns = pool.lock().await;
                conns.push_back(client);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 6379);
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new("redis.internal", 6380).max_connections(4);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.port, 6380);
    }
}
