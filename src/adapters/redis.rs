//! Redis transport: multiplexed async connection, `RPUSH` per publish.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::time::timeout;

use super::{Connection, Connector, Endpoint, TransportError};

/// Connects to Redis endpoints with shared credentials
#[derive(Debug, Clone)]
pub struct RedisConnector {
    db: i64,
    password: Option<String>,
    connect_timeout: Duration,
}

impl RedisConnector {
    pub fn new(db: i64, password: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            db,
            password,
            connect_timeout,
        }
    }

    fn connection_info(&self, endpoint: &Endpoint) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(endpoint.host.clone(), endpoint.port),
            redis: redis::RedisConnectionInfo {
                db: self.db,
                username: None,
                password: self.password.clone(),
                protocol: redis::ProtocolVersion::RESP2,
            },
        }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        let failed = |reason: String| TransportError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };

        let client = redis::Client::open(self.connection_info(endpoint))
            .map_err(|e| failed(e.to_string()))?;

        let mut conn = timeout(self.connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| failed(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| failed(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| failed(e.to_string()))?;

        Ok(Box::new(RedisConnection { conn }))
    }
}

struct RedisConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl Connection for RedisConnection {
    async fn push(&mut self, destination: &str, payloads: &[String]) -> Result<(), TransportError> {
        let _: i64 = redis::cmd("RPUSH")
            .arg(destination)
            .arg(payloads)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| TransportError::Push {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
