//! Adapter interfaces for external systems.
//!
//! - Transport: how the publish client reaches a queueing backend (Redis)
//! - Command: runs an external analysis tool as a pipeline processor

pub mod command;
pub mod redis;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

// Re-export the concrete adapters
pub use command::CommandProcessor;
pub use self::redis::RedisConnector;

/// Errors raised by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Push to {destination} failed: {reason}")]
    Push { destination: String, reason: String },
}

/// One candidate backend address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `host` or `host:port`, falling back to `default_port`
    pub fn parse(address: &str, default_port: u16) -> Self {
        let address = address.trim();
        if let Some((host, port)) = address.rsplit_once(':') {
            // Bare IPv6 addresses contain several colons; leave them alone
            if !host.contains(':') {
                if let Ok(port) = port.parse() {
                    return Self {
                        host: host.to_string(),
                        port,
                    };
                }
            }
        }

        Self {
            host: address.to_string(),
            port: default_port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens connections to endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError>;
}

/// An open connection bound to one endpoint
#[async_trait]
pub trait Connection: Send {
    /// Append every payload to `destination`, in order
    async fn push(&mut self, destination: &str, payloads: &[String]) -> Result<(), TransportError>;
}
