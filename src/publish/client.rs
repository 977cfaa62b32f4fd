//! Resilient publish client.
//!
//! Delivers result records to a queueing backend chosen from a pool of
//! candidate endpoints. One *sweep* tries every endpoint once. A publish
//! call gets `max_retry` retries in total, shared between failed sweeps
//! and failed pushes, so it always returns in bounded time.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::{Connection, Connector, Endpoint, RedisConnector};
use crate::domain::ResultRecord;

use super::endpoint::{Backoff, EndpointPool};

/// Errors that can occur publishing
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Invalid publish configuration: {0}")]
    Config(String),

    #[error("Invalid publish request: {0}")]
    InvalidRequest(String),

    #[error("Connection failed after {attempts} attempts: {last_error}")]
    ConnectionFailed { attempts: u32, last_error: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publish client options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Candidate addresses (`host` or `host:port`)
    #[serde(default = "default_hosts", deserialize_with = "host_list")]
    pub hosts: Vec<String>,

    /// Randomize endpoint order on every sweep
    #[serde(default = "default_shuffle_hosts")]
    pub shuffle_hosts: bool,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Logical database selector
    #[serde(default)]
    pub db: i64,

    #[serde(default)]
    pub password: Option<String>,

    /// Seconds to wait before the next sweep or retry
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: f64,

    /// Multiplier applied to the interval on consecutive retries (1 = fixed)
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff: f64,

    /// Upper bound for the backed-off interval, in seconds
    #[serde(default = "default_max_reconnect_interval")]
    pub max_reconnect_interval: f64,

    /// Retries after the first attempt; 0 fails fast
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Per-endpoint connect timeout, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
}

fn default_hosts() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}
fn default_shuffle_hosts() -> bool {
    true
}
fn default_port() -> u16 {
    6379
}
fn default_reconnect_interval() -> f64 {
    1.0
}
fn default_reconnect_backoff() -> f64 {
    1.0
}
fn default_max_reconnect_interval() -> f64 {
    30.0
}
fn default_max_retry() -> u32 {
    60
}
fn default_connect_timeout() -> f64 {
    5.0
}

/// Accept only a sequence of addresses; a lone scalar is a config mistake
fn host_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(host) => Ok(host),
                other => Err(D::Error::custom(format!(
                    "hosts entries must be strings, got {}",
                    other
                ))),
            })
            .collect(),
        other => Err(D::Error::custom(format!(
            "hosts must be a list of addresses, got {}",
            other
        ))),
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            shuffle_hosts: default_shuffle_hosts(),
            port: default_port(),
            db: 0,
            password: None,
            reconnect_interval: default_reconnect_interval(),
            reconnect_backoff: default_reconnect_backoff(),
            max_reconnect_interval: default_max_reconnect_interval(),
            max_retry: default_max_retry(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl PublishConfig {
    /// Parse options from YAML
    pub fn from_yaml(content: &str) -> Result<Self, PublishError> {
        serde_yaml::from_str(content).map_err(|e| PublishError::Config(e.to_string()))
    }

    /// Check option values
    pub fn validate(&self) -> Result<(), PublishError> {
        if self.hosts.is_empty() {
            return Err(PublishError::Config("hosts must not be empty".to_string()));
        }
        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(PublishError::Config("hosts contains an empty address".to_string()));
        }
        seconds("reconnect_interval", self.reconnect_interval)?;
        seconds("max_reconnect_interval", self.max_reconnect_interval)?;
        seconds("connect_timeout", self.connect_timeout)?;
        if !self.reconnect_backoff.is_finite() || self.reconnect_backoff < 1.0 {
            return Err(PublishError::Config(
                "reconnect_backoff must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.hosts
            .iter()
            .map(|h| Endpoint::parse(h, self.port))
            .collect()
    }

    fn backoff(&self) -> Result<Backoff, PublishError> {
        Ok(Backoff {
            initial: seconds("reconnect_interval", self.reconnect_interval)?,
            multiplier: self.reconnect_backoff,
            max: seconds("max_reconnect_interval", self.max_reconnect_interval)?,
        })
    }
}

/// Convert a seconds option, rejecting values a `Duration` can't hold
fn seconds(name: &str, value: f64) -> Result<Duration, PublishError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        PublishError::Config(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, value
        ))
    })
}

/// Client that pushes records to the first reachable endpoint
pub struct PublishClient {
    config: PublishConfig,
    pool: EndpointPool,
    backoff: Backoff,
    connector: Arc<dyn Connector>,
    connection: Option<Box<dyn Connection>>,
}

impl PublishClient {
    /// Create a client backed by Redis
    pub fn new(config: PublishConfig) -> Result<Self, PublishError> {
        config.validate()?;
        let connector = RedisConnector::new(
            config.db,
            config.password.clone(),
            seconds("connect_timeout", config.connect_timeout)?,
        );
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a Redis-backed client from YAML options
    pub fn from_yaml(content: &str) -> Result<Self, PublishError> {
        Self::new(PublishConfig::from_yaml(content)?)
    }

    /// Create a client with a custom transport
    pub fn with_connector(
        config: PublishConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, PublishError> {
        config.validate()?;

        Ok(Self {
            pool: EndpointPool::new(config.endpoints(), config.shuffle_hosts),
            backoff: config.backoff()?,
            config,
            connector,
            connection: None,
        })
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Endpoint the client is bound to, if connected
    pub fn current_endpoint(&self) -> Option<&Endpoint> {
        self.pool.current()
    }

    /// Bind to a reachable endpoint (no-op when already bound)
    pub async fn connect(&mut self) -> Result<(), PublishError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let mut budget = self.config.max_retry;
        let connection = self.open(&mut budget).await?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Sweep the pool until an endpoint accepts, spending retries from `budget`
    async fn open(&mut self, budget: &mut u32) -> Result<Box<dyn Connection>, PublishError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut last_error = String::from("no endpoints tried");

            for index in self.pool.sweep() {
                let endpoint = self.pool.endpoint(index).clone();
                match self.connector.connect(&endpoint).await {
                    Ok(connection) => {
                        info!("Connected to {}", endpoint);
                        self.pool.bind(index);
                        return Ok(connection);
                    }
                    Err(e) => {
                        debug!("{}", e);
                        last_error = e.to_string();
                    }
                }
            }

            if *budget == 0 {
                return Err(PublishError::ConnectionFailed {
                    attempts: attempt,
                    last_error,
                });
            }
            *budget -= 1;

            let delay = self.backoff.delay_for_attempt(attempt);
            warn!(
                "No endpoint reachable ({}), next sweep in {:?}",
                last_error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Serialize and push records to `destination`
    pub async fn publish(
        &mut self,
        destination: &str,
        records: &[ResultRecord],
    ) -> Result<usize, PublishError> {
        let payloads = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        self.publish_raw(destination, &payloads).await
    }

    /// Push already-serialized payloads to `destination`.
    ///
    /// A missing destination is a caller error. An empty payload list is a
    /// no-op once a destination is given.
    pub async fn publish_raw(
        &mut self,
        destination: &str,
        payloads: &[String],
    ) -> Result<usize, PublishError> {
        if destination.trim().is_empty() {
            return Err(PublishError::InvalidRequest(
                "destination is required".to_string(),
            ));
        }
        if payloads.is_empty() {
            return Ok(0);
        }

        let mut budget = self.config.max_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut connection = match self.connection.take() {
                Some(connection) => connection,
                None => self.open(&mut budget).await?,
            };

            match connection.push(destination, payloads).await {
                Ok(()) => {
                    self.connection = Some(connection);
                    debug!("Published {} records to {}", payloads.len(), destination);
                    return Ok(payloads.len());
                }
                Err(e) => {
                    // This endpoint is now considered bad
                    self.pool.release();

                    if budget == 0 {
                        return Err(PublishError::ConnectionFailed {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    budget -= 1;

                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!("{}; reconnecting in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
