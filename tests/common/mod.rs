//! Shared test helpers: an in-memory transport with controllable outages.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mailsieve::adapters::{Connection, Connector, Endpoint, TransportError};

#[derive(Debug, Default)]
struct State {
    /// Hosts that accept connections
    up: HashSet<String>,
    /// Every connection attempt, in order
    attempts: Vec<String>,
    /// (host, destination, payload) for every delivered payload
    delivered: Vec<(String, String, String)>,
    /// Number of upcoming pushes that fail
    failing_pushes: usize,
}

/// In-memory stand-in for the queueing backend
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub fn with_up(hosts: &[&str]) -> Self {
        let backend = Self::default();
        for host in hosts {
            backend.set_up(host, true);
        }
        backend
    }

    pub fn set_up(&self, host: &str, up: bool) {
        let mut state = self.state.lock().unwrap();
        if up {
            state.up.insert(host.to_string());
        } else {
            state.up.remove(host);
        }
    }

    pub fn fail_next_pushes(&self, count: usize) {
        self.state.lock().unwrap().failing_pushes = count;
    }

    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn delivered(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Connector for MockBackend {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(endpoint.host.clone());

        if !state.up.contains(&endpoint.host) {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        Ok(Box::new(MockConnection {
            host: endpoint.host.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    host: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn push(&mut self, destination: &str, payloads: &[String]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();

        if state.failing_pushes > 0 || !state.up.contains(&self.host) {
            state.failing_pushes = state.failing_pushes.saturating_sub(1);
            return Err(TransportError::Push {
                destination: destination.to_string(),
                reason: "broken pipe".to_string(),
            });
        }

        for payload in payloads {
            state
                .delivered
                .push((self.host.clone(), destination.to_string(), payload.clone()));
        }
        Ok(())
    }
}
