//! Endpoint pool and reconnect backoff.

use std::time::Duration;

use rand::seq::SliceRandom;

use crate::adapters::Endpoint;

/// Candidate endpoints plus the current selection
#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    shuffle: bool,
    /// Index of the last endpoint that accepted a connection
    cursor: Option<usize>,
    bound: bool,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Endpoint>, shuffle: bool) -> Self {
        Self {
            endpoints,
            shuffle,
            cursor: None,
            bound: false,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoint(&self, index: usize) -> &Endpoint {
        &self.endpoints[index]
    }

    /// Order in which one sweep tries the endpoints.
    ///
    /// Shuffled pools get a fresh random order per sweep. Otherwise the
    /// sweep starts after the last bound endpoint, so the one that just
    /// failed is tried last.
    pub fn sweep(&self) -> Vec<usize> {
        let n = self.endpoints.len();
        if self.shuffle {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rand::thread_rng());
            return order;
        }

        let start = self.cursor.map(|c| (c + 1) % n.max(1)).unwrap_or(0);
        (0..n).map(|i| (start + i) % n).collect()
    }

    /// Record a successful connection
    pub fn bind(&mut self, index: usize) {
        self.cursor = Some(index);
        self.bound = true;
    }

    /// Forget the current binding after a failure
    pub fn release(&mut self) {
        self.bound = false;
    }

    /// Endpoint the client is currently bound to
    pub fn current(&self) -> Option<&Endpoint> {
        if self.bound {
            self.cursor.map(|c| &self.endpoints[c])
        } else {
            None
        }
    }
}

/// Delay before the next sweep
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Backoff {
    /// Calculate delay for a specific retry (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial.min(self.max);
        }

        let delay = self.initial.as_secs_f64() * self.multiplier.powi((attempt - 1) as i32);
        Duration::from_secs_f64(delay.min(self.max.as_secs_f64()))
    }
}
