//! Rate limiting middleware
//!
//! Sliding-window limit on failed authentication attempts per client address.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    failures: HashMap<String, Vec<Instant>>,
    max_failures: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_failures: usize, window: Duration) -> Self {
        Self {
            failures: HashMap::new(),
            max_failures,
            window,
        }
    }

    /// Whether `client_id` may attempt another authentication.
    pub fn is_allowed(&mut self, client_id: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        match self.failures.get_mut(client_id) {
            Some(entry) => {
                entry.retain(|&time| now.duration_since(time) <= window);
                if entry.is_empty() {
                    self.failures.remove(client_id);
                    true
                } else {
                    entry.len() < self.max_failures
                }
            }
            None => true,
        }
    }

    pub fn record_failure(&mut self, client_id: &str) {
        self.failures
            .entry(client_id.to_string())
            .or_default()
            .push(Instant::now());
    }

    /// Forget failures after a successful authentication.
    pub fn reset(&mut self, client_id: &str) {
        self.failures.remove(client_id);
    }
}
