//! Per-host rate limiting.
//!
//! At most one request per second per registered host (spec §4.A point 3);
//! waiters queue FIFO per host. `tokio::sync::Mutex` already wakes waiters
//! in the order they queued, so a per-host async mutex guarding "time of
//! last request" gives FIFO ordering for free without a separate queue
//! data structure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    interval: Duration,
    hosts: Mutex<HashMap<String, Arc<Mutex<Instant>>>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, hosts: Mutex::new(HashMap::new()) }
    }

    async fn lock_for_host(&self, host: &str) -> Arc<Mutex<Instant>> {
        let mut hosts = self.hosts.lock().await;
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Instant::now() - Duration::from_secs(3600))))
            .clone()
    }

    /// Blocks until it is this caller's turn to contact `host`, then
    /// reserves the next slot.
    pub async fn acquire(&self, host: &str) {
        let lock = self.lock_for_host(host).await;
        let mut last = lock.lock().await;
        let now = Instant::now();
        let earliest_allowed = *last + self.interval;
        if earliest_allowed > now {
            tokio::time::sleep(earliest_allowed - now).await;
        }
        *last = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_requests_to_the_same_host_at_the_configured_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "elapsed={elapsed:?}");
    }

    #[tokio::test]
    async fn different_hosts_do_not_serialize_against_each_other() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        let start = Instant::now();
        limiter.acquire("a.example.com").await;
        limiter.acquire("b.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(150));
    }
}
