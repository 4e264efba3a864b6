use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Spaces out requests to the same upstream host.
///
/// Each call reserves the next free slot for its host and sleeps until then, so
/// concurrent day fetches against one BA are serialized without holding the
/// lock across the wait. A little jitter keeps bursts from looking scripted.
pub struct RateLimiter {
    min_interval: Duration,
    max_jitter_ms: u64,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            max_jitter_ms: (min_interval.as_millis() as u64) / 4,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// No spacing at all; used by tests and replay fetchers.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub async fn wait(&self, host: &str) {
        if self.min_interval.is_zero() {
            return;
        }

        let jitter = if self.max_jitter_ms > 0 {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(0..=self.max_jitter_ms))
        } else {
            Duration::ZERO
        };

        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(host).copied().filter(|s| *s > now).unwrap_or(now);
            slots.insert(host.to_string(), slot + self.min_interval + jitter);
            slot
        };

        if slot > Instant::now() {
            tracing::trace!(host, delay_ms = (slot - Instant::now()).as_millis() as u64, "rate limited");
        }
        sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_host_is_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        let start = Instant::now();
        limiter.wait("www.caiso.com").await;
        limiter.wait("www.caiso.com").await;
        assert!(Instant::now() - start >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        let start = Instant::now();
        limiter.wait("www.caiso.com").await;
        limiter.wait("www.ercot.com").await;
        assert!(Instant::now() - start < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_disabled_never_sleeps() {
        let limiter = RateLimiter::disabled();
        let start = Instant::now();
        for _ in 0..10 {
            limiter.wait("x").await;
        }
        assert!(Instant::now() - start < Duration::from_millis(50));
    }
}
