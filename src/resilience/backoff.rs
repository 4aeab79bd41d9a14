//! Exponential backoff for discovery reconnects.

use rand::Rng;
use std::time::Duration;

use crate::lifecycle::ShutdownListener;

/// Delay before reconnect attempt `attempt` (zero-based).
///
/// `min(initial × 2^attempt, max)`, saturating instead of overflowing.
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    initial.saturating_mul(factor).min(max)
}

/// Tracks reconnect attempts and waits out the delay between them.
#[derive(Debug, Clone)]
pub struct ReconnectManager {
    initial: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl ReconnectManager {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: 0.0,
            attempt: 0,
        }
    }

    /// Add up to `ratio` × delay of random jitter to each wait.
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = calculate_backoff(self.attempt, self.initial, self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start over from the initial delay. Called after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Sleep for the next delay (plus jitter).
    ///
    /// Returns `false` if shutdown interrupted the wait.
    pub async fn wait(&mut self, shutdown: &mut ShutdownListener) -> bool {
        let attempt = self.attempt;
        let delay = self.next_delay();
        let delay = self.with_jitter_applied(delay);
        tracing::info!(attempt = attempt, delay = ?delay, "Waiting before reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown.recv() => {
                tracing::debug!("Reconnect wait cancelled by shutdown");
                false
            }
        }
    }

    fn with_jitter_applied(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    #[test]
    fn test_backoff_sequence_caps_at_max() {
        let mut manager = ReconnectManager::new(Duration::from_secs(1), Duration::from_secs(60));
        let delays: Vec<u64> = (0..9).map(|_| manager.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut manager = ReconnectManager::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..5 {
            manager.next_delay();
        }
        manager.reset();
        assert_eq!(manager.next_delay(), Duration::from_secs(1));
        assert_eq!(manager.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_large_attempt_saturates() {
        let max = Duration::from_secs(60);
        assert_eq!(calculate_backoff(40, Duration::from_secs(1), max), max);
        assert_eq!(calculate_backoff(u32::MAX, Duration::from_millis(1), max), max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_delay() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.subscribe();
        let mut manager = ReconnectManager::new(Duration::from_secs(2), Duration::from_secs(60));

        let start = tokio::time::Instant::now();
        assert!(manager.wait(&mut listener).await);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        assert_eq!(manager.attempt(), 1);
    }

    #[tokio::test]
    async fn test_wait_cancelled_by_shutdown() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.subscribe();
        let mut manager = ReconnectManager::new(Duration::from_secs(3600), Duration::from_secs(3600));

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let cancelled = tokio::time::timeout(Duration::from_secs(5), manager.wait(&mut listener))
            .await
            .expect("wait must return promptly on shutdown");
        assert!(!cancelled);
    }

    #[test]
    fn test_jitter_bounds() {
        let manager = ReconnectManager::new(Duration::from_secs(1), Duration::from_secs(60)).with_jitter(0.5);
        for _ in 0..100 {
            let delay = manager.with_jitter_applied(Duration::from_secs(10));
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(15));
        }
    }
}
