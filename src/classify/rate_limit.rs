//! Sliding-window admission control for outbound classification calls.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::LlmError;

/// Upper bound on wait/recheck rounds for a single admission.
const MAX_WAIT_ROUNDS: u32 = 1024;

/// Bounds calls to at most `max_requests` in any trailing `window`.
///
/// `acquire` suspends the caller until a slot opens; it never rejects. The
/// window is shared, so one limiter can gate several concurrent callers.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait for a slot, then record the admission.
    ///
    /// The check is re-run after every sleep since other callers may have
    /// taken the slot in the meantime.
    pub async fn acquire(&self) -> Result<(), LlmError> {
        for round in 0..MAX_WAIT_ROUNDS {
            let wait = {
                let mut calls = self.lock();
                let now = Instant::now();
                self.prune(&mut calls, now);

                if calls.len() < self.max_requests {
                    calls.push_back(now);
                    return Ok(());
                }

                match calls.front() {
                    Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };

            if wait.is_zero() {
                continue;
            }
            debug!(
                wait_ms = wait.as_millis() as u64,
                round,
                "Rate window full, waiting"
            );
            tokio::time::sleep(wait).await;
        }

        Err(LlmError::RateWindowStarved {
            rounds: MAX_WAIT_ROUNDS,
        })
    }

    /// Admissions currently inside the trailing window.
    pub fn current_len(&self) -> usize {
        let mut calls = self.lock();
        self.prune(&mut calls, Instant::now());
        calls.len()
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = calls.front() {
            if now.duration_since(oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_without_waiting() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.current_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_over_the_limit_blocks() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();
        limiter.acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        limiter.acquire().await.unwrap();

        let before = Instant::now();
        limiter.acquire().await.unwrap();
        let waited = before.elapsed();
        assert!(waited > Duration::ZERO);
        // The oldest admission leaves the window at t = 10s.
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(waited <= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_admissions_never_block() {
        let limiter = RateLimiter::new(1, Duration::from_secs(5));
        for _ in 0..4 {
            let before = Instant::now();
            limiter.acquire().await.unwrap();
            assert_eq!(before.elapsed(), Duration::ZERO);
            tokio::time::advance(Duration::from_secs(6)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_holds_under_concurrency() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(10)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for h in handles {
            admitted.push(h.await.unwrap().duration_since(start));
        }
        admitted.sort();

        // Any 3 consecutive admissions span at least one full window.
        for w in admitted.windows(3) {
            assert!(w[2] - w[0] >= Duration::from_secs(10));
        }
        assert!(admitted[5] >= Duration::from_secs(20));
    }

    #[test]
    fn zero_limit_is_clamped() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_requests(), 1);
    }
}
