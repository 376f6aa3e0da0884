use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use tokio::sync::Mutex;
use tracing::debug;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, RateDecision::Allow)
    }
}

/// Per-client sliding-window admission control.
///
/// Each client identifier owns an ordered deque of request instants inside
/// the trailing window. This is a true sliding window, so bursts cannot
/// exploit window-boundary alignment the way a fixed-bucket counter allows.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    cleanup_interval: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limit: config.limit as usize,
            window: Duration::from_secs(config.window_seconds.max(1)),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_seconds.max(1)),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one request from `client_id`.
    ///
    /// Boundary rule: a hit whose age is exactly the window duration counts
    /// as outside the window. Pruning is O(stale entries), amortized O(1)
    /// per call since each entry is pruned exactly once over its lifetime.
    /// A client with no history is always admitted, and a rejected request
    /// is never recorded.
    pub async fn check(&self, client_id: &str) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let hits = windows.entry(client_id.to_string()).or_default();

        while let Some(oldest) = hits.front() {
            if now.duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() < self.limit {
            hits.push_back(now);
            return RateDecision::Allow;
        }

        // The oldest in-window hit decides when the budget frees up again.
        let retry_after = hits
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.window);

        RateDecision::Limited { retry_after }
    }

    /// Convenience wrapper for callers that only need the boolean.
    pub async fn allow(&self, client_id: &str) -> bool {
        self.check(client_id).await.is_allowed()
    }

    /// Drop per-client entries whose windows have fully drained, bounding
    /// memory under high client-identifier cardinality (spoofable IPs).
    pub fn spawn_cleanup_task(self: Arc<Self>) {
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let window = self.window;
                let mut windows = self.windows.lock().await;
                let before = windows.len();
                windows.retain(|_, hits| hits.iter().any(|hit| now.duration_since(*hit) < window));
                let dropped = before - windows.len();
                if dropped > 0 {
                    debug!(dropped, "rate limiter cleanup pass");
                }
            }
        });
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.windows.lock().await.len()
    }
}
