//! Fixed-window request limiter keyed by client identifier
//!
//! Each client gets a counter that resets once its window has elapsed.
//! Bursts straddling a window boundary can reach twice the limit.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Per-client window state
#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: u32,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Admitted { remaining: u32 },
    Rejected,
}

impl RateLimitDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    pub fn remaining(&self) -> u32 {
        match self {
            Self::Admitted { remaining } => *remaining,
            Self::Rejected => 0,
        }
    }
}

/// Fixed-window rate limiter
pub struct FixedWindowLimiter {
    window: Duration,
    max_requests: u32,
    clients: DashMap<String, WindowState>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            clients: DashMap::new(),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Number of tracked clients
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Count a request from `client` and decide whether to admit it
    pub fn check(&self, client: &str) -> RateLimitDecision {
        self.check_at(client, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading
    pub fn check_at(&self, client: &str, now: Instant) -> RateLimitDecision {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .clients
            .entry(client.to_string())
            .or_insert(WindowState {
                started_at: now,
                count: 0,
            });
        let state = entry.value_mut();

        if now.saturating_duration_since(state.started_at) >= self.window {
            state.started_at = now;
            state.count = 0;
        }

        state.count = state.count.saturating_add(1);

        if state.count <= self.max_requests {
            RateLimitDecision::Admitted {
                remaining: self.max_requests - state.count,
            }
        } else {
            RateLimitDecision::Rejected
        }
    }

    /// Drop clients whose window has elapsed. Returns how many were removed.
    pub fn evict_stale(&self) -> usize {
        self.evict_stale_at(Instant::now())
    }

    pub fn evict_stale_at(&self, now: Instant) -> usize {
        let before = self.clients.len();
        self.clients
            .retain(|_, state| now.saturating_duration_since(state.started_at) < self.window);
        before.saturating_sub(self.clients.len())
    }

    /// Run [`evict_stale`](Self::evict_stale) every `every` on the tokio runtime
    pub fn spawn_eviction(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.evict_stale();
                if removed > 0 {
                    debug!(
                        removed,
                        remaining = self.tracked_clients(),
                        "Evicted stale rate limit entries"
                    );
                }
            }
        })
    }
}
