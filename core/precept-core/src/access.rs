//! Admission control in front of the dialogue: one allow-listed identity and
//! a sliding-window rate limit per identity.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Unauthorized,
    RateLimited,
}

/// Per-identity ring of admitted timestamps. Each ring holds at most
/// `capacity` entries; expired entries are evicted when the ring is read.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    capacity: usize,
    windows: HashMap<i64, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            windows: HashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_secs(config.window_secs), config.max_events)
    }

    pub fn check(&mut self, identity: i64) -> bool {
        self.check_at(identity, Instant::now())
    }

    pub fn check_at(&mut self, identity: i64, now: Instant) -> bool {
        let capacity = self.capacity;
        let ring = self
            .windows
            .entry(identity)
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        while let Some(oldest) = ring.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                ring.pop_front();
            } else {
                break;
            }
        }

        if ring.len() >= capacity {
            return false;
        }
        ring.push_back(now);
        true
    }

    /// Admitted events still inside the window for `identity`.
    pub fn in_window(&self, identity: i64) -> usize {
        self.windows.get(&identity).map_or(0, VecDeque::len)
    }
}

#[derive(Debug)]
pub struct AccessGate {
    allowed_identity: i64,
    limiter: RateLimiter,
}

impl AccessGate {
    pub fn new(allowed_identity: i64, limiter: RateLimiter) -> Self {
        Self {
            allowed_identity,
            limiter,
        }
    }

    pub fn admit(&mut self, identity: i64) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    /// Identity check first, so unauthorized senders never consume window
    /// slots.
    pub fn admit_at(&mut self, identity: i64, now: Instant) -> Admission {
        if identity != self.allowed_identity {
            tracing::warn!(identity, "Dropping event from unauthorized sender");
            return Admission::Unauthorized;
        }
        if !self.limiter.check_at(identity, now) {
            tracing::warn!(identity, "Dropping event over rate limit");
            return Admission::RateLimited;
        }
        Admission::Admitted
    }
}
