//! Sliding-window rate limiting.
//!
//! The MCP engine uses one window per engine instance; the HTTP bridge
//! keys windows by remote address. The window semantics are fixed by the
//! protocol contract (at most `max` requests per `window`, counted over a
//! sliding interval), so this is a plain timestamp queue rather than a
//! token bucket.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single sliding window.
#[derive(Debug)]
pub struct RateWindow {
    max: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: VecDeque::new(),
        }
    }

    /// Default protocol limit: 60 requests per 60 seconds.
    pub fn per_minute(max: usize) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    /// Record an attempt. Returns false when the window is full.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&mut self, now: Instant) -> bool {
        while let Some(front) = self.hits.front() {
            if now.duration_since(*front) > self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() >= self.max {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}

/// Sliding windows keyed by caller identity (remote address on the bridge).
#[derive(Debug)]
pub struct KeyedRateLimiter<K: Eq + Hash> {
    max: usize,
    window: Duration,
    windows: Mutex<HashMap<K, RateWindow>>,
}

impl<K: Eq + Hash + Clone> KeyedRateLimiter<K> {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_acquire(&self, key: &K) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows
            .entry(key.clone())
            .or_insert_with(|| RateWindow::new(self.max, self.window))
            .try_acquire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_up_to_max() {
        let mut w = RateWindow::new(3, Duration::from_secs(60));
        assert!(w.try_acquire());
        assert!(w.try_acquire());
        assert!(w.try_acquire());
        assert!(!w.try_acquire());
    }

    #[test]
    fn window_slides() {
        let mut w = RateWindow::new(1, Duration::from_millis(10));
        let start = Instant::now();
        assert!(w.try_acquire_at(start));
        assert!(!w.try_acquire_at(start));
        assert!(w.try_acquire_at(start + Duration::from_millis(20)));
    }

    #[test]
    fn keyed_windows_are_independent() {
        let limiter = KeyedRateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.try_acquire(&"a"));
        assert!(!limiter.try_acquire(&"a"));
        assert!(limiter.try_acquire(&"b"));
    }
}
