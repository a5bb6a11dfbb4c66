use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Full sweep of idle keys after this many checks.
const SWEEP_EVERY: usize = 1024;

struct Hits {
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl Hits {
    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.stamps.front() {
            if now.duration_since(*front) >= self.window { self.stamps.pop_front(); } else { break; }
        }
    }
}

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, Hits>>,
    checks: Arc<AtomicUsize>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), checks: Arc::new(AtomicUsize::new(0)), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        // must run before taking an entry guard below
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now);
        }
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Hits { window, stamps: VecDeque::new() });
        entry.window = window;
        entry.expire(now);
        if entry.stamps.len() < limit {
            entry.stamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drop keys with no hits left inside their window.
    pub fn sweep(&self, now: Instant) {
        self.store.retain(|_, hits| {
            hits.expire(now);
            !hits.stamps.is_empty()
        });
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Per-action limits for authenticated writes.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub post_limit: usize,
    pub post_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub profile_limit: usize,
    pub profile_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            post_limit: 5,
            post_window: Duration::from_secs(300),
            comment_limit: 20,
            comment_window: Duration::from_secs(60),
            profile_limit: 10,
            profile_window: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            post_limit: usize_env("RL_POST_LIMIT", d.post_limit),
            post_window: dur_env("RL_POST_WINDOW", d.post_window),
            comment_limit: usize_env("RL_COMMENT_LIMIT", d.comment_limit),
            comment_window: dur_env("RL_COMMENT_WINDOW", d.comment_window),
            profile_limit: usize_env("RL_PROFILE_LIMIT", d.profile_limit),
            profile_window: dur_env("RL_PROFILE_WINDOW", d.profile_window),
        }
    }
}

/// High level guard used by handlers, keyed by user id.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_post(&self, user: &str) -> bool { self.limiter.check(&format!("post:{user}"), self.cfg.post_limit, self.cfg.post_window) }
    pub fn allow_comment(&self, user: &str) -> bool { self.limiter.check(&format!("comment:{user}"), self.cfg.comment_limit, self.cfg.comment_window) }
    pub fn allow_profile(&self, user: &str) -> bool { self.limiter.check(&format!("profile:{user}"), self.cfg.profile_limit, self.cfg.profile_window) }
}
