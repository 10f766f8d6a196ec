//! Per-backend request pacing with adaptive slowdown.
//!
//! Each hosted backend gets a governor that spaces its calls; a 429 swaps
//! the governor to a slower rate, and the base rate is restored after a
//! quiet period. The local backend is unpaced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::BackendId;

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Seconds without a 429 before the base rate is restored.
const DECAY_SECS: u64 = 60;

/// Per-backend pacer with adaptive rate adjustment via ArcSwap.
///
/// On a 429 the governor is atomically swapped to a slower rate (factor
/// doubles, capped at 16x). After [`DECAY_SECS`] with no 429s, the original
/// rate comes back.
pub struct AdaptivePacer {
    limiter: ArcSwap<DirectLimiter>,
    /// Base period between allowed requests.
    base_period: Duration,
    /// Current slowdown factor (1 = normal, 2 = half rate, ...).
    current_factor: AtomicU32,
    /// Timestamp of the last 429 response.
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl AdaptivePacer {
    /// Create a pacer with the given period between requests.
    pub fn new(period: Duration) -> Self {
        let quota = Quota::with_period(period).expect("period must be > 0");
        let limiter = std::sync::Arc::new(DirectLimiter::direct(quota));
        Self {
            limiter: ArcSwap::from(limiter),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// Create a pacer allowing `n` requests per second.
    pub fn per_second(n: u32) -> Self {
        let ms = 1000 / u64::from(n.max(1));
        Self::new(Duration::from_millis(ms))
    }

    /// Wait until the pacer allows a request.
    ///
    /// Suspends the calling future until a token is available, spacing
    /// requests at the configured rate across all concurrent callers.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter.until_ready().await;
    }

    /// Called when a 429 is received. Doubles the slowdown factor and swaps
    /// the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(16))
            });

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor)
            && let Some(quota) = Quota::with_period(scaled)
        {
            let new_limiter = std::sync::Arc::new(DirectLimiter::direct(quota));
            self.limiter.store(new_limiter);
        }
    }

    /// If the quiet period has passed since the last 429, restore the base rate.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= DECAY_SECS))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            let quota = Quota::with_period(self.base_period).expect("base period valid");
            let limiter = std::sync::Arc::new(DirectLimiter::direct(quota));
            self.limiter.store(limiter);
        }
    }

    #[cfg(test)]
    fn factor(&self) -> u32 {
        self.current_factor.load(Ordering::SeqCst)
    }
}

/// Collection of per-backend pacers. Hosted backends only; the local model
/// needs no throttling.
pub struct BackendPacers {
    pacers: HashMap<BackendId, AdaptivePacer>,
}

impl Default for BackendPacers {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendPacers {
    pub fn new() -> Self {
        let mut pacers = HashMap::new();

        // Hosted completion endpoints tolerate far fewer requests per second
        // than search APIs; the adaptive slowdown handles anything tighter.
        pacers.insert(BackendId::OpenAi, AdaptivePacer::per_second(2));
        pacers.insert(BackendId::Anthropic, AdaptivePacer::per_second(2));
        pacers.insert(BackendId::Gemini, AdaptivePacer::per_second(5));
        // Ollama: local, no pacer.

        Self { pacers }
    }

    /// Get the pacer for a backend, if it is paced at all.
    pub fn get(&self, id: BackendId) -> Option<&AdaptivePacer> {
        self.pacers.get(&id)
    }
}
