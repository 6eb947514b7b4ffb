use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Un-jittered delay in seconds: `max(1, base * 2^(attempt - 1))`, saturating.
pub fn exponential_delay(base_delay_secs: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base_delay_secs.saturating_mul(factor).max(1)
}

/// Inclusive jitter band of ±25% around `delay`, never below one second.
pub fn jitter_bounds(delay: u64) -> (u64, u64) {
    let quarter = delay.div_ceil(4);
    let low = delay.saturating_sub(quarter).max(1);
    let high = delay.saturating_add(quarter).max(low);
    (low, high)
}

/// Jittered delay in whole seconds for `attempt` (1-based).
pub fn next_delay<R: Rng + ?Sized>(base_delay_secs: u64, attempt: u32, rng: &mut R) -> u64 {
    let (low, high) = jitter_bounds(exponential_delay(base_delay_secs, attempt));
    rng.random_range(low..=high)
}

/// Owns the jitter RNG used by the retry loop.
pub struct BackoffPolicy {
    rng: Mutex<StdRng>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl BackoffPolicy {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic jitter sequence.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn next_delay(&self, base_delay_secs: u64, attempt: u32) -> u64 {
        match self.rng.lock() {
            Ok(mut rng) => next_delay(base_delay_secs, attempt, &mut *rng),
            Err(_) => exponential_delay(base_delay_secs, attempt),
        }
    }
}
