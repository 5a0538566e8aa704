use rand::Rng;
use std::time::Duration;

/// Reconnect delay for the stream feeds: doubles per failed attempt up to a
/// cap, with a random spread so several processes don't reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    /// 1s, 2s, 4s ... capped at 30s, +-10%.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 0.1)
    }
}

impl ExponentialBackoff {
    /// `jitter` is a fraction of the delay, clamped to [0, 1].
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    /// Call after a connection has been established and authorized.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
