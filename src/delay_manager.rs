use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use log::{debug, info};

use crate::config::DelayConfig;
use crate::scraper::CancelToken;

/// Randomized human-like pauses. Only state is the generator.
pub struct DelayPolicy {
    config: DelayConfig,
    rng: StdRng,
}

impl DelayPolicy {
    pub fn new(config: DelayConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        DelayPolicy { config, rng }
    }

    /// All waits are zero. For tests and dry runs.
    pub fn zero() -> Self {
        DelayPolicy::new(DelayConfig {
            page_min_secs: 0.0,
            page_max_secs: 0.0,
            detail_min_secs: 0.0,
            detail_max_secs: 0.0,
            backoff_base_secs: 0.0,
            backoff_max_secs: 0.0,
            backoff_jitter: 0.0,
            seed: Some(0),
        })
    }

    pub fn inter_page_delay(&mut self) -> Duration {
        self.uniform(self.config.page_min_secs, self.config.page_max_secs)
    }

    pub fn detail_delay(&mut self) -> Duration {
        self.uniform(self.config.detail_min_secs, self.config.detail_max_secs)
    }

    /// Exponential in `attempt` (1-based) with multiplicative jitter, capped.
    ///
    /// Jitter stays below one step so the sequence never decreases.
    pub fn retry_backoff(&mut self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let step = self.config.backoff_base_secs * 2f64.powi(exponent);
        let jitter = self.config.backoff_jitter.clamp(0.0, 0.999);
        let factor = if jitter > 0.0 {
            1.0 + self.rng.gen_range(0.0..jitter)
        } else {
            1.0
        };
        let secs = (step * factor).min(self.config.backoff_max_secs);
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn uniform(&mut self, min: f64, max: f64) -> Duration {
        if max <= min {
            return Duration::from_secs_f64(min.max(0.0));
        }
        Duration::from_secs_f64(self.rng.gen_range(min..=max))
    }
}

/// Blocking wait seam, so tests can fast-forward time.
pub trait Sleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken);
}

/// Real sleeping, in short slices so a cancel request cuts the wait short.
pub struct ThreadSleeper {
    slice: Duration,
}

impl ThreadSleeper {
    pub fn new() -> Self {
        ThreadSleeper {
            slice: Duration::from_millis(250),
        }
    }
}

impl Default for ThreadSleeper {
    fn default() -> Self {
        Self::new()
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        if duration.is_zero() {
            return;
        }
        info!("Waiting for {:.1} seconds...", duration.as_secs_f64());
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                debug!("Wait cut short by cancel request");
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(self.slice.min(deadline - now));
        }
    }
}

/// Records requested waits instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, _cancel: &CancelToken) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}
