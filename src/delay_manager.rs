use log::{debug, info};
use rand::Rng;
use std::ops::RangeInclusive;
use std::thread;
use std::time::Duration;

/// Voluntary pauses between requests. Injected so tests can run without sleeping.
pub trait Pacer {
    /// Before every HTTP attempt.
    fn request_delay(&self);
    /// Between two buckets.
    fn bucket_delay(&self);
}

#[derive(Debug, Clone)]
pub struct RandomDelay {
    request_ms: RangeInclusive<u64>,
    bucket_ms: RangeInclusive<u64>,
}

impl RandomDelay {
    pub fn new(request_ms: RangeInclusive<u64>, bucket_ms: RangeInclusive<u64>) -> Self {
        RandomDelay { request_ms, bucket_ms }
    }

    fn sleep_in(range: &RangeInclusive<u64>) -> u64 {
        if range.is_empty() {
            return 0;
        }
        let mut rng = rand::thread_rng();
        let delay_ms = rng.gen_range(range.clone());
        thread::sleep(Duration::from_millis(delay_ms));
        delay_ms
    }
}

impl Default for RandomDelay {
    fn default() -> Self {
        RandomDelay::new(1_000..=3_000, 2_000..=5_000)
    }
}

impl Pacer for RandomDelay {
    fn request_delay(&self) {
        let waited = Self::sleep_in(&self.request_ms);
        debug!("Waited {:.2}s (Request Delay)", waited as f64 / 1000.0);
    }

    fn bucket_delay(&self) {
        let waited = Self::sleep_in(&self.bucket_ms);
        info!("Waited {:.2}s (Bucket Delay)", waited as f64 / 1000.0);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Pacer for NoDelay {
    fn request_delay(&self) {}
    fn bucket_delay(&self) {}
}
