use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::PoolError;

/// Minimum interval between accepted submissions, per caller.
///
/// A rejected submission does not count as a submission.
pub struct SubmissionLimiter {
    min_interval: Option<Duration>,
    last_accepted: Mutex<HashMap<String, Instant>>,
}

impl SubmissionLimiter {
    /// `0` disables the limit.
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: (min_interval_ms > 0).then(|| Duration::from_millis(min_interval_ms)),
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, caller: &str) -> Result<(), PoolError> {
        let Some(min_interval) = self.min_interval else {
            return Ok(());
        };
        let mut last = self.last_accepted.lock();
        let now = Instant::now();
        if let Some(previous) = last.get(caller) {
            let elapsed = now.duration_since(*previous);
            if elapsed < min_interval {
                return Err(PoolError::RateLimited {
                    caller: caller.to_string(),
                    retry_after_ms: (min_interval - elapsed).as_millis() as u64,
                });
            }
        }
        last.insert(caller.to_string(), now);
        Ok(())
    }

    /// Forget an acceptance whose submission failed afterwards.
    pub fn release(&self, caller: &str) {
        self.last_accepted.lock().remove(caller);
    }
}
