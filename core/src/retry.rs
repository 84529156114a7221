//! Retry policy shared by the request executor and the lock coordinator.

use std::time::Duration;

use crate::error::{Error, Result};

/// How many times to try, how long to wait in between, and which statuses
/// count as transient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub retry_eligible_codes: Vec<u16>,
}

impl RetryPolicy {
    pub const HTTP_MAX_ATTEMPTS: u32 = 5;
    pub const HTTP_DELAY: Duration = Duration::from_secs(10);

    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self> {
        if max_attempts < 1 {
            return Err(Error::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            delay,
            retry_eligible_codes: vec![500],
        })
    }

    /// Five attempts, ten seconds apart, retrying on 500.
    pub fn http_default() -> Self {
        Self {
            max_attempts: Self::HTTP_MAX_ATTEMPTS,
            delay: Self::HTTP_DELAY,
            retry_eligible_codes: vec![500],
        }
    }

    pub fn with_retry_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_eligible_codes = codes.into_iter().collect();
        self
    }

    /// Toggle retrying on HTTP 500.
    pub fn retry_on_500(mut self, enabled: bool) -> Self {
        self.retry_eligible_codes.retain(|&c| c != 500);
        if enabled {
            self.retry_eligible_codes.push(500);
        }
        self
    }

    pub fn is_retry_eligible(&self, status: u16) -> bool {
        self.retry_eligible_codes.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::http_default()
    }
}

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
