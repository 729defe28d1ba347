//! Busy Retry Module
//!
//! A bounded retry loop for engine calls that report "busy" because another
//! connection holds the lock they need. Every other outcome, success or
//! failure, is returned immediately.
//!
//! The wait between attempts goes through a [`Sleeper`] so tests can count
//! and measure waits without sleeping.

use super::engine::EngineResult;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default number of attempts for a busy prepare or step.
pub const DEFAULT_BUSY_RETRIES: u32 = 5;

/// Default wait between busy attempts, in milliseconds.
pub const DEFAULT_BUSY_WAIT_MS: u64 = 100;

/// Strategy for waiting between busy attempts.
pub trait Sleeper: Send + Sync + fmt::Debug {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread for the requested duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry policy for busy engine calls.
///
/// `attempts` is the total number of tries, including the first one. A value
/// of zero is treated as one.
#[derive(Debug, Clone)]
pub struct BusyRetry {
    attempts: u32,
    wait: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for BusyRetry {
    fn default() -> Self {
        BusyRetry::new(DEFAULT_BUSY_RETRIES, Duration::from_millis(DEFAULT_BUSY_WAIT_MS))
    }
}

impl BusyRetry {
    pub fn new(attempts: u32, wait: Duration) -> Self {
        BusyRetry {
            attempts,
            wait,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replaces the wait strategy.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn set_wait(&mut self, wait: Duration) {
        self.wait = wait;
    }

    pub fn set_sleeper(&mut self, sleeper: Arc<dyn Sleeper>) {
        self.sleeper = sleeper;
    }

    /// Runs `op` until it returns something other than busy or the attempts
    /// are used up. The last busy error is returned on exhaustion.
    pub(crate) fn run<T>(&self, what: &str, mut op: impl FnMut() -> EngineResult<T>) -> EngineResult<T> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_busy() && attempt < attempts => {
                    warn!(
                        attempt,
                        attempts,
                        wait_ms = self.wait.as_millis() as u64,
                        "{}: database busy, retrying",
                        what
                    );
                    self.sleeper.sleep(self.wait);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Sleeper;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records requested waits instead of sleeping.
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        pub waits: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn total(&self) -> Duration {
            self.waits.lock().unwrap().iter().sum()
        }

        pub fn count(&self) -> usize {
            self.waits.lock().unwrap().len()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }
}
