use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Blocking wait used by pacing and retry backoff.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Process-wide gate in front of every outgoing request.
pub trait RateLimiter: Send + Sync {
    /// Blocks until the caller may issue its next request.
    fn acquire(&self);
}

/// Enforces a minimum spacing between consecutive `acquire` calls.
///
/// The last grant time is shared behind a mutex, so several workers holding
/// the same gate still see the provider-wide spacing.
pub struct FixedIntervalGate {
    interval: Duration,
    last: Mutex<Option<Instant>>,
    sleeper: Arc<dyn Sleeper>,
}

impl FixedIntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self::with_sleeper(interval, Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(interval: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
            sleeper,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl RateLimiter for FixedIntervalGate {
    fn acquire(&self) {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                self.sleeper.sleep(self.interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn first_acquire_is_free() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gate = FixedIntervalGate::with_sleeper(Duration::from_secs(10), sleeper.clone());
        gate.acquire();
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[test]
    fn back_to_back_acquire_waits_out_interval() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gate = FixedIntervalGate::with_sleeper(Duration::from_secs(10), sleeper.clone());
        gate.acquire();
        gate.acquire();

        let slept = sleeper.slept.lock().unwrap();
        assert_eq!(slept.len(), 1);
        assert!(slept[0] <= Duration::from_secs(10));
        assert!(slept[0] > Duration::from_secs(5));
    }

    #[test]
    fn zero_interval_never_sleeps() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gate = FixedIntervalGate::with_sleeper(Duration::ZERO, sleeper.clone());
        gate.acquire();
        gate.acquire();
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }
}
