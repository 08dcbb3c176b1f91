use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative cancellation: a flag checked at iteration boundaries plus a
/// condvar so `cancel()` wakes a worker sleeping in `wait_timeout`
/// immediately instead of after the full budget/back-off period.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self { inner: Arc::new((Mutex::new(false), Condvar::new())) }
    }

    pub fn cancel(&self) {
        let (lock, cv) = &*self.inner;
        *lock.lock().unwrap() = true;
        cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Sleeps up to `dur`; returns true if cancelled before or during the
    /// wait.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let (lock, cv) = &*self.inner;
        let deadline = Instant::now() + dur;
        let mut cancelled = lock.lock().unwrap();
        loop {
            if *cancelled {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = cv.wait_timeout(cancelled, deadline - now).unwrap();
            cancelled = guard;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
