//! A one-shot, broadcastable cancellation latch used by every component
//! that runs a cancellable periodic loop or sleep: the scheduler's
//! control loop, the measurement dump thread, and per-tenant behavior
//! phase execution. Firing it wakes every waiter immediately instead of
//! waiting out their current timeout.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub struct Latch {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self { fired: Mutex::new(false), cv: Condvar::new() }
    }

    /// Waits up to `dur`, or until fired. Returns `true` if fired.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let mut fired = self.fired.lock();
        if !*fired {
            self.cv.wait_for(&mut fired, dur);
        }
        *fired
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    pub fn fire(&self) {
        *self.fired.lock() = true;
        self.cv.notify_all();
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fire_wakes_waiter_before_timeout_elapses() {
        let latch = Arc::new(Latch::new());
        let waiter = latch.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(10));
        latch.fire();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_timeout_expires_on_its_own() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(5)));
    }
}
