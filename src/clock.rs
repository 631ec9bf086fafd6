use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source for TTL bookkeeping (§3 StateEntry, LocationHint:
/// "monotonic timestamp"). Injected rather than read from a global so that
/// state-store and location-hint TTL expiry (§8 property 6) can be tested
/// without sleeping in real time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test double that starts at `Instant::now()` and only moves forward when
/// told to, so TTL expiry can be asserted deterministically.
#[derive(Debug, Clone)]
pub struct TestClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap();
        *offset += by;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}
