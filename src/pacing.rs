//! Delays and cooperative cancellation.
//!
//! Every wait in the engine goes through [`Sleep`], so the whole request
//! path stays sequential and tests can run without wall-clock time.
//! [`Interrupt`] is the cancellation flag checked between requests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;

/// Granularity at which [`InterruptibleSleep`] re-checks the interrupt flag.
const SLICE: Duration = Duration::from_millis(100);

/// A cloneable, shareable interrupt flag.
///
/// Once triggered it stays triggered for the rest of the process.
#[derive(Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Create an untriggered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Interrupt").field(&self.is_triggered()).finish()
    }
}

/// Blocking delay on the single execution path.
pub trait Sleep {
    /// Wait for `duration`, or less if the implementation is interruptible.
    fn sleep(&self, duration: Duration);
}

impl<S: Sleep + ?Sized> Sleep for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Real-time sleep that wakes early once the interrupt fires.
#[derive(Debug, Clone)]
pub struct InterruptibleSleep {
    interrupt: Interrupt,
}

impl InterruptibleSleep {
    /// Sleep that watches `interrupt`.
    #[must_use]
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }
}

impl Sleep for InterruptibleSleep {
    fn sleep(&self, duration: Duration) {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            return;
        };
        loop {
            if self.interrupt.is_triggered() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// `base` plus a uniformly random extra in `[0, spread]`.
#[must_use]
pub fn jittered(base: Duration, spread: Duration) -> Duration {
    if spread.is_zero() {
        return base;
    }
    let spread_ms = u64::try_from(spread.as_millis()).unwrap_or(u64::MAX);
    let extra = rand::rng().random_range(0..=spread_ms);
    base.saturating_add(Duration::from_millis(extra))
}
