use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// We define various kinds of latches, which are all a primitive signaling
/// mechanism. A latch starts as false. Eventually someone calls `set()` and
/// it becomes true. You can test if it has been set by calling `is_set()`.
pub trait Latch {
    /// Set the latch, signalling others.
    fn set(&self);
    /// Test if the latch is set.
    fn is_set(&self) -> bool;
}

/// A Latch starts as false and eventually becomes true. You can block until
/// it becomes true.
#[derive(Debug, Default)]
pub struct LockLatch {
    m: Mutex<bool>,
    v: Condvar,
}

impl LockLatch {
    #[inline]
    pub fn new() -> LockLatch {
        LockLatch {
            m: Mutex::new(false),
            v: Condvar::new(),
        }
    }

    /// Block until latch is set.
    pub fn wait(&self) {
        let mut guard = lock(&self.m);
        while !*guard {
            guard = match self.v.wait(guard) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl Latch for LockLatch {
    #[inline]
    fn set(&self) {
        let mut guard = lock(&self.m);
        *guard = true;
        self.v.notify_all();
    }

    #[inline]
    fn is_set(&self) -> bool {
        *lock(&self.m)
    }
}

/// Counting latches track a counter. Unlike other latches, calling `set()` does not
/// necessarily make the latch be considered set; instead, it just decrements the
/// counter. The latch is only set once the counter reaches zero.
#[derive(Debug)]
pub struct CountLatch {
    counter: AtomicUsize,
}

impl Default for CountLatch {
    fn default() -> Self {
        CountLatch::new()
    }
}

impl CountLatch {
    #[inline]
    pub fn new() -> CountLatch {
        CountLatch {
            counter: AtomicUsize::new(1),
        }
    }

    #[inline]
    pub fn increment(&self) {
        debug_assert!(!self.is_set());
        self.counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Latch for CountLatch {
    #[inline]
    fn set(&self) {
        let prev = self.counter.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "count latch decremented below zero.");
    }

    #[inline]
    fn is_set(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == 0
    }
}

// A panicking task must not wedge the scheduler, so poisoning is ignored.
fn lock<T>(m: &Mutex<T>) -> ::std::sync::MutexGuard<T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
