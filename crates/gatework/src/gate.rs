//! Bounded permit gate — the admission-control primitive.
//!
//! A `PermitGate` caps how many units of work may be in flight at once.
//! `acquire` suspends the caller until capacity frees up; the returned
//! `Permit` releases its slot when dropped. Tying release to `Drop` makes
//! the two failure modes of manual release unrepresentable: a permit cannot
//! be released twice, and a release without a matching acquire cannot be
//! expressed at all.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::count::SharedCount;

/// Counting gate with a fixed maximum number of outstanding permits.
///
/// Capacity zero is legal: `acquire` never completes and `try_acquire`
/// always returns `None`.
#[derive(Debug, Clone)]
pub struct PermitGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    held: SharedCount,
}

impl PermitGate {
    pub fn new(max_permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_permits)),
            capacity: max_permits,
            held: SharedCount::new(0),
        }
    }

    /// Wait until a permit is free and take it.
    ///
    /// Waiters are queued, so every caller is eventually served as long as
    /// permits keep being released.
    pub async fn acquire(&self) -> Permit {
        // The semaphore is never closed, so acquire can only fail if the
        // gate itself has been dropped — unreachable while `&self` lives.
        let inner = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("gate semaphore closed"));
        self.held.increment();
        Permit {
            _inner: inner,
            held: self.held.clone(),
        }
    }

    /// Take a permit if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let inner = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.held.increment();
        Some(Permit {
            _inner: inner,
            held: self.held.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits free for immediate acquisition.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn held(&self) -> i64 {
        self.held.value()
    }
}

/// A held unit of admission capacity. Returns to the gate on drop.
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
    held: SharedCount,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.held.decrement();
    }
}
