//! Shared atomic counter.
//!
//! `SharedCount` is the one piece of mutable shared state in this crate.
//! Every mutation goes through an atomic read-modify-write, so the observed
//! value is always the net of completed increments and decrements — there is
//! no window in which a reader can see a half-applied update.
//!
//! Isolated-memory (subprocess) contexts never hold a `SharedCount` directly:
//! all accounting for process-backed pools happens in the coordinating parent
//! process, at the parent end of each worker socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Cheaply clonable handle to a shared counter.
///
/// Clones observe the same underlying value.
#[derive(Debug, Clone, Default)]
pub struct SharedCount {
    count: Arc<AtomicI64>,
}

impl SharedCount {
    pub fn new(initial: i64) -> Self {
        Self {
            count: Arc::new(AtomicI64::new(initial)),
        }
    }

    /// Add one, returning the post-increment value.
    pub fn increment(&self) -> i64 {
        self.increment_by(1)
    }

    /// Add `amount`, returning the post-increment value.
    pub fn increment_by(&self, amount: i64) -> i64 {
        self.count.fetch_add(amount, Ordering::AcqRel) + amount
    }

    /// Subtract one, returning the post-decrement value.
    pub fn decrement(&self) -> i64 {
        self.decrement_by(1)
    }

    /// Subtract `amount`, returning the post-decrement value.
    pub fn decrement_by(&self, amount: i64) -> i64 {
        self.count.fetch_sub(amount, Ordering::AcqRel) - amount
    }

    pub fn value(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_and_decrements() {
        let count = SharedCount::new(0);
        assert_eq!(count.increment(), 1);
        assert_eq!(count.increment_by(4), 5);
        assert_eq!(count.decrement(), 4);
        assert_eq!(count.decrement_by(4), 0);
        assert_eq!(count.value(), 0);
    }

    #[test]
    fn clones_share_state() {
        let count = SharedCount::new(10);
        let other = count.clone();
        other.decrement_by(3);
        assert_eq!(count.value(), 7);
    }

    #[tokio::test]
    async fn no_lost_updates_under_contention() {
        let count = SharedCount::new(0);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let count = count.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    count.increment();
                }
                for _ in 0..1000 {
                    count.decrement();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(count.value(), 0);
    }
}
