//! Size-tracked work queue.
//!
//! Multi-producer/multi-consumer FIFO whose reported size is decoupled from
//! the transport's internal buffering. The counter moves only at the two
//! points where an item provably changes state: after the transport has
//! accepted a `put`, and after a `get` has committed to returning an item.
//! A blocked `get` never decrements, and a failed `try_get`/`get_timeout`
//! leaves the size untouched, so `qsize` is always the net of completed
//! puts and gets and is safe to use for flow-control decisions.
//!
//! Cross-process use follows the coordinator model: the queue lives in the
//! parent process and subprocess traffic reaches it through the parent end
//! of each worker socket, so no transport-native size query is ever needed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::count::SharedCount;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Non-blocking get found nothing available.
    #[error("queue is empty")]
    Empty,
    /// Blocking get exceeded its timeout.
    #[error("timed out waiting for an item")]
    Timeout,
    /// The queue has been closed and drained.
    #[error("queue is closed")]
    Closed,
}

/// MPMC queue with an explicit size counter.
///
/// Handles are cheap to clone; all clones observe the same queue. Consumers
/// take turns on the receiving end, which keeps a single global FIFO order
/// across any number of producers.
#[derive(Debug)]
pub struct TrackedQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
    size: SharedCount,
    closed: CancellationToken,
}

// Manual impl: handles are clonable regardless of whether `T` is.
impl<T> Clone for TrackedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            size: self.size.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T: Send> TrackedQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            size: SharedCount::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Append an item. Never blocks; the transport is unbounded and
    /// producers are throttled upstream by the permit gate.
    pub fn put(&self, item: T) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        // Counter moves only after the transport holds the item.
        self.tx.send(item).map_err(|_| QueueError::Closed)?;
        self.size.increment();
        Ok(())
    }

    /// Remove and return the oldest item, waiting as long as it takes.
    ///
    /// After `close`, remaining items are still drained; only then does
    /// this fail with `Closed`.
    pub async fn get(&self) -> Result<T, QueueError> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.try_recv() {
                Ok(item) => {
                    self.size.decrement();
                    return Ok(item);
                }
                Err(TryRecvError::Empty) => {
                    if self.closed.is_cancelled() {
                        return Err(QueueError::Closed);
                    }
                }
                Err(TryRecvError::Disconnected) => return Err(QueueError::Closed),
            }

            tokio::select! {
                item = rx.recv() => match item {
                    Some(item) => {
                        self.size.decrement();
                        return Ok(item);
                    }
                    None => return Err(QueueError::Closed),
                },
                _ = self.closed.cancelled() => {
                    // Loop once more to drain anything that raced in.
                }
            }
        }
    }

    /// Like `get`, but gives up after `timeout` with no side effects.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T, QueueError> {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout),
        }
    }

    /// Non-blocking get. Fails with `Empty` when nothing is available
    /// right now, leaving the size untouched.
    ///
    /// "Available" means available to this caller: while another consumer
    /// is blocked on the receiving end, any queued item already belongs to
    /// it, so `try_get` may report `Empty` even when `qsize` is positive.
    pub fn try_get(&self) -> Result<T, QueueError> {
        // A consumer already blocked on the receiver means nothing is
        // available for us; any item that arrives is theirs first.
        let Ok(mut rx) = self.rx.try_lock() else {
            return Err(QueueError::Empty);
        };
        match rx.try_recv() {
            Ok(item) => {
                self.size.decrement();
                Ok(item)
            }
            Err(TryRecvError::Empty) => {
                if self.closed.is_cancelled() {
                    Err(QueueError::Closed)
                } else {
                    Err(QueueError::Empty)
                }
            }
            Err(TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }

    /// Net of completed puts and gets.
    pub fn qsize(&self) -> i64 {
        self.size.value()
    }

    pub fn is_empty(&self) -> bool {
        self.qsize() == 0
    }

    /// Stop accepting new items. Consumers drain what is already queued,
    /// then see `Closed`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl<T: Send> Default for TrackedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn size_tracks_completed_puts_and_gets() {
        let queue = TrackedQueue::new();
        assert!(queue.is_empty());

        for i in 0..5 {
            queue.put(i).unwrap();
        }
        assert_eq!(queue.qsize(), 5);

        let first = queue.get().await.unwrap();
        assert_eq!(first, 0);
        assert_eq!(queue.qsize(), 4);

        queue.get().await.unwrap();
        queue.get().await.unwrap();
        assert_eq!(queue.qsize(), 2);
        assert!(!queue.is_empty());
    }

    #[tokio::test]
    async fn try_get_on_empty_fails_without_side_effects() {
        let queue: TrackedQueue<u32> = TrackedQueue::new();
        assert_eq!(queue.try_get(), Err(QueueError::Empty));
        assert_eq!(queue.qsize(), 0);

        queue.put(7).unwrap();
        assert_eq!(queue.try_get(), Ok(7));
        assert_eq!(queue.try_get(), Err(QueueError::Empty));
        assert_eq!(queue.qsize(), 0);
    }

    #[tokio::test]
    async fn get_timeout_leaves_size_unchanged() {
        let queue: TrackedQueue<u32> = TrackedQueue::new();
        let err = queue.get_timeout(Duration::from_millis(20)).await;
        assert_eq!(err, Err(QueueError::Timeout));
        assert_eq!(queue.qsize(), 0);

        queue.put(1).unwrap();
        let ok = queue.get_timeout(Duration::from_millis(20)).await;
        assert_eq!(ok, Ok(1));
        assert_eq!(queue.qsize(), 0);
    }

    #[tokio::test]
    async fn blocked_get_does_not_decrement_early() {
        let queue: TrackedQueue<u32> = TrackedQueue::new();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        // Consumer is parked; nothing has been decremented.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.qsize(), 0);

        queue.put(42).unwrap();
        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got, 42);
        assert_eq!(queue.qsize(), 0);
    }

    #[tokio::test]
    async fn fifo_across_one_producer_one_consumer() {
        let queue = TrackedQueue::new();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..100u32 {
                    queue.put(i).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut received = Vec::with_capacity(100);
                for _ in 0..100 {
                    received.push(queue.get().await.unwrap());
                }
                received
            })
        };

        producer.await.unwrap();
        let received = consumer.await.unwrap();

        assert_eq!(received, (0..100).collect::<Vec<_>>());
        assert_eq!(queue.qsize(), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn counts_add_up_with_many_producers_and_consumers() {
        let queue = TrackedQueue::new();

        let mut producers = Vec::new();
        for p in 0..4u32 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    queue.put(p * 1000 + i).unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        assert_eq!(queue.qsize(), 200);

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut items = Vec::new();
                for _ in 0..50 {
                    items.push(queue.get().await.unwrap());
                }
                items
            }));
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort_unstable();

        let mut expected: Vec<u32> = (0..4)
            .flat_map(|p| (0..50).map(move |i| p * 1000 + i))
            .collect();
        expected.sort_unstable();

        assert_eq!(all, expected);
        assert_eq!(queue.qsize(), 0);
    }

    #[tokio::test]
    async fn close_drains_then_fails() {
        let queue = TrackedQueue::new();
        queue.put(1).unwrap();
        queue.put(2).unwrap();
        queue.close();

        assert_eq!(queue.put(3), Err(QueueError::Closed));
        assert_eq!(queue.get().await, Ok(1));
        assert_eq!(queue.get().await, Ok(2));
        assert_eq!(queue.get().await, Err(QueueError::Closed));
        assert_eq!(queue.try_get(), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn close_wakes_blocked_consumers() {
        let queue: TrackedQueue<u32> = TrackedQueue::new();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake on close")
            .unwrap();
        assert_eq!(result, Err(QueueError::Closed));
    }
}
