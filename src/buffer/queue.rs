use super::error::{BufferError, PushError, TryPopError};
use super::metrics::QueueMetrics;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub const DEFAULT_CAPACITY: usize = 1024;

/// Fixed-capacity FIFO with blocking `push`/`pop` and a stop/drain state.
///
/// Slot accounting and the data FIFO live behind two independent locks so
/// producers waiting for space never contend with the consumer on the data
/// lock. No method holds both locks at once.
///
/// After [`stop`](Self::stop) every further `push` is rejected, while items
/// already committed keep being delivered by `pop` until the queue is empty.
pub struct BoundedQueue<T> {
    capacity: usize,

    // Slot accounting
    free: Mutex<usize>,
    not_full: Condvar,

    // Data FIFO
    data: Mutex<VecDeque<T>>,
    not_empty: Condvar,

    stopped: AtomicBool,
    // Slots reserved by a producer whose item is not yet in `data`.
    in_flight: AtomicUsize,

    pushed: AtomicU64,
    popped: AtomicU64,
    rejected: AtomicU64,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::InvalidCapacity { capacity });
        }

        Ok(Self {
            capacity,
            free: Mutex::new(capacity),
            not_full: Condvar::new(),
            data: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            stopped: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a slot is free, then appends `item` at the tail.
    ///
    /// Returns the item inside [`PushError::Stopped`] if the queue is stopped
    /// before or while waiting.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        {
            let mut free = self.free.lock();
            while *free == 0 && !self.is_stopped() {
                self.not_full.wait(&mut free);
            }
            if self.is_stopped() {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(PushError::Stopped(item));
            }
            *free -= 1;
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }

        {
            let mut data = self.data.lock();
            data.push_back(item);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available and returns the oldest one.
    ///
    /// Returns `None` only once the queue is stopped and fully drained.
    pub fn pop(&self) -> Option<T> {
        let item = {
            let mut data = self.data.lock();
            loop {
                if let Some(item) = data.pop_front() {
                    break item;
                }
                if self.is_drained() {
                    return None;
                }
                self.not_empty.wait(&mut data);
            }
        };

        self.release_slot();
        Some(item)
    }

    /// Non-blocking variant of [`pop`](Self::pop).
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let item = {
            let mut data = self.data.lock();
            match data.pop_front() {
                Some(item) => item,
                None if self.is_drained() => return Err(TryPopError::Stopped),
                None => return Err(TryPopError::Empty),
            }
        };

        self.release_slot();
        Ok(item)
    }

    /// Stops the queue and wakes every blocked producer and consumer.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        {
            // Flip the flag under the slot lock so a producer cannot pass the
            // stop check and reserve a slot the consumer doesn't know about.
            let _free = self.free.lock();
            self.stopped.store(true, Ordering::SeqCst);
        }
        self.not_full.notify_all();

        {
            let _data = self.data.lock();
        }
        self.not_empty.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Racy snapshot of queued items, for diagnostics only.
    pub fn size(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            capacity: self.capacity,
            len: self.size(),
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stopped: self.is_stopped(),
        }
    }

    // Caller holds the data lock and has seen it empty.
    fn is_drained(&self) -> bool {
        self.is_stopped() && self.in_flight.load(Ordering::SeqCst) == 0
    }

    fn release_slot(&self) {
        {
            let mut free = self.free.lock();
            *free += 1;
        }
        self.popped.fetch_add(1, Ordering::Relaxed);
        self.not_full.notify_one();
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.size())
            .field("stopped", &self.is_stopped())
            .field("pushed", &self.pushed.load(Ordering::Relaxed))
            .field("popped", &self.popped.load(Ordering::Relaxed))
            .field("rejected", &self.rejected.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_is_rejected() {
        let result = BoundedQueue::<u32>::new(0);
        assert_eq!(
            result.unwrap_err(),
            BufferError::InvalidCapacity { capacity: 0 }
        );
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(8).unwrap();
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        let drained: Vec<_> = (0..5).map(|_| queue.pop().unwrap()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_full_queue_blocks_until_pop() {
        let queue = Arc::new(BoundedQueue::new(2).unwrap());
        queue.push("a").unwrap();
        queue.push("b").unwrap();

        let (tx, rx) = mpsc::channel();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.push("c").unwrap();
                tx.send(()).unwrap();
            })
        };

        // Third push must still be parked.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(queue.size(), 2);

        assert_eq!(queue.pop(), Some("a"));
        rx.recv_timeout(Duration::from_secs(5))
            .expect("pop should unblock the waiting producer");
        producer.join().unwrap();

        queue.stop();
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), Some("c"));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_push_after_stop_returns_item() {
        let queue = BoundedQueue::new(4).unwrap();
        queue.stop();

        let err = queue.push(7).unwrap_err();
        assert_eq!(err.into_inner(), 7);
        assert_eq!(queue.metrics().rejected, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stop_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1).unwrap());
        queue.push(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(50));
        queue.stop();

        let result = producer.join().unwrap();
        assert_eq!(result, Err(PushError::Stopped(2)));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_stop_wakes_blocked_consumer() {
        let queue = Arc::new(BoundedQueue::<u8>::new(1).unwrap());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.stop();

        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_try_pop_distinguishes_empty_from_stopped() {
        let queue = BoundedQueue::new(2).unwrap();
        assert_eq!(queue.try_pop(), Err(TryPopError::Empty));

        queue.push(1).unwrap();
        queue.stop();
        assert_eq!(queue.try_pop(), Ok(1));
        assert_eq!(queue.try_pop(), Err(TryPopError::Stopped));
    }

    #[test]
    fn test_metrics_track_traffic() {
        let queue = BoundedQueue::new(4).unwrap();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.pop();

        let metrics = queue.metrics();
        assert_eq!(metrics.capacity, 4);
        assert_eq!(metrics.len, 1);
        assert_eq!(metrics.pushed, 2);
        assert_eq!(metrics.popped, 1);
        assert!(!metrics.stopped);
        assert!((metrics.fill_ratio() - 0.25).abs() < f64::EPSILON);
    }
}
