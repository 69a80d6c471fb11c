use proptest::prelude::*;
use rask_log_relay::buffer::{BoundedQueue, TryPopError};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread;

proptest! {
    #[test]
    fn occupancy_never_exceeds_capacity_and_order_is_fifo(
        capacity in 1usize..16,
        ops in proptest::collection::vec(any::<bool>(), 0..200),
    ) {
        let queue = BoundedQueue::new(capacity).unwrap();
        let mut model = VecDeque::new();
        let mut next = 0u32;

        for push in ops {
            if push {
                // A push on a full queue would block; the model skips it.
                if model.len() < capacity {
                    queue.push(next).unwrap();
                    model.push_back(next);
                    next += 1;
                }
            } else {
                match queue.try_pop() {
                    Ok(item) => prop_assert_eq!(Some(item), model.pop_front()),
                    Err(e) => {
                        prop_assert_eq!(e, TryPopError::Empty);
                        prop_assert!(model.is_empty());
                    }
                }
            }
            prop_assert!(queue.size() <= capacity);
            prop_assert_eq!(queue.size(), model.len());
        }

        queue.stop();
        while let Some(item) = queue.pop() {
            prop_assert_eq!(Some(item), model.pop_front());
        }
        prop_assert!(model.is_empty());
    }
}

#[test]
fn test_concurrent_producers_deliver_everything_once() {
    let queue = Arc::new(BoundedQueue::new(4).unwrap());
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..250 {
                    queue.push((p, i)).unwrap();
                }
            })
        })
        .collect();

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(item) = queue.pop() {
                assert!(queue.size() <= 4);
                seen.push(item);
            }
            seen
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    queue.stop();
    let seen = consumer.join().unwrap();

    assert_eq!(seen.len(), 1000);
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), 1000);

    // Each producer's own items stay in push order.
    for p in 0..4 {
        let own: Vec<_> = seen.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
        assert_eq!(own, (0..250).collect::<Vec<_>>());
    }
}

#[test]
fn test_pop_keeps_returning_none_after_drain() {
    let queue = BoundedQueue::new(2).unwrap();
    queue.push("a").unwrap();
    queue.stop();

    assert_eq!(queue.pop(), Some("a"));
    for _ in 0..3 {
        assert_eq!(queue.pop(), None);
    }
    assert!(queue.push("b").is_err());
}
