// Bounded SPSC ring - thin ownership-split wrapper over rtrb
//
// One producer thread owns the `RingSender`, one consumer thread owns the
// `RingReceiver`. rtrb guards the circular storage with two atomic cursors
// (acquire/release), so an item is visible to the consumer only after the
// producer's write has been committed.
//
// Overflow policy: a push into a full ring hands the item back to the caller
// and leaves the ring untouched. The caller counts the drop.

use std::fmt;

use rtrb::{Consumer, Producer, RingBuffer};

/// Create a bounded SPSC ring holding at most `capacity` items
///
/// # Panics
/// Panics if capacity is 0
pub fn ring_channel<T>(capacity: usize) -> (RingSender<T>, RingReceiver<T>) {
    assert!(capacity > 0, "capacity must be greater than 0");
    let (producer, consumer) = RingBuffer::new(capacity);
    (RingSender { producer }, RingReceiver { consumer })
}

/// Producer half. `Send` but not `Sync`: exactly one thread pushes.
pub struct RingSender<T> {
    producer: Producer<T>,
}

impl<T> RingSender<T> {
    /// Non-blocking, allocation-free push
    ///
    /// Returns `false` (dropping `item`) when the ring is full.
    #[inline]
    pub fn push(&mut self, item: T) -> bool {
        self.producer.push(item).is_ok()
    }

    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }

    /// Free slots as seen by the producer
    pub fn free_slots(&self) -> usize {
        self.producer.slots()
    }

    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }

    /// True once the receiver has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }
}

impl<T> fmt::Debug for RingSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingSender")
            .field("capacity", &self.capacity())
            .field("free_slots", &self.free_slots())
            .finish()
    }
}

/// Consumer half. `Send` but not `Sync`: exactly one thread pops.
pub struct RingReceiver<T> {
    consumer: Consumer<T>,
}

impl<T> RingReceiver<T> {
    /// Non-blocking pop, `None` when empty
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.consumer.pop().ok()
    }

    /// Items currently resident
    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.buffer().capacity()
    }

    /// Occupancy in percent of capacity
    pub fn occupancy_percent(&self) -> f32 {
        (self.len() as f32 / self.capacity() as f32 * 100.0).clamp(0.0, 100.0)
    }

    /// Pop up to `max` items into `out`, returning how many were moved
    pub fn drain_into(&mut self, out: &mut Vec<T>, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            match self.consumer.pop() {
                Ok(item) => {
                    out.push(item);
                    moved += 1;
                }
                Err(_) => break,
            }
        }
        moved
    }

    /// True once the sender has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.consumer.is_abandoned()
    }
}

impl<T> fmt::Debug for RingReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingReceiver")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = ring_channel(8);
        for i in 0..5 {
            assert!(tx.push(i));
        }
        for i in 0..5 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        for capacity in 1..16 {
            let (mut tx, rx) = ring_channel(capacity);
            let mut accepted = 0;
            for i in 0..capacity * 3 {
                if tx.push(i) {
                    accepted += 1;
                }
                assert!(rx.len() <= capacity);
            }
            assert_eq!(accepted, capacity);
            assert_eq!(rx.len(), capacity);
            assert!(tx.is_full());
        }
    }

    #[test]
    fn test_push_to_full_leaves_contents_unchanged() {
        let (mut tx, mut rx) = ring_channel(3);
        assert!(tx.push(10));
        assert!(tx.push(20));
        assert!(tx.push(30));
        assert!(!tx.push(40), "push into a full ring must fail");
        assert!(!tx.push(50));

        assert_eq!(rx.len(), 3);
        assert_eq!(rx.pop(), Some(10));
        assert_eq!(rx.pop(), Some(20));
        assert_eq!(rx.pop(), Some(30));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn test_drain_into_respects_max() {
        let (mut tx, mut rx) = ring_channel(16);
        for i in 0..10 {
            tx.push(i);
        }
        let mut out = Vec::new();
        assert_eq!(rx.drain_into(&mut out, 4), 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(rx.drain_into(&mut out, 100), 6);
        assert_eq!(out.len(), 10);
        assert_eq!(rx.occupancy_percent(), 0.0);
    }

    #[test]
    fn test_cross_thread_order_preserved() {
        const COUNT: u64 = 100_000;
        let (mut tx, mut rx) = ring_channel::<u64>(64);

        let producer = thread::spawn(move || {
            let mut next = 0;
            while next < COUNT {
                if tx.push(next) {
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            match rx.pop() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert!(rx.is_empty());
        assert!(rx.is_abandoned());
    }

    #[test]
    fn test_debug_shows_occupancy() {
        let (mut tx, rx) = ring_channel::<u8>(4);
        tx.push(1);
        let printed = format!("{rx:?}");
        assert!(printed.contains("capacity: 4"), "{printed}");
        assert!(printed.contains("len: 1"), "{printed}");
        assert!(format!("{tx:?}").contains("free_slots: 3"));
    }

    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RingSender<f64>>();
        assert_send::<RingReceiver<f64>>();
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _ = ring_channel::<f64>(0);
    }
}
