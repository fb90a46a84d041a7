//! Fixed-capacity FIFO ring buffer.
//!
//! `head` points at the oldest element, `tail` at the next free slot; both
//! advance modulo the capacity. The queue never grows: callers decide what
//! to do when [`BoundedQueue::push`] hands the value back.

/// Ring buffer with a capacity fixed at construction.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Append at the tail, returning the value back if the queue is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        self.slots[self.tail] = Some(value);
        self.tail = (self.tail + 1) % self.slots.len();
        self.len += 1;
        Ok(())
    }

    /// Remove the head element.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }

    /// Items currently held.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Fixed number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// `true` when nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` when every slot is taken.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_queue_is_empty() {
        let queue: BoundedQueue<u32> = BoundedQueue::with_capacity(4);
        assert!(queue.is_empty());
        assert!(!queue.is_full());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.capacity(), 4);
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn test_zero_capacity_panics() {
        let _ = BoundedQueue::<u8>::with_capacity(0);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = BoundedQueue::with_capacity(3);
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        queue.push("c").unwrap();

        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), Some("c"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_push_when_full_returns_value() {
        let mut queue = BoundedQueue::with_capacity(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        assert!(queue.is_full());
        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_wraparound_keeps_order() {
        let mut queue = BoundedQueue::with_capacity(3);
        let mut expected = 0;

        // Cycle through the buffer several times so head/tail wrap.
        for round in 0..10 {
            queue.push(round * 2).unwrap();
            queue.push(round * 2 + 1).unwrap();
            assert!(queue.len() <= queue.capacity());

            assert_eq!(queue.pop(), Some(expected));
            expected += 1;
            assert_eq!(queue.pop(), Some(expected));
            expected += 1;
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn test_len_tracks_push_and_pop() {
        let mut queue = BoundedQueue::with_capacity(5);
        for i in 0..5 {
            queue.push(i).unwrap();
            assert_eq!(queue.len(), i + 1);
        }
        for i in (0..5).rev() {
            queue.pop();
            assert_eq!(queue.len(), i);
        }
    }
}
