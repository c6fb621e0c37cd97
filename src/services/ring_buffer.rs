//! Fixed-capacity circular buffer with FIFO overwrite
//!
//! Backs each chart tier. Once full, every `add` evicts the oldest entry;
//! `get_all` always returns oldest-to-newest regardless of wraparound.

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    /// Next write position once the buffer is full
    head: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { data: Vec::with_capacity(capacity), capacity, head: 0 }
    }

    pub fn add(&mut self, item: T) {
        if self.data.len() < self.capacity {
            self.data.push(item);
        } else {
            self.data[self.head] = item;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    /// Contents in chronological order
    pub fn get_all(&self) -> Vec<T> {
        if self.data.len() < self.capacity {
            return self.data.clone();
        }

        // Full: oldest entry sits at head
        let mut result = Vec::with_capacity(self.capacity);
        result.extend_from_slice(&self.data[self.head..]);
        result.extend_from_slice(&self.data[..self.head]);
        result
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let buf: RingBuffer<u32> = RingBuffer::new(4);
        assert!(buf.is_empty());
        assert!(buf.get_all().is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_partial_fill_keeps_order() {
        let mut buf = RingBuffer::new(5);
        for i in 1..=3 {
            buf.add(i);
        }
        assert_eq!(buf.get_all(), vec![1, 2, 3]);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.capacity(), 5);
    }

    #[test]
    fn test_exactly_full() {
        let mut buf = RingBuffer::new(3);
        for i in 1..=3 {
            buf.add(i);
        }
        assert_eq!(buf.get_all(), vec![1, 2, 3]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_overwrite_keeps_most_recent_in_order() {
        let capacity = 4;
        let mut buf = RingBuffer::new(capacity);
        for i in 0..(capacity + 6) {
            buf.add(i);
        }
        assert_eq!(buf.get_all(), vec![6, 7, 8, 9]);
        assert_eq!(buf.len(), capacity);
    }

    #[test]
    fn test_many_wraps() {
        let mut buf = RingBuffer::new(300);
        for i in 0..1_234u32 {
            buf.add(i);
        }
        let all = buf.get_all();
        assert_eq!(all.len(), 300);
        assert_eq!(all.first(), Some(&934));
        assert_eq!(all.last(), Some(&1233));
        assert!(all.windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut buf = RingBuffer::new(0);
        buf.add('a');
        buf.add('b');
        assert_eq!(buf.capacity(), 1);
        assert_eq!(buf.get_all(), vec!['b']);
    }
}
