/// Fixed-capacity FIFO queue. The capacity is a power of two so that positions can be mapped to
///  slots with a bit mask.
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    mask: usize,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> RingBuffer<T> {
        assert!(capacity.is_power_of_two(), "ring buffer capacity must be a power of two, was {}", capacity);

        RingBuffer {
            slots: (0..capacity).map(|_| None).collect(),
            mask: capacity - 1,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn fill_ratio(&self) -> f32 {
        (self.len as f32 / self.capacity() as f32).clamp(0.0, 1.0)
    }

    /// adds an item at the end, handing it back if the buffer is full
    pub fn push_back(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }

        let idx = (self.head + self.len) & self.mask;
        self.slots[idx] = Some(item);
        self.len += 1;
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let item = self.slots[self.head].take();
        self.head = (self.head + 1) & self.mask;
        self.len -= 1;
        item
    }

    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_ref()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    #[should_panic]
    fn test_new_requires_power_of_two() {
        RingBuffer::<u32>::new(6);
    }

    #[rstest]
    #[case::one(1)]
    #[case::four(4)]
    #[case::window(256)]
    fn test_fill_and_drain(#[case] capacity: usize) {
        let mut buf = RingBuffer::new(capacity);
        assert!(buf.is_empty());

        for i in 0..capacity {
            buf.push_back(i).unwrap();
        }
        assert!(buf.is_full());
        assert_eq!(buf.fill_ratio(), 1.0);
        assert_eq!(buf.push_back(999), Err(999));

        for i in 0..capacity {
            assert_eq!(buf.front(), Some(&i));
            assert_eq!(buf.pop_front(), Some(i));
        }
        assert!(buf.is_empty());
        assert_eq!(buf.pop_front(), None);
        assert_eq!(buf.front(), None);
    }

    #[test]
    fn test_wrap_around() {
        let mut buf = RingBuffer::new(4);
        for round in 0..10 {
            buf.push_back(round * 2).unwrap();
            buf.push_back(round * 2 + 1).unwrap();
            assert_eq!(buf.len(), 2);
            assert_eq!(buf.front(), Some(&(round * 2)));
            assert_eq!(buf.pop_front(), Some(round * 2));
            assert_eq!(buf.pop_front(), Some(round * 2 + 1));
        }
    }

    #[test]
    fn test_fill_ratio() {
        let mut buf = RingBuffer::new(8);
        assert_eq!(buf.fill_ratio(), 0.0);
        buf.push_back(()).unwrap();
        buf.push_back(()).unwrap();
        assert_eq!(buf.fill_ratio(), 0.25);
    }
}
