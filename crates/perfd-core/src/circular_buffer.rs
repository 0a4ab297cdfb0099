//! Fixed-capacity ring buffer with overwrite-on-full semantics.
//!
//! Holds the most recent `capacity` items appended. Logical index 0 is the
//! oldest retained item. There is no internal locking; owners synchronize.

/// Ring buffer that silently evicts its oldest item once full.
#[derive(Debug, Clone)]
pub struct CircularBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    /// Slot the next `add` writes to.
    put_index: usize,
    /// Set once the write cursor has wrapped around.
    full: bool,
}

impl<T> CircularBuffer<T> {
    /// Creates an empty buffer.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "circular buffer capacity must be positive");
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            put_index: 0,
            full: false,
        }
    }

    /// Appends an item, returning the evicted oldest item when full.
    pub fn add(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() < self.capacity {
            self.items.push(item);
            None
        } else {
            Some(std::mem::replace(&mut self.items[self.put_index], item))
        };

        self.put_index = (self.put_index + 1) % self.capacity;
        if self.put_index == 0 {
            self.full = true;
        }
        evicted
    }

    /// Returns the item at logical `index` (0 = oldest retained).
    ///
    /// # Panics
    /// Panics if `index >= size()`.
    pub fn get(&self, index: usize) -> &T {
        let slot = self.slot(index);
        &self.items[slot]
    }

    /// Mutable variant of [`get`](Self::get).
    ///
    /// # Panics
    /// Panics if `index >= size()`.
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        let slot = self.slot(index);
        &mut self.items[slot]
    }

    /// Non-panicking variant of [`get`](Self::get).
    pub fn try_get(&self, index: usize) -> Option<&T> {
        if index < self.size() {
            Some(self.get(index))
        } else {
            None
        }
    }

    /// Number of retained items, never more than `capacity`.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Iterates from the oldest retained item to the newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let start = self.start();
        let (head, tail) = self.items.split_at(start);
        tail.iter().chain(head.iter())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.put_index = 0;
        self.full = false;
    }

    /// Physical position of the oldest retained item.
    fn start(&self) -> usize {
        if self.full { self.put_index } else { 0 }
    }

    fn slot(&self, index: usize) -> usize {
        assert!(
            index < self.size(),
            "circular buffer index {} out of range (size {})",
            index,
            self.size()
        );
        (self.start() + index) % self.capacity
    }
}
