//! # Batch Queue
//!
//! A growable circular buffer in which every element carries the batch number
//! that was current when it was offered.
//!
//! The queue is not synchronized. It is meant to live inside a session's lock
//! next to the rest of the session state that changes together with it.

use std::fmt;
use vesper_core::{Error, Result};

/// Upper bound for the backing arrays.
pub const MAX_CAPACITY: usize = isize::MAX as usize / 2;

/// Circular buffer of `(element, batch)` pairs.
pub struct BatchQueue<T> {
    elements: Vec<Option<T>>,
    batches: Vec<u64>,
    head: usize,
    tail: usize,
    batch: u64,
    max_capacity: usize,
}

impl<T> BatchQueue<T> {
    /// Create a queue with room for `initial_capacity - 1` elements before
    /// its first growth.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `initial_capacity` is zero.
    pub fn new(initial_capacity: usize) -> Result<Self> {
        Self::with_capacity_limit(initial_capacity, MAX_CAPACITY)
    }

    /// Create a queue that refuses to grow beyond `max_capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `initial_capacity` is zero or larger
    /// than `max_capacity`.
    pub fn with_capacity_limit(initial_capacity: usize, max_capacity: usize) -> Result<Self> {
        if initial_capacity == 0 {
            return Err(Error::configuration("batch queue capacity must be greater than 0"));
        }
        if initial_capacity > max_capacity {
            return Err(Error::configuration(format!(
                "batch queue capacity {initial_capacity} exceeds limit {max_capacity}"
            )));
        }
        let mut elements = Vec::with_capacity(initial_capacity);
        elements.resize_with(initial_capacity, || None);
        Ok(Self {
            elements,
            batches: vec![0; initial_capacity],
            head: 0,
            tail: 0,
            batch: 1,
            max_capacity,
        })
    }

    /// Append an element tagged with the current batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if the queue is full and cannot
    /// double its capacity. The element is not stored in that case.
    pub fn offer(&mut self, element: T) -> Result<()> {
        if (self.tail + 1) % self.capacity() == self.head {
            self.grow()?;
        }
        self.elements[self.tail] = Some(element);
        self.batches[self.tail] = self.batch;
        self.tail = (self.tail + 1) % self.capacity();
        Ok(())
    }

    /// Offer every element of `items`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if the queue cannot grow.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) -> Result<()> {
        items.into_iter().try_for_each(|item| self.offer(item))
    }

    /// The batch number new elements are tagged with.
    pub fn batch(&self) -> u64 {
        self.batch
    }

    /// Start a new batch, returning its number. Stored elements keep their
    /// tags.
    pub fn next_batch(&mut self) -> u64 {
        self.batch += 1;
        self.batch
    }

    /// The oldest element.
    pub fn peek(&self) -> Option<&T> {
        self.elements[self.head].as_ref()
    }

    /// Remove and return the oldest element.
    pub fn poll(&mut self) -> Option<T> {
        let element = self.elements[self.head].take()?;
        self.batches[self.head] = 0;
        self.head = (self.head + 1) % self.capacity();
        Some(element)
    }

    /// Remove elements from the head while their batch is `<= batch`.
    pub fn clear_to_batch(&mut self, batch: u64) {
        while !self.is_empty() && self.batches[self.head] <= batch {
            self.poll();
        }
    }

    /// Copy, in order, the elements from the head whose batch is `<= batch`.
    /// Copying stops at the first element of a later batch.
    pub fn export_to_batch<E: Extend<T>>(&self, target: &mut E, batch: u64)
    where
        T: Clone,
    {
        target.extend(
            self.slots().take_while(|&slot| self.batches[slot] <= batch).filter_map(|slot| {
                self.elements[slot].clone()
            }),
        );
    }

    /// Drop every element and reset the batch counter to 1.
    pub fn clear(&mut self) {
        self.elements.iter_mut().for_each(|slot| *slot = None);
        self.batches.iter_mut().for_each(|batch| *batch = 0);
        self.head = 0;
        self.tail = 0;
        self.batch = 1;
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        (self.tail + self.capacity() - self.head) % self.capacity()
    }

    /// Whether the queue holds no elements.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Number of slots in the backing arrays.
    pub fn capacity(&self) -> usize {
        self.elements.len()
    }

    /// Batch tag of the `index`-th element counted from the head.
    pub fn batch_of(&self, index: usize) -> Option<u64> {
        (index < self.len()).then(|| self.batches[(self.head + index) % self.capacity()])
    }

    /// Iterate from oldest to newest without removing anything.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.slots().filter_map(|slot| self.elements[slot].as_ref())
    }

    /// Iterate `(element, batch)` pairs from oldest to newest.
    pub fn iter_batches(&self) -> impl Iterator<Item = (&T, u64)> + '_ {
        self.slots().filter_map(|slot| self.elements[slot].as_ref().map(|e| (e, self.batches[slot])))
    }

    /// Whether an equal element is stored.
    pub fn contains(&self, element: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|stored| stored == element)
    }

    fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        let capacity = self.capacity();
        (0..self.len()).map(move |offset| (self.head + offset) % capacity)
    }

    fn grow(&mut self) -> Result<()> {
        let capacity = self.capacity();
        let new_capacity = capacity
            .checked_mul(2)
            .filter(|&c| c <= self.max_capacity)
            .ok_or(Error::CapacityExceeded { capacity })?;

        let occupied: Vec<usize> = self.slots().collect();
        let size = occupied.len();
        let mut elements: Vec<Option<T>> = Vec::with_capacity(new_capacity);
        let mut batches = Vec::with_capacity(new_capacity);
        for slot in occupied {
            elements.push(self.elements[slot].take());
            batches.push(self.batches[slot]);
        }
        elements.resize_with(new_capacity, || None);
        batches.resize(new_capacity, 0);

        self.elements = elements;
        self.batches = batches;
        self.head = 0;
        self.tail = size;
        tracing::trace!(from = capacity, to = new_capacity, "Batch queue grown");
        Ok(())
    }
}

impl<T> fmt::Debug for BatchQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchQueue")
            .field("batch", &self.batch)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
