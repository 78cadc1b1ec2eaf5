// aerie_core/src/buffer.rs

//! Fixed-capacity, time-indexed ring buffer used to hold measurements until
//! the fusion horizon catches up with them.

use crate::error::BufferError;
use crate::types::{Finite, Sample, TimeUs};

/// Default acceptance bracket for [`DelayedBuffer::pop_first_older_than`].
pub const DEFAULT_ACCEPT_WINDOW_US: u64 = 100_000;

/// A circular store of timestamped samples consumed at a delayed horizon.
///
/// The capacity is fixed when the buffer is allocated. A consumed slot is
/// tombstoned (`None`) so the same sample can never be returned twice.
#[derive(Debug, Clone)]
pub struct DelayedBuffer<T> {
    slots: Box<[Option<Sample<T>>]>,
    head: usize,
    tail: usize,
    /// Suppresses the advance-then-evict step for exactly one push.
    first_write: bool,
    accept_window_us: u64,
    /// Timestamp of the most recently pushed sample, kept across pops.
    newest_time_us: Option<TimeUs>,
}

impl<T> DelayedBuffer<T> {
    /// Allocates a new buffer holding `capacity` samples.
    pub fn allocate(capacity: usize, accept_window_us: u64) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| BufferError::AllocationFailed { capacity })?;
        slots.resize_with(capacity, || None);

        Ok(Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            tail: 0,
            first_write: true,
            accept_window_us,
            newest_time_us: None,
        })
    }

    /// Returns a buffer with the requested capacity.
    ///
    /// Asking for the current capacity hands back `self` untouched; any other
    /// capacity produces a fresh, empty container.
    pub fn reallocate(self, capacity: usize) -> Result<Self, BufferError> {
        if capacity == self.capacity() {
            return Ok(self);
        }
        Self::allocate(capacity, self.accept_window_us)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn accept_window_us(&self) -> u64 {
        self.accept_window_us
    }

    pub fn set_accept_window_us(&mut self, accept_window_us: u64) {
        self.accept_window_us = accept_window_us;
    }

    pub fn get_newest(&self) -> Option<&Sample<T>> {
        self.slots[self.head].as_ref()
    }

    pub fn get_oldest(&self) -> Option<&Sample<T>> {
        self.slots[self.tail].as_ref()
    }

    /// Timestamp of the last sample pushed, even if it has since been consumed.
    pub fn newest_time_us(&self) -> Option<TimeUs> {
        self.newest_time_us
    }

    /// Scans from the newest entry towards the oldest and removes the first
    /// sample `s` with `s.time_us <= query_time_us < s.time_us + accept_window`.
    ///
    /// On a match the tail moves past the returned slot, so anything older is
    /// discarded as well. Reaching the tail without a match returns `None`,
    /// which is the normal outcome whenever nothing is due yet.
    pub fn pop_first_older_than(&mut self, query_time_us: TimeUs) -> Option<Sample<T>> {
        let capacity = self.capacity();

        for i in 0..capacity {
            let index = (self.head + capacity - i) % capacity;

            let matches = self.slots[index].as_ref().is_some_and(|s| {
                query_time_us >= s.time_us
                    && query_time_us < s.time_us.saturating_add(self.accept_window_us)
            });

            if matches {
                let sample = self.slots[index].take();

                if index == self.head {
                    self.tail = self.head;
                    self.first_write = true;
                } else {
                    self.tail = (index + 1) % capacity;
                }

                return sample;
            }

            if index == self.tail {
                return None;
            }
        }

        None
    }

    /// Number of slots holding an unconsumed sample. O(capacity).
    pub fn entries(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Clears every slot and restores the first-write state.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.first_write = true;
        self.newest_time_us = None;
    }
}

impl<T: Finite> DelayedBuffer<T> {
    /// Stores a sample, evicting the oldest one when the buffer is full.
    ///
    /// Samples carrying NaN or infinite values are refused.
    pub fn push(&mut self, sample: Sample<T>) -> Result<(), BufferError> {
        if !sample.is_finite() {
            return Err(BufferError::NonFinite {
                time_us: sample.time_us,
            });
        }

        let capacity = self.capacity();
        let head_new = if self.first_write {
            self.head
        } else {
            (self.head + 1) % capacity
        };

        self.newest_time_us = Some(sample.time_us);
        self.slots[head_new] = Some(sample);
        self.head = head_new;

        // move the tail if we just overwrote it
        if self.head == self.tail && !self.first_write {
            self.tail = (self.tail + 1) % capacity;
        } else {
            self.first_write = false;
        }

        Ok(())
    }
}
