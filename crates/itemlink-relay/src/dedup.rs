//! Duplicate detection for inbound reports.
//!
//! A bounded, insertion-ordered cache of recently seen message ids. When the
//! cache is full the oldest resident id is evicted first, so an id is only
//! recognised as a duplicate while it is still resident.

use std::collections::{HashSet, VecDeque};

/// Outcome of [`DuplicateDetector::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First sighting (or first since eviction); the id is now resident.
    New,
    /// The id is already resident; nothing changed.
    Duplicate,
}

/// Bounded FIFO-eviction cache of message ids.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    capacity: usize,
    /// Residents in insertion order, oldest at the front
    order: VecDeque<String>,
    resident: HashSet<String>,
}

impl DuplicateDetector {
    /// Create a detector holding at most `capacity` ids.
    ///
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            resident: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id` and report whether it was already resident.
    pub fn observe(&mut self, id: &str) -> Verdict {
        if self.resident.contains(id) {
            return Verdict::Duplicate;
        }

        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.resident.remove(&oldest);
                }
                None => break,
            }
        }

        self.order.push_back(id.to_string());
        self.resident.insert(id.to_string());
        Verdict::New
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resident.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every resident id.
    pub fn clear(&mut self) {
        self.order.clear();
        self.resident.clear();
    }
}
