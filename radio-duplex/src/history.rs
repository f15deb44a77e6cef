use ringbuf::ring_buffer::RbBase;
use ringbuf::{HeapRb, Rb};

use crate::message::MessageKey;

/// Bounded record of recently accepted message identities.
///
/// Only used to recognize duplicates: once full, the oldest identity is evicted before the
/// new one is appended.
pub struct MessageHistory {
    entries: HeapRb<MessageKey>,
    capacity: usize,
}

impl MessageHistory {
    /// # Panics
    /// If `capacity` is zero. [RadioConfig](crate::config::RadioConfig) rejects that value.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HeapRb::new(capacity),
            capacity,
        }
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.entries.iter().any(|k| k == key)
    }

    pub fn record(&mut self, key: MessageKey) {
        let _ = self.entries.push_overwrite(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Recorded identities, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &MessageKey> {
        self.entries.iter()
    }
}
