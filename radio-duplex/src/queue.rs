//! Thread-safe priority queue used for both the inbox and the pending sends.
//!
//! Lower priority values come out first. Equal priorities come out in insertion order: the
//! queued items themselves are never compared, so arbitrary payloads can be queued.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Entry<T> {
    priority: i32,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> Ord for Entry<T> {
    // BinaryHeap is a max-heap: the smallest (priority, seq) must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

pub struct PriorityQueue<T> {
    inner: Mutex<Inner<T>>,
    /// Signaled on push.
    available: Condvar,
    /// Signaled when a pop leaves the queue empty.
    drained: Condvar,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            available: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, priority: i32, item: T) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Entry {
            priority,
            seq,
            item,
        });
        drop(inner);
        self.available.notify_one();
    }

    fn pop_locked(&self, inner: &mut Inner<T>) -> Option<T> {
        let entry = inner.heap.pop()?;
        if inner.heap.is_empty() {
            self.drained.notify_all();
        }
        Some(entry.item)
    }

    /// Pops the most urgent item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.lock();
        self.pop_locked(&mut inner)
    }

    /// Pops the most urgent item, waiting up to `timeout` for one to be pushed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(item) = self.pop_locked(&mut inner) {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Waits up to `timeout` for the queue to be empty. Returns whether it is.
    pub fn wait_empty(&self, timeout: Duration) -> bool {
        let (inner, _) = self
            .drained
            .wait_timeout_while(self.lock(), timeout, |inner| !inner.heap.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        inner.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}
