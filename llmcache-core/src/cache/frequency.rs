//! O(1) LFU frequency index
//!
//! Nodes live in a slab (`Vec<Node>` plus a free list) and link to each
//! other by slot index. Each frequency owns an intrusive doubly-linked
//! bucket in insertion order, so the front of the `min_freq` bucket is the
//! least frequently used key, ties broken by earliest touch.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[derive(Debug)]
struct Node {
    key: String,
    frequency: u64,
    touched_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// Snapshot of a tracked key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedKey {
    pub frequency: u64,
    pub touched_at: Instant,
}

/// Bounded frequency index over cache keys
#[derive(Debug)]
pub struct FrequencyIndex {
    capacity: usize,
    slots: Vec<Node>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    buckets: HashMap<u64, Bucket>,
    min_freq: u64,
}

impl FrequencyIndex {
    /// `capacity` is clamped to at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            buckets: HashMap::new(),
            min_freq: 0,
        }
    }

    /// Record one access to `key`.
    ///
    /// A tracked key moves up one frequency. An untracked key is inserted at
    /// frequency 1, first evicting the LFU key if the index is full; the
    /// evicted key is returned.
    pub fn touch(&mut self, key: &str) -> Option<String> {
        if let Some(&slot) = self.index.get(key) {
            self.increment(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.evict()
        } else {
            None
        };
        self.insert(key);
        evicted
    }

    /// Remove and return the least frequently used key
    pub fn evict(&mut self) -> Option<String> {
        if self.index.is_empty() {
            return None;
        }
        if !self.buckets.contains_key(&self.min_freq) {
            self.recompute_min_freq();
        }

        let slot = self.buckets.get(&self.min_freq)?.head?;
        let key = self.release(slot);
        self.index.remove(&key);
        Some(key)
    }

    /// Stop tracking `key`. Returns whether it was tracked.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(slot) = self.index.remove(key) else {
            return false;
        };
        let frequency = self.slots[slot].frequency;
        self.release(slot);
        if frequency == self.min_freq && !self.buckets.contains_key(&frequency) {
            self.recompute_min_freq();
        }
        true
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.buckets.clear();
        self.min_freq = 0;
    }

    pub fn get(&self, key: &str) -> Option<TrackedKey> {
        self.index.get(key).map(|&slot| {
            let node = &self.slots[slot];
            TrackedKey {
                frequency: node.frequency,
                touched_at: node.touched_at,
            }
        })
    }

    pub fn frequency(&self, key: &str) -> Option<u64> {
        self.get(key).map(|tracked| tracked.frequency)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current minimum frequency (0 when empty)
    pub fn min_frequency(&self) -> u64 {
        if self.index.is_empty() {
            0
        } else {
            self.min_freq
        }
    }

    /// Frequency → number of tracked keys at that frequency
    pub fn distribution(&self) -> BTreeMap<u64, usize> {
        self.buckets
            .iter()
            .map(|(&frequency, bucket)| (frequency, bucket.len))
            .collect()
    }

    /// Tracked keys in eviction order (next victim first)
    pub fn keys_by_eviction_order(&self) -> Vec<String> {
        let mut frequencies: Vec<u64> = self.buckets.keys().copied().collect();
        frequencies.sort_unstable();

        let mut keys = Vec::with_capacity(self.index.len());
        for frequency in frequencies {
            let mut cursor = self.buckets[&frequency].head;
            while let Some(slot) = cursor {
                keys.push(self.slots[slot].key.clone());
                cursor = self.slots[slot].next;
            }
        }
        keys
    }

    fn insert(&mut self, key: &str) {
        let node = Node {
            key: key.to_string(),
            frequency: 1,
            touched_at: Instant::now(),
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = node;
                slot
            }
            None => {
                self.slots.push(node);
                self.slots.len() - 1
            }
        };
        self.index.insert(key.to_string(), slot);
        self.link_back(slot);
        self.min_freq = 1;
    }

    fn increment(&mut self, slot: usize) {
        let old = self.slots[slot].frequency;
        self.unlink(slot);
        if old == self.min_freq && !self.buckets.contains_key(&old) {
            self.min_freq = old + 1;
        }

        let node = &mut self.slots[slot];
        node.frequency = old + 1;
        node.touched_at = Instant::now();
        self.link_back(slot);
    }

    /// Unlink a slot and return it to the free list, yielding its key
    fn release(&mut self, slot: usize) -> String {
        self.unlink(slot);
        self.free.push(slot);
        std::mem::take(&mut self.slots[slot].key)
    }

    /// Append `slot` to the bucket of its current frequency
    fn link_back(&mut self, slot: usize) {
        let frequency = self.slots[slot].frequency;
        let bucket = self.buckets.entry(frequency).or_default();
        let old_tail = bucket.tail;

        bucket.tail = Some(slot);
        if bucket.head.is_none() {
            bucket.head = Some(slot);
        }
        bucket.len += 1;

        if let Some(tail) = old_tail {
            self.slots[tail].next = Some(slot);
        }
        let node = &mut self.slots[slot];
        node.prev = old_tail;
        node.next = None;
    }

    /// Detach `slot` from its bucket; empty buckets are dropped
    fn unlink(&mut self, slot: usize) {
        let (frequency, prev, next) = {
            let node = &self.slots[slot];
            (node.frequency, node.prev, node.next)
        };

        if let Some(prev) = prev {
            self.slots[prev].next = next;
        }
        if let Some(next) = next {
            self.slots[next].prev = prev;
        }

        let now_empty = match self.buckets.get_mut(&frequency) {
            Some(bucket) => {
                if bucket.head == Some(slot) {
                    bucket.head = next;
                }
                if bucket.tail == Some(slot) {
                    bucket.tail = prev;
                }
                bucket.len -= 1;
                bucket.len == 0
            }
            None => false,
        };
        if now_empty {
            self.buckets.remove(&frequency);
        }

        let node = &mut self.slots[slot];
        node.prev = None;
        node.next = None;
    }

    fn recompute_min_freq(&mut self) {
        self.min_freq = self.buckets.keys().copied().min().unwrap_or(0);
    }
}
