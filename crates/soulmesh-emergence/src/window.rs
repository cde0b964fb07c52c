//! Fixed-capacity event windows.
//!
//! Every window is a [`RingBuffer`] allocated once at its full capacity, so
//! memory stays bounded no matter how many events arrive. Per-node windows
//! live in a [`WindowArena`] of reusable slots; once the arena holds
//! `max_nodes` slots, the least recently seen node is evicted to make room.

use soulmesh_core::{EventKind, NodeId};
use std::collections::HashMap;
use tracing::debug;

/// Ring of at most `capacity` items. Pushing into a full ring overwrites
/// the oldest item.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RingBuffer {
            slots: (0..capacity).map(|_| None).collect(),
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

    /// Append an item, returning the one it displaced when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();
        let tail = (self.head + self.len) % capacity;
        let evicted = self.slots[tail].replace(item);
        if self.len == capacity {
            self.head = (self.head + 1) % capacity;
        } else {
            self.len += 1;
        }
        evicted
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }

    pub fn front(&self) -> Option<&T> {
        self.iter().next()
    }

    pub fn back(&self) -> Option<&T> {
        self.iter().last()
    }

    /// Items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

impl<T> RingBuffer<T> {
    /// Keep only items matching `keep`, preserving arrival order.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let mut kept = Vec::with_capacity(self.len);
        while let Some(item) = self.pop_front() {
            if keep(&item) {
                kept.push(item);
            }
        }
        self.head = 0;
        for item in kept {
            self.push(item);
        }
    }
}

impl RingBuffer<u64> {
    /// Drop every timestamp older than `cutoff`, wherever it sits in the ring.
    pub fn prune_before(&mut self, cutoff: u64) -> usize {
        let before = self.len;
        self.retain(|&ts| ts >= cutoff);
        before - self.len
    }

    /// Largest timestamp held, regardless of arrival order.
    pub fn newest(&self) -> Option<u64> {
        self.iter().copied().max()
    }

    /// Timestamps in `[from, to]`.
    pub fn count_between(&self, from: u64, to: u64) -> usize {
        self.iter().filter(|&&ts| ts >= from && ts <= to).count()
    }
}

/// Detection state for one node.
#[derive(Clone, Debug)]
pub struct NodeWindow {
    /// Timestamps of recent conflicts reported by the node.
    pub conflicts: RingBuffer<u64>,
    /// Depths of the current run of rollbacks, strictly increasing.
    pub rollback_chain: RingBuffer<u32>,
    last_seen: u64,
}

impl NodeWindow {
    fn new(capacity: usize) -> Self {
        NodeWindow {
            conflicts: RingBuffer::new(capacity),
            rollback_chain: RingBuffer::new(capacity),
            last_seen: 0,
        }
    }

    fn reset(&mut self) {
        self.conflicts.clear();
        self.rollback_chain.clear();
    }
}

/// Arena of per-node windows plus mesh-wide rings keyed by event kind.
#[derive(Debug)]
pub struct WindowArena {
    slots: Vec<NodeWindow>,
    owners: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    by_kind: HashMap<EventKind, RingBuffer<u64>>,
    capacity: usize,
    max_nodes: usize,
    tick: u64,
    evictions: u64,
}

impl WindowArena {
    pub fn new(capacity: usize, max_nodes: usize) -> Self {
        WindowArena {
            slots: Vec::new(),
            owners: Vec::new(),
            index: HashMap::new(),
            by_kind: HashMap::new(),
            capacity: capacity.max(1),
            max_nodes: max_nodes.max(1),
            tick: 0,
            evictions: 0,
        }
    }

    /// Window for `node`, claiming or recycling a slot if needed.
    pub fn slot_mut(&mut self, node: &str) -> &mut NodeWindow {
        self.tick += 1;
        let tick = self.tick;

        let existing = self.index.get(node).copied();
        let at = match existing {
            Some(at) => at,
            None if self.slots.len() < self.max_nodes => {
                self.slots.push(NodeWindow::new(self.capacity));
                self.owners.push(node.to_string());
                let at = self.slots.len() - 1;
                self.index.insert(node.to_string(), at);
                at
            }
            None => {
                let at = self
                    .slots
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, w)| w.last_seen)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                let previous = std::mem::replace(&mut self.owners[at], node.to_string());
                debug!(evicted = %previous, node, "recycling window slot");
                self.index.remove(&previous);
                self.index.insert(node.to_string(), at);
                self.slots[at].reset();
                self.evictions += 1;
                at
            }
        };

        let window = &mut self.slots[at];
        window.last_seen = tick;
        window
    }

    pub fn get(&self, node: &str) -> Option<&NodeWindow> {
        self.index.get(node).map(|&at| &self.slots[at])
    }

    /// Record a mesh-wide event of `kind` at `timestamp`.
    pub fn record_kind(&mut self, kind: EventKind, timestamp: u64) {
        let capacity = self.capacity;
        self.by_kind
            .entry(kind)
            .or_insert_with(|| RingBuffer::new(capacity))
            .push(timestamp);
    }

    /// Mesh-wide events of `kind` in `[from, to]`.
    pub fn kind_count(&self, kind: EventKind, from: u64, to: u64) -> usize {
        self.by_kind
            .get(&kind)
            .map(|ring| ring.count_between(from, to))
            .unwrap_or(0)
    }

    pub fn tracked_nodes(&self) -> usize {
        self.slots.len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
