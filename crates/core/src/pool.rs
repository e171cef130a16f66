//! Node pool: slot arena with generation-checked handles
//!
//! Slots are reused through a free list. Each slot remembers a generation
//! number that is bumped whenever its node is freed, so handles to a dead
//! node never resolve to whatever is allocated in that slot later.

use crate::node::{Node, NodeId};

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Counters kept by the pool itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    /// Nodes currently allocated.
    pub live: usize,
    /// Highest `live` ever observed.
    pub peak: usize,
    /// Lifetime allocations.
    pub allocations: u64,
    /// Lifetime frees.
    pub frees: u64,
}

#[derive(Debug, Default)]
pub struct Pool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    counters: PoolCounters,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Pool {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            counters: PoolCounters::default(),
        }
    }

    /// Store a node and hand back its handle.
    ///
    /// # Panics
    /// Panics when the slot index space is exhausted.
    pub fn alloc(&mut self, node: Node) -> NodeId {
        self.counters.allocations += 1;
        self.counters.live += 1;
        if self.counters.live > self.counters.peak {
            self.counters.peak = self.counters.live;
        }

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.node.is_none());
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len())
            .unwrap_or_else(|_| panic!("node pool exhausted: more than {} slots", u32::MAX));
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(index, 0)
    }

    /// Remove a node, returning it. `None` if the handle is stale.
    pub fn free(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.counters.live -= 1;
        self.counters.frees += 1;
        Some(node)
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_mut()
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Number of slots, occupied or not. Sweeps walk `0..slot_count()`.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Handle of the node occupying `index`, if any.
    pub fn id_at(&self, index: usize) -> Option<NodeId> {
        let slot = self.slots.get(index)?;
        slot.node.as_ref()?;
        Some(NodeId::new(index as u32, slot.generation))
    }

    /// Handles of every live node.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node
                .as_ref()
                .map(|_| NodeId::new(index as u32, slot.generation))
        })
    }

    pub fn counters(&self) -> PoolCounters {
        self.counters
    }

    pub fn live(&self) -> usize {
        self.counters.live
    }

    /// Slots waiting on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Subclass;

    fn bytes(s: &str) -> Node {
        Node::bytes(Subclass::Bytes, s.as_bytes().to_vec())
    }

    #[test]
    fn test_alloc_and_get() {
        let mut pool = Pool::new();
        let a = pool.alloc(bytes("a"));
        let b = pool.alloc(bytes("b"));
        assert_ne!(a, b);
        assert_eq!(pool.get(a).map(|n| n.bytes_slice()), Some(&b"a"[..]));
        assert_eq!(pool.live(), 2);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut pool = Pool::new();
        let a = pool.alloc(bytes("a"));
        assert!(pool.free(a).is_some());
        assert!(pool.get(a).is_none());
        assert!(pool.free(a).is_none());

        // the slot is reused under a new generation
        let b = pool.alloc(bytes("b"));
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(pool.get(a).is_none());
        assert!(pool.get(b).is_some());
    }

    #[test]
    fn test_counters_track_peak() {
        let mut pool = Pool::new();
        let ids: Vec<_> = (0..5).map(|i| pool.alloc(bytes(&i.to_string()))).collect();
        for id in &ids[..3] {
            pool.free(*id);
        }
        let counters = pool.counters();
        assert_eq!(counters.live, 2);
        assert_eq!(counters.peak, 5);
        assert_eq!(counters.allocations, 5);
        assert_eq!(counters.frees, 3);
        assert_eq!(pool.free_count(), 3);
        assert_eq!(pool.ids().count(), 2);
    }

    #[test]
    fn test_id_at_skips_empty_slots() {
        let mut pool = Pool::new();
        let a = pool.alloc(bytes("a"));
        let b = pool.alloc(bytes("b"));
        pool.free(a);
        assert_eq!(pool.id_at(0), None);
        assert_eq!(pool.id_at(1), Some(b));
        assert_eq!(pool.id_at(2), None);
    }
}
