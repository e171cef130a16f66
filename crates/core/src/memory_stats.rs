//! Cross-thread heap statistics registry
//!
//! Each heap lives on one thread, but the diagnostics dump runs on a signal
//! handler thread and the exit report may run after the heap is gone. Every
//! thread that owns a heap claims one slot in a global registry and
//! publishes its counters there with relaxed atomic stores.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                HeapStatsRegistry (global)               │
//! ├─────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐             │
//! │  │ Slot 0 (Thread A)│  │ Slot 1 (Thread B)│  ...        │
//! │  │ live_nodes       │  │ live_nodes       │             │
//! │  │ peak_nodes       │  │ peak_nodes       │             │
//! │  │ gc_cycles ...    │  │ gc_cycles ...    │             │
//! │  └──────────────────┘  └──────────────────┘             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Registration is one CAS per thread. Updates are single stores with no
//! contention. Reads only happen when a dump or report is produced.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Threads that can publish statistics at once.
const MAX_THREADS: usize = 64;

#[derive(Debug)]
pub struct HeapSlot {
    /// 0 means the slot is free.
    pub thread_id: AtomicU64,
    pub live_nodes: AtomicU64,
    pub peak_nodes: AtomicU64,
    pub allocations: AtomicU64,
    pub gc_cycles: AtomicU64,
    pub nodes_swept: AtomicU64,
    pub leaked_handles: AtomicU64,
}

impl HeapSlot {
    const fn new() -> Self {
        Self {
            thread_id: AtomicU64::new(0),
            live_nodes: AtomicU64::new(0),
            peak_nodes: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            gc_cycles: AtomicU64::new(0),
            nodes_swept: AtomicU64::new(0),
            leaked_handles: AtomicU64::new(0),
        }
    }
}

pub struct HeapStatsRegistry {
    slots: Box<[HeapSlot]>,
    /// Threads that found the registry full.
    pub overflow_count: AtomicU64,
}

impl HeapStatsRegistry {
    fn new(capacity: usize) -> Self {
        let slots: Vec<HeapSlot> = (0..capacity).map(|_| HeapSlot::new()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Claim a slot for the current thread. `None` when the registry is full.
    pub fn register(&self) -> Option<usize> {
        let thread_id = current_thread_id();
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .thread_id
                .compare_exchange(0, thread_id, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(idx);
            }
        }
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Publish allocation counters; the peak is raised with a CAS loop.
    #[inline]
    pub fn update_nodes(&self, slot_idx: usize, live: usize, allocations: u64) {
        if let Some(slot) = self.slots.get(slot_idx) {
            let live = live as u64;
            slot.live_nodes.store(live, Ordering::Relaxed);
            slot.allocations.store(allocations, Ordering::Relaxed);

            let mut peak = slot.peak_nodes.load(Ordering::Relaxed);
            while live > peak {
                match slot.peak_nodes.compare_exchange_weak(
                    peak,
                    live,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(current) => peak = current,
                }
            }
        }
    }

    /// Count one finished collection.
    pub fn record_collection(&self, slot_idx: usize, swept: usize, leaked: usize) {
        if let Some(slot) = self.slots.get(slot_idx) {
            slot.gc_cycles.fetch_add(1, Ordering::Relaxed);
            slot.nodes_swept.fetch_add(swept as u64, Ordering::Relaxed);
            slot.leaked_handles.fetch_add(leaked as u64, Ordering::Relaxed);
        }
    }

    pub fn aggregate_stats(&self) -> AggregateHeapStats {
        let mut stats = AggregateHeapStats {
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
            ..AggregateHeapStats::default()
        };
        for slot in self.slots.iter() {
            if slot.thread_id.load(Ordering::Acquire) > 0 {
                stats.active_threads += 1;
                stats.live_nodes += slot.live_nodes.load(Ordering::Relaxed);
                stats.peak_nodes += slot.peak_nodes.load(Ordering::Relaxed);
                stats.allocations += slot.allocations.load(Ordering::Relaxed);
                stats.gc_cycles += slot.gc_cycles.load(Ordering::Relaxed);
                stats.nodes_swept += slot.nodes_swept.load(Ordering::Relaxed);
                stats.leaked_handles += slot.leaked_handles.load(Ordering::Relaxed);
            }
        }
        stats
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateHeapStats {
    pub active_threads: usize,
    pub live_nodes: u64,
    pub peak_nodes: u64,
    pub allocations: u64,
    pub gc_cycles: u64,
    pub nodes_swept: u64,
    pub leaked_handles: u64,
    pub overflow_count: u64,
}

/// Starts at 1 because 0 marks a free slot.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THIS_THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THIS_THREAD_ID.with(|&id| id)
}

static HEAP_REGISTRY: OnceLock<HeapStatsRegistry> = OnceLock::new();

pub fn heap_registry() -> &'static HeapStatsRegistry {
    HEAP_REGISTRY.get_or_init(|| HeapStatsRegistry::new(MAX_THREADS))
}

thread_local! {
    static SLOT_INDEX: std::cell::Cell<Option<usize>> = const { std::cell::Cell::new(None) };
}

/// Slot of the current thread, registering on first use.
pub fn get_or_register_slot() -> Option<usize> {
    SLOT_INDEX.with(|cell| {
        if let Some(idx) = cell.get() {
            Some(idx)
        } else {
            let idx = heap_registry().register();
            cell.set(idx);
            idx
        }
    })
}

#[inline]
pub fn update_node_stats(live: usize, allocations: u64) {
    if let Some(idx) = SLOT_INDEX.with(|cell| cell.get()) {
        heap_registry().update_nodes(idx, live, allocations);
    }
}

pub fn record_collection(swept: usize, leaked: usize) {
    if let Some(idx) = SLOT_INDEX.with(|cell| cell.get()) {
        heap_registry().record_collection(idx, swept, leaked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_basic() {
        let registry = HeapStatsRegistry::new(4);
        let idx = registry.register().unwrap();

        registry.update_nodes(idx, 10, 25);
        registry.update_nodes(idx, 4, 30);
        registry.record_collection(idx, 21, 1);

        let stats = registry.aggregate_stats();
        assert_eq!(stats.active_threads, 1);
        assert_eq!(stats.live_nodes, 4);
        assert_eq!(stats.peak_nodes, 10);
        assert_eq!(stats.allocations, 30);
        assert_eq!(stats.gc_cycles, 1);
        assert_eq!(stats.nodes_swept, 21);
        assert_eq!(stats.leaked_handles, 1);
    }

    #[test]
    fn test_registry_overflow() {
        let registry = HeapStatsRegistry::new(2);
        assert!(registry.register().is_some());
        assert!(registry.register().is_some());
        assert!(registry.register().is_none());
        assert_eq!(registry.overflow_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_thread_local_slot_is_cached() {
        let slot1 = get_or_register_slot();
        let slot2 = get_or_register_slot();
        assert_eq!(slot1, slot2);
    }

    #[test]
    fn test_concurrent_registration() {
        use std::thread;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                thread::spawn(move || {
                    let slot = get_or_register_slot();
                    if slot.is_some() {
                        update_node_stats(100 * (i + 1), 7);
                    }
                    slot.is_some()
                })
            })
            .collect();

        let mut registered = 0;
        for h in handles {
            if h.join().unwrap() {
                registered += 1;
            }
        }
        let stats = heap_registry().aggregate_stats();
        assert!(stats.active_threads >= registered);
    }
}
