//! Interned spellings with case-insensitive synonym groups
//!
//! Every distinct spelling becomes one symbol node. Spellings that differ
//! only by case form a circular synonym list; exactly one member is flagged
//! canon and it is the only member the hash table indexes.
//!
//! ```text
//!   table slot ──▶ "Foo" (canon) ──▶ "FOO" ──▶ "foo" ──┐
//!                     ▲                                 │
//!                     └─────────────────────────────────┘
//! ```
//!
//! The table is open-addressed with a fixed per-key skip, sized from a curated
//! list of primes and grown to the next prime once half the slots are in use.
//! Removed canons leave a tombstone so probe chains stay intact; tombstones
//! are dropped when the table grows.

use crate::heap::Heap;
use crate::node::{Node, NodeFlags, NodeId, Subclass};
use crate::pool::Pool;

/// Table sizes. Growth beyond the last one is fatal.
pub const HASH_PRIMES: [u32; 30] = [
    7, 13, 31, 61, 127, 251, 509, 1021, 2039, 4093, 8191, 16381, 32749, 65521, 131071, 262139,
    524287, 1048573, 2097143, 4194301, 8388593, 16777213, 33554393, 67108859, 134217689,
    268435399, 536870909, 1073741789, 2147483647, 4294967291,
];

/// Smallest curated prime that is at least `minimum`.
pub fn get_hash_prime(minimum: u64) -> Option<u32> {
    HASH_PRIMES.iter().copied().find(|p| u64::from(*p) >= minimum)
}

/// FNV-1a over the lowercased characters, so case variants collide.
pub fn hash_caseless(text: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    let mut buf = [0u8; 4];
    for ch in text.chars().flat_map(char::to_lowercase) {
        for &b in ch.encode_utf8(&mut buf).as_bytes() {
            hash ^= u32::from(b);
            hash = hash.wrapping_mul(0x0100_0193);
        }
    }
    hash
}

/// First probe slot and the skip between probes.
#[inline]
fn first_candidate(hash: u32, num_slots: usize) -> (usize, usize) {
    let n = num_slots as u32;
    let mut skip = (hash & 0x0000_FFFF) % n;
    if skip == 0 {
        skip = 1;
    }
    let slot = (hash & 0x00FF_FF00) % n;
    (slot as usize, skip as usize)
}

fn eq_caseless(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spelling {
    Exact,
    Synonym,
    Different,
}

fn compare(stored: &str, probe: &str) -> Spelling {
    if stored == probe {
        Spelling::Exact
    } else if eq_caseless(stored, probe) {
        Spelling::Synonym
    } else {
        Spelling::Different
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymSlot {
    Empty,
    Deleted,
    Canon(NodeId),
}

/// Occupancy figures for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolTableStats {
    pub slots: usize,
    pub canons: usize,
    pub tombstones: usize,
    pub expansions: u64,
    pub pinned: usize,
}

#[derive(Debug)]
pub struct SymbolTable {
    slots: Vec<SymSlot>,
    canons: usize,
    deleted: usize,
    expansions: u64,
    /// Built-in spellings kept alive for the heap's lifetime.
    pinned: Vec<NodeId>,
}

impl SymbolTable {
    /// Table sized for about `expected` distinct canons.
    pub fn with_capacity(expected: usize) -> Self {
        let size = get_hash_prime((expected as u64).saturating_mul(2).max(1))
            .unwrap_or(HASH_PRIMES[HASH_PRIMES.len() - 1]);
        SymbolTable {
            slots: vec![SymSlot::Empty; size as usize],
            canons: 0,
            deleted: 0,
            expansions: 0,
            pinned: Vec::new(),
        }
    }

    pub fn stats(&self) -> SymbolTableStats {
        SymbolTableStats {
            slots: self.slots.len(),
            canons: self.canons,
            tombstones: self.deleted,
            expansions: self.expansions,
            pinned: self.pinned.len(),
        }
    }

    pub fn num_canons(&self) -> usize {
        self.canons
    }

    pub(crate) fn pinned(&self) -> &[NodeId] {
        &self.pinned
    }

    pub(crate) fn unpin_all(&mut self) {
        self.pinned.clear();
    }

    #[inline]
    fn in_use(&self) -> usize {
        self.canons + self.deleted
    }

    /// Insert a canon that is known not to be present. Only used on rehash.
    fn insert_fresh(&mut self, pool: &Pool, id: NodeId) {
        let (mut slot, skip) = first_candidate(hash_caseless(spelling_in(pool, id)), self.slots.len());
        while self.slots[slot] != SymSlot::Empty {
            slot = (slot + skip) % self.slots.len();
        }
        self.slots[slot] = SymSlot::Canon(id);
    }

    /// Grow to the next prime and rehash, dropping tombstones.
    ///
    /// # Panics
    /// Panics when no larger prime is available.
    fn expand(&mut self, pool: &Pool) {
        let old_len = self.slots.len();
        let Some(size) = get_hash_prime(old_len as u64 + 1) else {
            tracing::error!(slots = old_len, "symbol table size limit exceeded");
            panic!("symbol table cannot grow past {old_len} slots");
        };
        let old = std::mem::replace(&mut self.slots, vec![SymSlot::Empty; size as usize]);
        self.deleted = 0;
        self.expansions += 1;
        for entry in old {
            if let SymSlot::Canon(id) = entry {
                self.insert_fresh(pool, id);
            }
        }
        tracing::trace!(from = old_len, to = size, canons = self.canons, "symbol table expanded");
    }

    /// Slot currently holding `canon`, found by probing.
    fn slot_of(&self, pool: &Pool, canon: NodeId) -> Option<usize> {
        let n = self.slots.len();
        let (mut slot, skip) = first_candidate(hash_caseless(spelling_in(pool, canon)), n);
        for _ in 0..n {
            match self.slots[slot] {
                SymSlot::Empty => return None,
                SymSlot::Canon(id) if id == canon => return Some(slot),
                _ => {}
            }
            slot = (slot + skip) % n;
        }
        None
    }
}

fn spelling_in(pool: &Pool, id: NodeId) -> &str {
    pool.get(id)
        .and_then(|node| std::str::from_utf8(node.bytes_slice()).ok())
        .unwrap_or("")
}

fn synonym_in(pool: &Pool, id: NodeId) -> NodeId {
    match pool.get(id).map(|node| node.subclass) {
        Some(Subclass::Symbol { synonym }) => synonym,
        _ => id,
    }
}

fn set_synonym(pool: &mut Pool, id: NodeId, next: NodeId) {
    if let Some(node) = pool.get_mut(id) {
        node.subclass = Subclass::Symbol { synonym: next };
    }
}

impl Heap {
    /// Intern a spelling. Identical text always yields the same handle;
    /// a case variant yields its own handle inside the same synonym group.
    pub fn intern(&mut self, text: &str) -> NodeId {
        if self.symbols.in_use() > self.symbols.slots.len() / 2 {
            self.symbols.expand(&self.pool);
        }

        let n = self.symbols.slots.len();
        let (mut slot, skip) = first_candidate(hash_caseless(text), n);
        let mut tombstone: Option<usize> = None;

        loop {
            match self.symbols.slots[slot] {
                SymSlot::Empty => break,
                SymSlot::Deleted => {
                    if tombstone.is_none() {
                        tombstone = Some(slot);
                    }
                }
                SymSlot::Canon(canon) => match compare(spelling_in(&self.pool, canon), text) {
                    Spelling::Exact => return canon,
                    Spelling::Synonym => {
                        let mut syn = synonym_in(&self.pool, canon);
                        while syn != canon {
                            if spelling_in(&self.pool, syn) == text {
                                return syn;
                            }
                            syn = synonym_in(&self.pool, syn);
                        }
                        let id = self.alloc_symbol(text, false);
                        let next = synonym_in(&self.pool, canon);
                        set_synonym(&mut self.pool, id, next);
                        set_synonym(&mut self.pool, canon, id);
                        return id;
                    }
                    Spelling::Different => {}
                },
            }
            slot = (slot + skip) % n;
        }

        let id = self.alloc_symbol(text, true);
        let target = match tombstone {
            Some(t) => {
                self.symbols.deleted -= 1;
                t
            }
            None => slot,
        };
        self.symbols.slots[target] = SymSlot::Canon(id);
        self.symbols.canons += 1;
        id
    }

    /// Intern and keep alive for the heap's lifetime.
    pub fn intern_pinned(&mut self, text: &str) -> NodeId {
        let id = self.intern(text);
        let canon = self.canon(id);
        if !self.symbols.pinned.contains(&canon) {
            self.symbols.pinned.push(canon);
        }
        id
    }

    fn alloc_symbol(&mut self, text: &str, canon: bool) -> NodeId {
        let mut flags = NodeFlags::MANAGED;
        if canon {
            flags.insert(NodeFlags::CANON);
        }
        let node = Node::bytes(Subclass::Bytes, text.as_bytes().to_vec()).with_flags(flags);
        let id = self.alloc(node);
        set_synonym(&mut self.pool, id, id);
        id
    }

    /// The canon of the synonym group `id` belongs to.
    pub fn canon(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        loop {
            match self.pool.get(cur) {
                Some(node) if node.flags.contains(NodeFlags::CANON) => return cur,
                Some(_) => {}
                None => return id,
            }
            cur = synonym_in(&self.pool, cur);
            if cur == id {
                return id;
            }
        }
    }

    pub fn is_canon(&self, id: NodeId) -> bool {
        self.pool
            .get(id)
            .is_some_and(|node| node.flags.contains(NodeFlags::CANON))
    }

    /// Text of an interned spelling.
    pub fn spelling(&self, id: NodeId) -> &str {
        spelling_in(&self.pool, id)
    }

    /// Every member of the synonym group, starting with `id`.
    pub fn synonyms(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut cur = synonym_in(&self.pool, id);
        while cur != id {
            out.push(cur);
            cur = synonym_in(&self.pool, cur);
        }
        out
    }

    /// Same word ignoring case.
    pub fn same_spelling(&self, a: NodeId, b: NodeId) -> bool {
        a == b || self.canon(a) == self.canon(b)
    }

    pub fn symbol_stats(&self) -> SymbolTableStats {
        self.symbols.stats()
    }

    /// Unhook a symbol that the sweep is about to free.
    ///
    /// A dying canon hands its slot to a surviving synonym; the last member
    /// of a group leaves a tombstone.
    pub(crate) fn kill_interning(&mut self, id: NodeId) {
        let next = synonym_in(&self.pool, id);
        if next != id {
            let mut prev = next;
            while synonym_in(&self.pool, prev) != id {
                prev = synonym_in(&self.pool, prev);
            }
            set_synonym(&mut self.pool, prev, next);
        }

        if !self.is_canon(id) {
            return;
        }

        let Some(slot) = self.symbols.slot_of(&self.pool, id) else {
            panic!("canon {id} missing from the symbol table");
        };

        if next != id {
            if let Some(node) = self.pool.get_mut(next) {
                node.flags.insert(NodeFlags::CANON);
            }
            self.symbols.slots[slot] = SymSlot::Canon(next);
        } else {
            self.symbols.slots[slot] = SymSlot::Deleted;
            self.symbols.canons -= 1;
            self.symbols.deleted += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn heap() -> Heap {
        Heap::new(HeapConfig {
            symbol_capacity: 1,
            ..HeapConfig::default()
        })
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut heap = heap();
        let a = heap.intern("append");
        let b = heap.intern("append");
        assert_eq!(a, b);
        assert_eq!(heap.spelling(a), "append");
        assert!(heap.is_canon(a));
    }

    #[test]
    fn test_case_variants_are_synonyms() {
        let mut heap = heap();
        let lower = heap.intern("foo");
        let upper = heap.intern("FOO");
        let mixed = heap.intern("Foo");
        assert_ne!(lower, upper);
        assert_ne!(upper, mixed);
        assert_eq!(heap.canon(upper), lower);
        assert_eq!(heap.canon(mixed), lower);
        assert_eq!(heap.intern("FOO"), upper);

        let group = heap.synonyms(lower);
        assert_eq!(group.len(), 3);
        assert!(group.contains(&upper) && group.contains(&mixed));
        assert!(heap.same_spelling(upper, mixed));
        assert_eq!(heap.symbol_stats().canons, 1);
    }

    #[test]
    fn test_table_grows_through_primes() {
        let mut heap = heap();
        assert_eq!(heap.symbol_stats().slots, 7);
        let ids: Vec<_> = (0..500).map(|i| heap.intern(&format!("word-{i}"))).collect();
        let stats = heap.symbol_stats();
        assert!(stats.expansions >= 5);
        assert!(HASH_PRIMES.contains(&(stats.slots as u32)));
        assert!(stats.canons * 2 <= stats.slots);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(heap.intern(&format!("word-{i}")), *id);
        }
    }

    #[test]
    fn test_kill_promotes_synonym() {
        let mut heap = heap();
        let canon = heap.intern("Word");
        let syn = heap.intern("WORD");
        heap.kill_interning(canon);
        heap.pool.free(canon);

        assert!(heap.is_canon(syn));
        assert_eq!(heap.canon(syn), syn);
        assert_eq!(heap.intern("WORD"), syn);
        assert_eq!(heap.synonyms(syn), vec![syn]);
        assert_eq!(heap.symbol_stats().canons, 1);
    }

    #[test]
    fn test_kill_last_member_leaves_tombstone() {
        let mut heap = heap();
        let id = heap.intern("gone");
        heap.kill_interning(id);
        heap.pool.free(id);
        let stats = heap.symbol_stats();
        assert_eq!(stats.canons, 0);
        assert_eq!(stats.tombstones, 1);

        // the tombstone is reused by the next insert that probes through it
        let again = heap.intern("gone");
        assert_ne!(again, id);
        assert_eq!(heap.symbol_stats().tombstones, 0);
    }

    #[test]
    fn test_hash_is_caseless() {
        assert_eq!(hash_caseless("Hello"), hash_caseless("hELLO"));
        assert_ne!(hash_caseless("hello"), hash_caseless("world"));
    }

    #[test]
    fn test_get_hash_prime() {
        assert_eq!(get_hash_prime(0), Some(7));
        assert_eq!(get_hash_prime(8), Some(13));
        assert_eq!(get_hash_prime(4294967291), Some(4294967291));
        assert_eq!(get_hash_prime(4294967292), None);
    }
}
