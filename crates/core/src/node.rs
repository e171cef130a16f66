//! Heap node headers: handles, flags and subclass side links
//!
//! A node is one pooled allocation. It holds either a vector of cells or a
//! flat byte buffer, plus a subclass that carries the links the collector has
//! to follow (a varlist's keylist, a paramlist's underlying action, ...).

use crate::cell::Cell;
use std::fmt;

/// Generation-checked handle to a pooled node.
///
/// Freeing a node bumps the generation of its slot, so a handle kept past
/// the node's lifetime is detected instead of aliasing the slot's next tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        NodeId { index, generation }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into one nonzero integer for handles crossing the C boundary.
    pub const fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64 + 1)
    }

    /// Inverse of [`NodeId::to_raw`]. Zero means "no handle".
    pub const fn from_raw(raw: u64) -> Option<NodeId> {
        let low = raw as u32;
        if low == 0 {
            return None;
        }
        Some(NodeId {
            index: low - 1,
            generation: (raw >> 32) as u32,
        })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Identity of one call frame; never reused within a heap's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSerial(pub u64);

bitflags::bitflags! {
    /// Management and state bits of a node.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        /// Lifetime decided by the collector.
        const MANAGED = 1 << 0;
        /// Reached during the current collection cycle.
        const MARKED = 1 << 1;
        /// Externally held API handle; marked as a root.
        const ROOT = 1 << 2;
        /// Backs a stack-resident structure; reachable without being managed.
        const STACK = 1 << 3;
        /// Length may not change.
        const FIXED_SIZE = 1 << 4;
        /// Content invalidated (an expired frame); must not be read.
        const INACCESSIBLE = 1 << 5;
        /// Symbol that represents its synonym group in the hash table.
        const CANON = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Properties of an action computed when it is built.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ActionFlags: u8 {
        /// Has a definitional RETURN in its last slot.
        const RETURN = 1 << 0;
        /// Has a definitional LEAVE in its last slot.
        const LEAVE = 1 << 1;
        /// Return typeset is empty: calls vanish from the surrounding evaluation.
        const INVISIBLE = 1 << 2;
        /// First argument is normal, so an enfix call lets its left side finish.
        const DEFERS_LOOKBACK = 1 << 3;
        /// First argument is hard- or soft-quoted.
        const QUOTES_FIRST_ARG = 1 << 4;
        /// Implemented by a native dispatcher.
        const NATIVE = 1 << 5;
    }
}

/// Opaque dispatcher selector stored in an action's details node.
///
/// The runtime owns the mapping from ids to executable dispatchers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DispatcherId(pub u32);

/// Where a varlist finds its keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keysource {
    /// A keylist or a paramlist.
    Keylist(NodeId),
    /// A frame still running on the stack; keys are its phase's parameters.
    Frame(FrameSerial),
}

/// Exactly one per node. Carries the links the collector follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subclass {
    /// Block, group, path or any other plain sequence of cells.
    Array,
    /// Keys of an object; `[0]` is a placeholder.
    Keylist { ancestor: Option<NodeId> },
    /// Context instance; `[0]` is the context's archetype value.
    Varlist {
        keysource: Keysource,
        meta: Option<NodeId>,
    },
    /// Action interface; `[0]` is the archetype action pointing back here.
    Paramlist {
        underlying: NodeId,
        facade: NodeId,
        meta: Option<NodeId>,
        flags: ActionFlags,
    },
    /// Action implementation: dispatcher plus a singular body cell.
    Details {
        dispatcher: DispatcherId,
        exemplar: Option<NodeId>,
    },
    /// Map storage: alternating keys and values.
    Pairlist { hashlist: Option<NodeId> },
    /// String or binary data.
    Bytes,
    /// Interned spelling; `synonym` continues the circular case-variant list.
    Symbol { synonym: NodeId },
    /// Two-cell allocation.
    Pairing,
    /// API handle; the owner is the frame that allocated it, if any.
    ApiRoot { owner: Option<FrameSerial> },
}

impl Subclass {
    pub const fn name(&self) -> &'static str {
        match self {
            Subclass::Array => "array",
            Subclass::Keylist { .. } => "keylist",
            Subclass::Varlist { .. } => "varlist",
            Subclass::Paramlist { .. } => "paramlist",
            Subclass::Details { .. } => "details",
            Subclass::Pairlist { .. } => "pairlist",
            Subclass::Bytes => "bytes",
            Subclass::Symbol { .. } => "symbol",
            Subclass::Pairing => "pairing",
            Subclass::ApiRoot { .. } => "api-root",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    Cells(Vec<Cell>),
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub flags: NodeFlags,
    pub subclass: Subclass,
    pub content: Content,
}

impl Node {
    pub fn array(subclass: Subclass, cells: Vec<Cell>) -> Self {
        Node {
            flags: NodeFlags::empty(),
            subclass,
            content: Content::Cells(cells),
        }
    }

    pub fn bytes(subclass: Subclass, bytes: Vec<u8>) -> Self {
        Node {
            flags: NodeFlags::empty(),
            subclass,
            content: Content::Bytes(bytes),
        }
    }

    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    /// Cells of an array node; empty for byte buffers.
    #[inline]
    pub fn cells(&self) -> &[Cell] {
        match &self.content {
            Content::Cells(cells) => cells,
            Content::Bytes(_) => &[],
        }
    }

    #[inline]
    pub fn cells_mut(&mut self) -> Option<&mut Vec<Cell>> {
        match &mut self.content {
            Content::Cells(cells) => Some(cells),
            Content::Bytes(_) => None,
        }
    }

    /// Raw bytes of a byte buffer; empty for arrays.
    #[inline]
    pub fn bytes_slice(&self) -> &[u8] {
        match &self.content {
            Content::Bytes(bytes) => bytes,
            Content::Cells(_) => &[],
        }
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self.content, Content::Cells(_))
    }

    #[inline]
    pub fn is_managed(&self) -> bool {
        self.flags.contains(NodeFlags::MANAGED)
    }

    /// Size of one element.
    pub fn width(&self) -> usize {
        match self.content {
            Content::Cells(_) => std::mem::size_of::<Cell>(),
            Content::Bytes(_) => 1,
        }
    }

    pub fn len(&self) -> usize {
        match &self.content {
            Content::Cells(cells) => cells.len(),
            Content::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        match &self.content {
            Content::Cells(cells) => cells.capacity(),
            Content::Bytes(bytes) => bytes.capacity(),
        }
    }

    /// Approximate footprint charged against the collection ballast.
    pub fn byte_size(&self) -> usize {
        std::mem::size_of::<Node>() + self.capacity() * self.width()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_insert_remove() {
        let mut flags = NodeFlags::MANAGED | NodeFlags::FIXED_SIZE;
        assert!(flags.contains(NodeFlags::MANAGED));
        assert!(!flags.contains(NodeFlags::MARKED));
        flags.insert(NodeFlags::MARKED);
        assert!(flags.contains(NodeFlags::MANAGED | NodeFlags::MARKED));
        flags.remove(NodeFlags::MARKED);
        assert!(!flags.intersects(NodeFlags::MARKED | NodeFlags::ROOT));
    }

    #[test]
    fn test_width_and_len() {
        let bytes = Node::bytes(Subclass::Bytes, b"abc".to_vec());
        assert_eq!(bytes.width(), 1);
        assert_eq!(bytes.len(), 3);
        assert!(bytes.cells().is_empty());

        let array = Node::array(Subclass::Array, vec![Cell::blank(), Cell::blank()]);
        assert_eq!(array.width(), std::mem::size_of::<Cell>());
        assert_eq!(array.len(), 2);
        assert!(array.bytes_slice().is_empty());
    }

    #[test]
    fn test_raw_round_trip() {
        let id = NodeId::new(7, 3);
        assert_eq!(NodeId::from_raw(id.to_raw()), Some(id));
        let first = NodeId::new(0, 0);
        assert_ne!(first.to_raw(), 0);
        assert_eq!(NodeId::from_raw(first.to_raw()), Some(first));
        assert_eq!(NodeId::from_raw(0), None);
    }
}
