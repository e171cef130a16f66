//! The heap: node pool, symbol table, data stack, frame stack and guards
//!
//! Nodes are either manual (the creator frees them, or hands them over with
//! [`Heap::manage`]) or managed (the collector decides). Managing is one-way.
//!
//! Everything here is single-threaded. One heap is one interpreter.

use crate::cell::{Cell, INLINE_QUOTE_MAX};
use crate::data_stack::{DEFAULT_DATA_STACK_CAPACITY, DataStack};
use crate::frame::{Feed, FeedSource, Frame};
use crate::gc::GcState;
use crate::memory_stats;
use crate::node::{Content, FrameSerial, Keysource, Node, NodeFlags, NodeId, Subclass};
use crate::pool::{Pool, PoolCounters};
use crate::symbol::SymbolTable;
use std::fmt;

/// Bytes allocated between automatic collections.
pub const DEFAULT_BALLAST: usize = 3_000_000;

/// What to do with an API handle whose owning frame ended normally without
/// releasing it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeakPolicy {
    /// Free it, log a warning and count it.
    #[default]
    Report,
    /// Treat it as a fatal defect.
    Panic,
}

impl LeakPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "report" => Some(LeakPolicy::Report),
            "panic" => Some(LeakPolicy::Panic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeapConfig {
    pub ballast: usize,
    /// Expected distinct spellings.
    pub symbol_capacity: usize,
    /// Check every marked node's references before sweeping.
    pub verify_marks: bool,
    pub leak_policy: LeakPolicy,
    pub data_stack_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            ballast: DEFAULT_BALLAST,
            symbol_capacity: 1024,
            verify_marks: cfg!(debug_assertions),
            leak_policy: LeakPolicy::Report,
            data_stack_capacity: DEFAULT_DATA_STACK_CAPACITY,
        }
    }
}

/// Failures reading or writing node content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// The node belongs to a frame whose call has ended.
    Inaccessible(NodeId),
    /// The node's length may not change.
    FixedSize(NodeId),
    /// A cell operation on a byte buffer, or the reverse.
    WrongWidth(NodeId),
    /// Position past the end of the content.
    OutOfRange(NodeId, usize),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Inaccessible(id) => write!(f, "node {id} is inaccessible"),
            NodeError::FixedSize(id) => write!(f, "node {id} has a fixed size"),
            NodeError::WrongWidth(id) => write!(f, "node {id} has the wrong element width"),
            NodeError::OutOfRange(id, i) => write!(f, "index {i} out of range for node {id}"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Something protected from collection for a bounded scope.
#[derive(Debug, Clone, Copy)]
pub enum Guard {
    Node(NodeId),
    Cell(Cell),
}

pub struct Heap {
    pub(crate) pool: Pool,
    pub(crate) symbols: SymbolTable,
    pub data_stack: DataStack,
    pub frames: Vec<Frame>,
    pub(crate) guards: Vec<Guard>,
    /// Nodes kept alive until shutdown.
    pub(crate) pinned: Vec<NodeId>,
    /// Frames that ended by an error; their API handles are freed silently.
    pub(crate) failed_frames: Vec<FrameSerial>,
    pub(crate) gc: GcState,
    pub(crate) config: HeapConfig,
    next_serial: u64,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new(HeapConfig::default())
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.pool.live())
            .field("frames", &self.frames.len())
            .field("dsp", &self.data_stack.dsp())
            .field("guards", &self.guards.len())
            .finish()
    }
}

impl Heap {
    pub fn new(config: HeapConfig) -> Self {
        memory_stats::get_or_register_slot();
        Heap {
            pool: Pool::with_capacity(1024),
            symbols: SymbolTable::with_capacity(config.symbol_capacity),
            data_stack: DataStack::new(config.data_stack_capacity),
            frames: Vec::new(),
            guards: Vec::new(),
            pinned: Vec::new(),
            failed_frames: Vec::new(),
            gc: GcState::new(config.ballast),
            config,
            next_serial: 1,
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn counters(&self) -> PoolCounters {
        self.pool.counters()
    }

    /// Nodes currently allocated.
    pub fn live_nodes(&self) -> usize {
        self.pool.live()
    }

    /// Lifetime allocation count; a delta of zero means nothing was allocated.
    pub fn allocations(&self) -> u64 {
        self.pool.counters().allocations
    }

    /// Handles of every live node, in slot order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.pool.ids().collect()
    }

    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        let size = node.byte_size() as isize;
        let id = self.pool.alloc(node);
        self.gc.charge(size);
        let counters = self.pool.counters();
        memory_stats::update_node_stats(counters.live, counters.allocations);
        id
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate an empty node. Byte buffers get `capacity` bytes of room,
    /// everything else `capacity` cells.
    pub fn allocate(&mut self, capacity: usize, subclass: Subclass, managed: bool) -> NodeId {
        let node = match subclass {
            Subclass::Bytes => Node::bytes(subclass, Vec::with_capacity(capacity)),
            _ => Node::array(subclass, Vec::with_capacity(capacity)),
        };
        let flags = if managed {
            NodeFlags::MANAGED
        } else {
            NodeFlags::empty()
        };
        self.alloc(node.with_flags(flags))
    }

    /// Manual array holding `cells`.
    pub fn make_array(&mut self, subclass: Subclass, cells: Vec<Cell>) -> NodeId {
        self.alloc(Node::array(subclass, cells))
    }

    /// Managed array holding `cells`.
    pub fn make_managed_array(&mut self, subclass: Subclass, cells: Vec<Cell>) -> NodeId {
        self.alloc(Node::array(subclass, cells).with_flags(NodeFlags::MANAGED))
    }

    /// Managed byte buffer.
    pub fn make_bytes(&mut self, bytes: Vec<u8>) -> NodeId {
        self.alloc(Node::bytes(Subclass::Bytes, bytes).with_flags(NodeFlags::MANAGED))
    }

    pub fn make_string(&mut self, text: &str) -> NodeId {
        self.make_bytes(text.as_bytes().to_vec())
    }

    /// Hand a manual node to the collector. Idempotent.
    pub fn manage(&mut self, id: NodeId) {
        self.node_mut(id).flags.insert(NodeFlags::MANAGED);
    }

    pub fn is_managed(&self, id: NodeId) -> bool {
        self.node(id).is_managed()
    }

    /// Free a manual node.
    ///
    /// # Panics
    /// Panics if the node is managed; only the sweep frees those.
    pub fn free(&mut self, id: NodeId) {
        if self.node(id).is_managed() {
            panic!("explicit free of managed node {id}");
        }
        self.pool.free(id);
        let counters = self.pool.counters();
        memory_stats::update_node_stats(counters.live, counters.allocations);
    }

    // =========================================================================
    // Node access
    // =========================================================================

    pub fn contains(&self, id: NodeId) -> bool {
        self.pool.contains(id)
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.pool.get(id)
    }

    /// # Panics
    /// Panics on a stale handle, which is always a lifetime bug.
    pub fn node(&self, id: NodeId) -> &Node {
        match self.pool.get(id) {
            Some(node) => node,
            None => panic!("stale node handle {id}"),
        }
    }

    /// # Panics
    /// Panics on a stale handle.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.pool.get_mut(id) {
            Some(node) => node,
            None => panic!("stale node handle {id}"),
        }
    }

    pub fn subclass(&self, id: NodeId) -> Subclass {
        self.node(id).subclass
    }

    pub fn set_subclass(&mut self, id: NodeId, subclass: Subclass) {
        self.node_mut(id).subclass = subclass;
    }

    pub fn is_accessible(&self, id: NodeId) -> bool {
        !self.node(id).flags.contains(NodeFlags::INACCESSIBLE)
    }

    pub fn check_accessible(&self, id: NodeId) -> Result<(), NodeError> {
        if self.is_accessible(id) {
            Ok(())
        } else {
            Err(NodeError::Inaccessible(id))
        }
    }

    pub fn cells(&self, id: NodeId) -> &[Cell] {
        self.node(id).cells()
    }

    pub fn len(&self, id: NodeId) -> usize {
        self.node(id).len()
    }

    pub fn cell_at(&self, id: NodeId, index: usize) -> Option<Cell> {
        self.node(id).cells().get(index).copied()
    }

    pub fn set_cell(&mut self, id: NodeId, index: usize, cell: Cell) -> Result<(), NodeError> {
        self.check_accessible(id)?;
        let cells = self
            .node_mut(id)
            .cells_mut()
            .ok_or(NodeError::WrongWidth(id))?;
        let slot = cells.get_mut(index).ok_or(NodeError::OutOfRange(id, index))?;
        *slot = cell;
        Ok(())
    }

    pub fn append(&mut self, id: NodeId, cell: Cell) -> Result<(), NodeError> {
        let node = self.node(id);
        if node.flags.contains(NodeFlags::FIXED_SIZE) {
            return Err(NodeError::FixedSize(id));
        }
        if node.flags.contains(NodeFlags::INACCESSIBLE) {
            return Err(NodeError::Inaccessible(id));
        }
        let cells = self
            .node_mut(id)
            .cells_mut()
            .ok_or(NodeError::WrongWidth(id))?;
        cells.push(cell);
        Ok(())
    }

    /// Remove and return the cell at `index`.
    pub fn remove_at(&mut self, id: NodeId, index: usize) -> Result<Cell, NodeError> {
        let node = self.node(id);
        if node.flags.contains(NodeFlags::FIXED_SIZE) {
            return Err(NodeError::FixedSize(id));
        }
        let cells = self
            .node_mut(id)
            .cells_mut()
            .ok_or(NodeError::WrongWidth(id))?;
        if index >= cells.len() {
            return Err(NodeError::OutOfRange(id, index));
        }
        Ok(cells.remove(index))
    }

    pub fn bytes(&self, id: NodeId) -> &[u8] {
        self.node(id).bytes_slice()
    }

    /// UTF-8 text of a byte buffer; empty if the buffer is not valid UTF-8.
    pub fn text(&self, id: NodeId) -> &str {
        std::str::from_utf8(self.bytes(id)).unwrap_or("")
    }

    pub fn append_bytes(&mut self, id: NodeId, more: &[u8]) -> Result<(), NodeError> {
        match &mut self.node_mut(id).content {
            Content::Bytes(bytes) => {
                bytes.extend_from_slice(more);
                Ok(())
            }
            Content::Cells(_) => Err(NodeError::WrongWidth(id)),
        }
    }

    // =========================================================================
    // Guards and pins
    // =========================================================================

    /// Protect a node until the matching [`Heap::drop_guard`].
    pub fn push_guard_node(&mut self, id: NodeId) {
        self.guards.push(Guard::Node(id));
    }

    /// Protect everything a cell references until the matching drop.
    pub fn push_guard_cell(&mut self, cell: Cell) {
        self.guards.push(Guard::Cell(cell));
    }

    /// # Panics
    /// Panics when there is no guard to drop.
    pub fn drop_guard(&mut self) {
        if self.guards.pop().is_none() {
            panic!("guard stack underflow");
        }
    }

    pub fn guard_depth(&self) -> usize {
        self.guards.len()
    }

    /// Keep a node alive until shutdown.
    pub fn pin(&mut self, id: NodeId) {
        if !self.pinned.contains(&id) {
            self.pinned.push(id);
        }
    }

    pub fn unpin(&mut self, id: NodeId) {
        self.pinned.retain(|p| *p != id);
    }

    // =========================================================================
    // Quoting
    // =========================================================================

    /// Total quote depth, inline or escaped.
    pub fn quote_depth(&self, cell: &Cell) -> u32 {
        match cell.escape() {
            Some((_, depth)) => depth,
            None => u32::from(cell.inline_quotes()),
        }
    }

    /// The value under all quote levels.
    pub fn dequoted(&self, cell: &Cell) -> Cell {
        match cell.escape() {
            Some((node, _)) => self.cell_at(node, 0).unwrap_or_else(Cell::void),
            None => cell.with_inline_quotes(0),
        }
    }

    /// Add `depth` quote levels. Depths past the inline limit move the base
    /// value into a managed escape node.
    pub fn quotify(&mut self, cell: Cell, depth: u32) -> Cell {
        if depth == 0 {
            return cell;
        }
        let total = self.quote_depth(&cell) + depth;
        if total <= u32::from(INLINE_QUOTE_MAX) {
            return cell.with_inline_quotes(total as u8);
        }
        match cell.escape() {
            Some((node, _)) => Cell::escaped(node, total),
            None => {
                let base = cell.with_inline_quotes(0);
                let node = self.alloc(
                    Node::array(Subclass::Array, vec![base])
                        .with_flags(NodeFlags::MANAGED | NodeFlags::FIXED_SIZE),
                );
                Cell::escaped(node, total)
            }
        }
    }

    /// Remove up to `depth` quote levels.
    pub fn unquotify(&self, cell: Cell, depth: u32) -> Cell {
        let current = self.quote_depth(&cell);
        let total = current.saturating_sub(depth);
        match cell.escape() {
            Some((node, _)) if total > u32::from(INLINE_QUOTE_MAX) => Cell::escaped(node, total),
            Some(_) => self.dequoted(&cell).with_inline_quotes(total as u8),
            None => cell.with_inline_quotes(total as u8),
        }
    }

    // =========================================================================
    // Frames
    // =========================================================================

    pub fn next_frame_serial(&mut self) -> FrameSerial {
        let serial = FrameSerial(self.next_serial);
        self.next_serial += 1;
        serial
    }

    /// Push a frame reading from `feed`; returns its stack index.
    pub fn push_frame(&mut self, feed: Feed) -> usize {
        let serial = self.next_frame_serial();
        self.frames.push(Frame::new(serial, feed));
        self.frames.len() - 1
    }

    /// Pop the innermost frame. A reified varlist is expired and the frame's
    /// data stack pushes are discarded.
    ///
    /// # Panics
    /// Panics if the frame stack is empty.
    pub fn pop_frame(&mut self, failed: bool) -> Frame {
        let Some(frame) = self.frames.pop() else {
            panic!("frame stack underflow");
        };
        if let Some(action) = &frame.action {
            if let Some(varlist) = action.varlist {
                self.expire_varlist(varlist, action.original);
            }
            if failed && action.dsp_orig <= self.data_stack.dsp() {
                self.data_stack.drop_to(action.dsp_orig);
            }
        }
        if failed {
            self.failed_frames.push(frame.serial);
        }
        frame
    }

    fn expire_varlist(&mut self, varlist: NodeId, paramlist: NodeId) {
        if let Some(node) = self.pool.get_mut(varlist) {
            node.flags.insert(NodeFlags::INACCESSIBLE);
            if let Some(cells) = node.cells_mut() {
                cells.truncate(1);
            }
            if let Subclass::Varlist { meta, .. } = node.subclass {
                node.subclass = Subclass::Varlist {
                    keysource: Keysource::Keylist(paramlist),
                    meta,
                };
            }
        }
    }

    pub fn frame_index(&self, serial: FrameSerial) -> Option<usize> {
        self.frames.iter().rposition(|f| f.serial == serial)
    }

    pub fn is_frame_live(&self, serial: FrameSerial) -> bool {
        self.frame_index(serial).is_some()
    }

    pub fn top_frame_serial(&self) -> Option<FrameSerial> {
        self.frames.last().map(|f| f.serial)
    }

    /// Next cell of a frame's feed without consuming it.
    pub fn feed_peek(&mut self, frame: usize) -> Option<Cell> {
        let feed = &mut self.frames[frame].feed;
        match &mut feed.source {
            FeedSource::Array(array) => self.pool.get(*array)?.cells().get(feed.index).copied(),
            FeedSource::Variadic(iter) => iter.peek().copied(),
            FeedSource::Empty => None,
        }
    }

    /// Consume the next cell of a frame's feed.
    pub fn feed_next(&mut self, frame: usize) -> Option<Cell> {
        let feed = &mut self.frames[frame].feed;
        match &mut feed.source {
            FeedSource::Array(array) => {
                let cell = self.pool.get(*array)?.cells().get(feed.index).copied()?;
                feed.index += 1;
                Some(cell)
            }
            FeedSource::Variadic(iter) => {
                let cell = iter.next()?;
                feed.index += 1;
                Some(cell)
            }
            FeedSource::Empty => None,
        }
    }

    pub fn feed_at_end(&mut self, frame: usize) -> bool {
        self.feed_peek(frame).is_none()
    }

    /// Materialize a variadic feed into a managed array so it can be
    /// walked like any other.
    pub fn reify_feed(&mut self, frame: usize) {
        if !self.frames[frame].feed.is_variadic() {
            return;
        }
        let source = std::mem::replace(&mut self.frames[frame].feed.source, FeedSource::Empty);
        let FeedSource::Variadic(iter) = source else {
            return;
        };
        let cells: Vec<Cell> = iter.collect();
        let array = self.make_managed_array(Subclass::Array, cells);
        let feed = &mut self.frames[frame].feed;
        feed.source = FeedSource::Array(array);
        feed.index = 0;
    }

    // =========================================================================
    // API handles
    // =========================================================================

    /// Allocate a handle holding `cell`, owned by the innermost frame (or by
    /// nobody when no frame is running).
    pub fn alloc_root(&mut self, cell: Cell) -> NodeId {
        let owner = self.top_frame_serial();
        self.alloc(
            Node::array(Subclass::ApiRoot { owner }, vec![cell])
                .with_flags(NodeFlags::MANAGED | NodeFlags::ROOT),
        )
    }

    /// Detach a handle from its frame so it outlives the call.
    pub fn unmanage_root_owner(&mut self, id: NodeId) {
        if let Subclass::ApiRoot { .. } = self.node(id).subclass {
            self.node_mut(id).subclass = Subclass::ApiRoot { owner: None };
        }
    }

    pub fn root_value(&self, id: NodeId) -> Option<Cell> {
        let node = self.pool.get(id)?;
        match node.subclass {
            Subclass::ApiRoot { .. } => node.cells().first().copied(),
            _ => None,
        }
    }

    /// Release a handle. Stale or non-handle ids are ignored and reported
    /// as `false`.
    pub fn release_root(&mut self, id: NodeId) -> bool {
        match self.pool.get(id).map(|n| n.subclass) {
            Some(Subclass::ApiRoot { .. }) => {
                self.pool.free(id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Kind;

    #[test]
    fn test_manual_nodes_free_and_stale() {
        let mut heap = Heap::default();
        let id = heap.make_array(Subclass::Array, vec![Cell::integer(1)]);
        assert!(!heap.is_managed(id));
        heap.free(id);
        assert!(!heap.contains(id));
        assert!(heap.try_node(id).is_none());
    }

    #[test]
    #[should_panic(expected = "explicit free of managed node")]
    fn test_free_managed_panics() {
        let mut heap = Heap::default();
        let id = heap.make_managed_array(Subclass::Array, vec![]);
        heap.free(id);
    }

    #[test]
    fn test_allocate_picks_width() {
        let mut heap = Heap::default();
        let bytes = heap.allocate(16, Subclass::Bytes, false);
        let cells = heap.allocate(4, Subclass::Array, true);
        assert_eq!(heap.node(bytes).width(), 1);
        assert!(heap.node(bytes).capacity() >= 16);
        assert!(heap.node(cells).is_array());
        assert!(heap.is_managed(cells));
        heap.manage(bytes);
        assert!(heap.is_managed(bytes));
    }

    #[test]
    fn test_fixed_size_refuses_append() {
        let mut heap = Heap::default();
        let id = heap.make_array(Subclass::Array, vec![Cell::blank()]);
        heap.node_mut(id).flags.insert(NodeFlags::FIXED_SIZE);
        assert_eq!(heap.append(id, Cell::blank()), Err(NodeError::FixedSize(id)));
        assert!(heap.set_cell(id, 0, Cell::integer(3)).is_ok());
        assert_eq!(heap.cell_at(id, 0).and_then(|c| c.as_integer()), Some(3));
        assert_eq!(heap.set_cell(id, 5, Cell::blank()), Err(NodeError::OutOfRange(id, 5)));
    }

    #[test]
    fn test_quotify_inline_and_escaped() {
        let mut heap = Heap::default();
        let spelling = heap.intern("x");
        let word = Cell::word(spelling);

        let once = heap.quotify(word, 1);
        assert_eq!(once.kind(), Kind::Quoted);
        assert_eq!(heap.quote_depth(&once), 1);

        let before = heap.allocations();
        let deep = heap.quotify(once, 4);
        assert_eq!(heap.allocations(), before + 1);
        assert_eq!(heap.quote_depth(&deep), 5);
        assert_eq!(heap.dequoted(&deep).word_spelling(), Some(spelling));

        // requoting an escaped cell reuses its node
        let deeper = heap.quotify(deep, 1);
        assert_eq!(heap.allocations(), before + 1);
        assert_eq!(heap.quote_depth(&deeper), 6);

        let back = heap.unquotify(deeper, 4);
        assert_eq!(heap.quote_depth(&back), 2);
        assert_eq!(back.raw_kind(), Kind::Word);
        assert_eq!(heap.unquotify(back, 2), word);
    }

    #[test]
    fn test_variadic_feed_reifies_remaining_cells() {
        let mut heap = Heap::default();
        let f = heap.push_frame(Feed::variadic(vec![
            Cell::integer(1),
            Cell::integer(2),
            Cell::integer(3),
        ]));
        assert_eq!(heap.feed_next(f).and_then(|c| c.as_integer()), Some(1));
        heap.reify_feed(f);
        assert!(!heap.frames[f].feed.is_variadic());
        assert_eq!(heap.feed_peek(f).and_then(|c| c.as_integer()), Some(2));
        assert_eq!(heap.feed_next(f).and_then(|c| c.as_integer()), Some(2));
        assert_eq!(heap.feed_next(f).and_then(|c| c.as_integer()), Some(3));
        assert!(heap.feed_at_end(f));
        heap.pop_frame(false);
    }

    #[test]
    fn test_root_handles() {
        let mut heap = Heap::default();
        let root = heap.alloc_root(Cell::integer(9));
        assert_eq!(heap.root_value(root).and_then(|c| c.as_integer()), Some(9));
        assert!(heap.release_root(root));
        assert!(!heap.release_root(root));
        assert_eq!(heap.root_value(root), None);
    }

    #[test]
    fn test_guard_stack_is_lifo() {
        let mut heap = Heap::default();
        heap.push_guard_cell(Cell::integer(1));
        let g = heap.make_string("g");
        heap.push_guard_node(g);
        assert_eq!(heap.guard_depth(), 2);
        heap.drop_guard();
        heap.drop_guard();
        assert_eq!(heap.guard_depth(), 0);
    }
}
