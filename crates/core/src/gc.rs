//! Mark-and-sweep collector
//!
//! A cycle runs in four phases:
//!
//! 1. Reify: variadic feeds of live frames are captured into arrays.
//! 2. Roots: API handles, unmanaged arrays under construction, pinned nodes,
//!    pinned spellings, the data stack, guards and every live frame.
//! 3. Propagate: an explicit mark stack is drained until empty. A node's
//!    mark bit is set when it is queued, so cycles and shared structure
//!    queue once and nesting depth never touches the native stack.
//! 4. Sweep: every managed, unmarked node is freed; marks are cleared.
//!
//! Collection is requested by the allocation ballast running out (the
//! request is honored at the next safe point) or explicitly. While disabled
//! a request only sets a pending flag, raised again on re-enable.

use crate::cell::{Binding, Cell};
use crate::frame::FeedSource;
use crate::heap::{Guard, Heap, LeakPolicy};
use crate::memory_stats;
use crate::node::{FrameSerial, Keysource, NodeFlags, NodeId, Subclass};

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Nodes marked reachable.
    pub marked: usize,
    /// Nodes freed (or, for a sweeplist, that would have been).
    pub swept: usize,
    /// Handles freed because their frame ended in an error.
    pub failed_roots: usize,
    /// Handles whose frame ended normally without releasing them.
    pub leaked_roots: usize,
    /// Deepest the mark stack got.
    pub mark_stack_peak: usize,
    /// Nodes alive after the sweep.
    pub live_after: usize,
}

/// Lifetime collector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub cycles: u64,
    pub swept: u64,
    pub leaked_roots: u64,
    pub deferred: u64,
}

#[derive(Debug)]
pub(crate) struct GcState {
    /// Nesting depth of disable requests.
    disabled: u32,
    /// Collection requested while disabled.
    pending: bool,
    /// Collection should run at the next safe point.
    signaled: bool,
    recycling: bool,
    ballast: isize,
    ballast_reset: isize,
    mark_stack: Vec<NodeId>,
    stats: GcStats,
    last: Option<GcReport>,
}

impl GcState {
    pub(crate) fn new(ballast: usize) -> Self {
        let ballast = ballast.min(isize::MAX as usize) as isize;
        GcState {
            disabled: 0,
            pending: false,
            signaled: false,
            recycling: false,
            ballast,
            ballast_reset: ballast,
            mark_stack: Vec::new(),
            stats: GcStats::default(),
            last: None,
        }
    }

    /// Deduct an allocation from the ballast; signal once it runs out.
    #[inline]
    pub(crate) fn charge(&mut self, bytes: isize) {
        self.ballast -= bytes;
        if self.ballast <= 0 {
            self.signaled = true;
        }
    }
}

enum Mode {
    Collect,
    Sweeplist(Vec<NodeId>),
    Shutdown,
}

impl Heap {
    // =========================================================================
    // Control
    // =========================================================================

    /// Suppress collection until the matching [`Heap::enable_gc`].
    pub fn disable_gc(&mut self) {
        self.gc.disabled += 1;
    }

    /// Undo one [`Heap::disable_gc`]. A request made while disabled becomes
    /// a signal honored at the next safe point.
    pub fn enable_gc(&mut self) {
        debug_assert!(self.gc.disabled > 0, "enable_gc without disable_gc");
        self.gc.disabled = self.gc.disabled.saturating_sub(1);
        if self.gc.disabled == 0 && self.gc.pending {
            self.gc.pending = false;
            self.gc.signaled = true;
        }
    }

    pub fn gc_disabled(&self) -> bool {
        self.gc.disabled > 0
    }

    pub fn gc_pending(&self) -> bool {
        self.gc.pending
    }

    pub fn gc_signaled(&self) -> bool {
        self.gc.signaled
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc.stats
    }

    pub fn last_gc_report(&self) -> Option<GcReport> {
        self.gc.last
    }

    /// Bytes left before the next automatic collection is signaled.
    pub fn ballast_remaining(&self) -> isize {
        self.gc.ballast
    }

    /// Collect now. `None` when collection is disabled or already running;
    /// the request is then remembered.
    pub fn recycle(&mut self) -> Option<GcReport> {
        if self.gc.recycling {
            tracing::warn!("recycle requested during a collection; deferred");
            self.gc.stats.deferred += 1;
            self.gc.pending = true;
            return None;
        }
        if self.gc_disabled() {
            self.gc.pending = true;
            self.gc.stats.deferred += 1;
            return None;
        }
        Some(self.recycle_core(Mode::Collect).0)
    }

    /// Safe point: collect if the ballast ran out or a request is waiting.
    pub fn recycle_if_signaled(&mut self) -> Option<GcReport> {
        if !self.gc.signaled {
            return None;
        }
        if self.gc_disabled() {
            self.gc.pending = true;
            return None;
        }
        self.recycle()
    }

    /// Everything a collection would free right now. Nothing is freed and
    /// all marks are cleared afterwards.
    pub fn sweeplist(&mut self) -> Vec<NodeId> {
        let (_, list) = self.recycle_core(Mode::Sweeplist(Vec::new()));
        list
    }

    /// Drop every root and sweep the whole heap.
    ///
    /// Frames, guards, pins and the data stack are cleared first, so every
    /// managed node goes. Surviving handles are leaks. Manual nodes still
    /// allocated afterwards are reported.
    pub fn shutdown(&mut self) -> GcReport {
        while !self.frames.is_empty() {
            self.pop_frame(false);
        }
        self.guards.clear();
        self.pinned.clear();
        self.symbols.unpin_all();
        self.data_stack.drop_to(0);
        self.gc.disabled = 0;

        let (report, _) = self.recycle_core(Mode::Shutdown);

        let canons = self.symbols.num_canons();
        if canons > 0 {
            tracing::warn!(canons, "spellings survived the shutdown sweep");
        }
        let manual = self.pool.live();
        if manual > 0 {
            tracing::warn!(nodes = manual, "manual nodes never freed");
        }
        tracing::info!(
            cycles = self.gc.stats.cycles,
            swept = report.swept,
            leaked_roots = self.gc.stats.leaked_roots,
            "heap shut down"
        );
        report
    }

    // =========================================================================
    // The cycle
    // =========================================================================

    fn recycle_core(&mut self, mode: Mode) -> (GcReport, Vec<NodeId>) {
        assert!(!self.gc.recycling, "recursive collection");
        self.gc.recycling = true;
        let mut report = GcReport::default();
        let shutdown = matches!(mode, Mode::Shutdown);

        for index in 0..self.frames.len() {
            self.reify_feed(index);
        }

        self.mark_root_handles(shutdown, &mut report);
        if !shutdown {
            self.mark_manual_arrays();
            self.mark_fixed_roots();
            self.mark_frames();
        }
        self.propagate(&mut report);

        if self.config.verify_marks {
            self.verify_marks();
        }

        let list = self.sweep(mode, &mut report);

        self.failed_frames.clear();
        self.gc.ballast = self.gc.ballast_reset;
        self.gc.signaled = false;
        self.gc.pending = false;
        report.live_after = self.pool.live();
        self.gc.stats.cycles += 1;
        self.gc.stats.swept += report.swept as u64;
        self.gc.stats.leaked_roots += report.leaked_roots as u64;
        self.gc.last = Some(report);
        self.gc.recycling = false;

        memory_stats::record_collection(report.swept, report.leaked_roots);
        let counters = self.pool.counters();
        memory_stats::update_node_stats(counters.live, counters.allocations);
        tracing::debug!(
            marked = report.marked,
            swept = report.swept,
            live = report.live_after,
            mark_stack_peak = report.mark_stack_peak,
            "gc cycle"
        );
        (report, list)
    }

    /// Queue a node. Returns without queueing when it is already marked or
    /// not managed.
    ///
    /// # Panics
    /// Panics on a stale handle, and on an unmanaged node reached from
    /// managed content when mark verification is on.
    fn queue_node(&mut self, id: NodeId, from_managed: bool) {
        let verify = self.config.verify_marks;
        let Some(node) = self.pool.get_mut(id) else {
            panic!("collector reached stale node {id}");
        };
        if !node.is_managed() {
            if from_managed
                && verify
                && !node.flags.intersects(NodeFlags::ROOT | NodeFlags::STACK)
            {
                panic!(
                    "collector reached unmanaged {} node {id} from managed content",
                    node.subclass.name()
                );
            }
            return;
        }
        if node.flags.contains(NodeFlags::MARKED) {
            return;
        }
        node.flags.insert(NodeFlags::MARKED);
        self.gc.mark_stack.push(id);
    }

    fn queue_cell(&mut self, cell: &Cell, from_managed: bool) {
        for id in cell.referenced_nodes().into_iter().flatten() {
            self.queue_node(id, from_managed);
        }
    }

    fn queue_binding(&mut self, binding: Binding) {
        if let Binding::Context(id) | Binding::Relative(id) = binding {
            self.queue_node(id, false);
        }
    }

    fn mark_root_handles(&mut self, shutdown: bool, report: &mut GcReport) {
        let roots: Vec<(NodeId, Option<FrameSerial>)> = self
            .pool
            .ids()
            .filter_map(|id| match self.pool.get(id).map(|n| n.subclass) {
                Some(Subclass::ApiRoot { owner }) => Some((id, owner)),
                _ => None,
            })
            .collect();

        for (id, owner) in roots {
            let alive = match owner {
                Some(serial) => !shutdown && self.is_frame_live(serial),
                None => !shutdown,
            };
            if alive {
                self.queue_node(id, false);
                continue;
            }
            if owner.is_some_and(|s| self.failed_frames.contains(&s)) {
                self.pool.free(id);
                report.failed_roots += 1;
                continue;
            }
            match self.config.leak_policy {
                LeakPolicy::Panic => panic!("API handle {id} leaked by its frame"),
                LeakPolicy::Report => {
                    tracing::warn!(handle = %id, "API handle leaked; freeing");
                    self.pool.free(id);
                    report.leaked_roots += 1;
                }
            }
        }
    }

    /// Manual arrays are still being built; what they hold must survive.
    fn mark_manual_arrays(&mut self) {
        let manual: Vec<NodeId> = self
            .pool
            .ids()
            .filter(|id| {
                self.pool
                    .get(*id)
                    .is_some_and(|n| !n.is_managed() && n.is_array())
            })
            .collect();
        for id in manual {
            self.queue_contents(id, false);
        }
    }

    fn mark_fixed_roots(&mut self) {
        for i in 0..self.pinned.len() {
            let id = self.pinned[i];
            self.queue_node(id, false);
        }
        for i in 0..self.symbols.pinned().len() {
            let id = self.symbols.pinned()[i];
            self.queue_node(id, false);
        }
        for i in 1..=self.data_stack.dsp() {
            if let Some(cell) = self.data_stack.at(i).copied() {
                self.queue_cell(&cell, false);
            }
        }
        for i in 0..self.guards.len() {
            match self.guards[i] {
                Guard::Node(id) => {
                    self.queue_node(id, false);
                    self.queue_contents(id, false);
                }
                Guard::Cell(cell) => self.queue_cell(&cell, false),
            }
        }
    }

    /// Arguments are marked only up to fulfillment progress; unfilled slots
    /// do not exist yet.
    fn mark_frames(&mut self) {
        for f in 0..self.frames.len() {
            let out = self.frames[f].out;
            let spare = self.frames[f].spare;
            self.queue_cell(&out, false);
            self.queue_cell(&spare, false);
            if let FeedSource::Array(array) = self.frames[f].feed.source {
                self.queue_node(array, false);
            }
            let specifier = self.frames[f].feed.specifier;
            self.queue_binding(specifier);

            let Some(action) = self.frames[f].action.as_ref() else {
                continue;
            };
            let nodes = [
                Some(action.original),
                Some(action.phase),
                action.label,
                action.special,
                action.varlist,
            ];
            let binding = action.binding;
            let progress = action.args.len();
            for id in nodes.into_iter().flatten() {
                self.queue_node(id, false);
            }
            self.queue_binding(binding);
            for i in 0..progress {
                let arg = self.frames[f]
                    .action
                    .as_ref()
                    .and_then(|a| a.args.get(i).copied());
                if let Some(arg) = arg {
                    self.queue_cell(&arg, false);
                }
            }
        }
    }

    fn queue_contents(&mut self, id: NodeId, from_managed: bool) {
        let len = self.pool.get(id).map_or(0, |n| n.cells().len());
        for i in 0..len {
            let cell = self.pool.get(id).and_then(|n| n.cells().get(i).copied());
            if let Some(cell) = cell {
                self.queue_cell(&cell, from_managed);
            }
        }
    }

    fn propagate(&mut self, report: &mut GcReport) {
        while let Some(id) = self.gc.mark_stack.pop() {
            report.marked += 1;
            let (subclass, inaccessible) = match self.pool.get(id) {
                Some(node) => {
                    debug_assert!(node.flags.contains(NodeFlags::MARKED));
                    (node.subclass, node.flags.contains(NodeFlags::INACCESSIBLE))
                }
                None => panic!("queued node {id} vanished"),
            };

            match subclass {
                Subclass::Keylist { ancestor } => {
                    if let Some(a) = ancestor {
                        self.queue_node(a, true);
                    }
                }
                Subclass::Varlist { keysource, meta } => {
                    if let Keysource::Keylist(k) = keysource {
                        self.queue_node(k, true);
                    }
                    if let Some(m) = meta {
                        self.queue_node(m, true);
                    }
                }
                Subclass::Paramlist {
                    underlying,
                    facade,
                    meta,
                    ..
                } => {
                    self.queue_node(underlying, true);
                    self.queue_node(facade, true);
                    if let Some(m) = meta {
                        self.queue_node(m, true);
                    }
                }
                Subclass::Details { exemplar, .. } => {
                    if let Some(e) = exemplar {
                        self.queue_node(e, true);
                    }
                }
                Subclass::Pairlist { hashlist } => {
                    if let Some(h) = hashlist {
                        self.queue_node(h, true);
                    }
                }
                Subclass::Array
                | Subclass::Bytes
                | Subclass::Symbol { .. }
                | Subclass::Pairing
                | Subclass::ApiRoot { .. } => {}
            }

            if inaccessible {
                continue;
            }
            let len = self.pool.get(id).map_or(0, |n| n.cells().len());
            for i in 0..len {
                let cell = self.pool.get(id).and_then(|n| n.cells().get(i).copied());
                if let Some(cell) = cell {
                    self.queue_cell(&cell, true);
                }
            }
            if self.gc.mark_stack.len() > report.mark_stack_peak {
                report.mark_stack_peak = self.gc.mark_stack.len();
            }
        }
    }

    /// Every managed node referenced from a marked node must itself be
    /// marked before anything is swept.
    fn verify_marks(&self) {
        for id in self.pool.ids() {
            let Some(node) = self.pool.get(id) else {
                continue;
            };
            if !node.flags.contains(NodeFlags::MARKED)
                || node.flags.contains(NodeFlags::INACCESSIBLE)
            {
                continue;
            }
            for cell in node.cells() {
                for r in cell.referenced_nodes().into_iter().flatten() {
                    let Some(target) = self.pool.get(r) else {
                        panic!("marked node {id} references stale node {r}");
                    };
                    if target.is_managed() && !target.flags.contains(NodeFlags::MARKED) {
                        panic!("marked node {id} references unmarked node {r}");
                    }
                }
            }
        }
    }

    fn sweep(&mut self, mode: Mode, report: &mut GcReport) -> Vec<NodeId> {
        let mut list = match mode {
            Mode::Sweeplist(list) => Some(list),
            _ => None,
        };

        for index in 0..self.pool.slot_count() {
            let Some(id) = self.pool.id_at(index) else {
                continue;
            };
            let (flags, subclass) = match self.pool.get(id) {
                Some(node) => (node.flags, node.subclass),
                None => continue,
            };

            if flags.contains(NodeFlags::MARKED) {
                if !flags.contains(NodeFlags::MANAGED) {
                    panic!("marked node {id} is not managed");
                }
                if let Some(node) = self.pool.get_mut(id) {
                    node.flags.remove(NodeFlags::MARKED);
                }
                continue;
            }
            if !flags.contains(NodeFlags::MANAGED) {
                continue;
            }

            report.swept += 1;
            match list.as_mut() {
                Some(list) => list.push(id),
                None => {
                    if matches!(subclass, Subclass::Symbol { .. }) {
                        self.kill_interning(id);
                    }
                    self.pool.free(id);
                }
            }
        }
        list.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use crate::kind::Kind;

    fn heap() -> Heap {
        Heap::new(HeapConfig {
            verify_marks: true,
            ..HeapConfig::default()
        })
    }

    #[test]
    fn test_unreachable_managed_nodes_are_swept() {
        let mut heap = heap();
        let kept = heap.make_managed_array(Subclass::Array, vec![Cell::integer(1)]);
        let lost = heap.make_managed_array(Subclass::Array, vec![Cell::integer(2)]);
        let manual = heap.make_array(Subclass::Array, vec![]);
        heap.pin(kept);

        let report = heap.recycle().unwrap();
        assert_eq!(report.swept, 1);
        assert!(heap.contains(kept));
        assert!(!heap.contains(lost));
        assert!(heap.contains(manual));
        assert!(!heap.node(kept).flags.contains(NodeFlags::MARKED));
    }

    #[test]
    fn test_manual_array_contents_survive() {
        let mut heap = heap();
        let inner = heap.make_managed_array(Subclass::Array, vec![]);
        let building = heap.make_array(Subclass::Array, vec![Cell::block(inner)]);
        heap.recycle();
        assert!(heap.contains(inner));
        heap.free(building);
        heap.recycle();
        assert!(!heap.contains(inner));
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = heap();
        let a = heap.make_managed_array(Subclass::Array, vec![]);
        let b = heap.make_managed_array(Subclass::Array, vec![Cell::block(a)]);
        heap.append(a, Cell::block(b)).unwrap();
        heap.push_guard_node(a);
        heap.recycle();
        assert!(heap.contains(a) && heap.contains(b));
        heap.drop_guard();
        let report = heap.recycle().unwrap();
        assert_eq!(report.swept, 2);
    }

    #[test]
    fn test_disabled_gc_sets_pending() {
        let mut heap = heap();
        heap.make_managed_array(Subclass::Array, vec![]);
        heap.disable_gc();
        assert!(heap.recycle().is_none());
        assert!(heap.gc_pending());
        assert_eq!(heap.live_nodes(), 1);

        heap.enable_gc();
        assert!(!heap.gc_pending());
        assert!(heap.gc_signaled());
        let report = heap.recycle_if_signaled().unwrap();
        assert_eq!(report.swept, 1);
        assert!(!heap.gc_signaled());
        assert!(heap.recycle_if_signaled().is_none());
    }

    #[test]
    fn test_ballast_signals_and_resets() {
        let mut heap = Heap::new(HeapConfig {
            ballast: 1,
            ..HeapConfig::default()
        });
        assert!(!heap.gc_signaled());
        heap.make_managed_array(Subclass::Array, vec![]);
        assert!(heap.gc_signaled());
        heap.recycle_if_signaled().unwrap();
        assert_eq!(heap.ballast_remaining(), 1);
    }

    #[test]
    fn test_sweeplist_frees_nothing() {
        let mut heap = heap();
        let lost = heap.make_managed_array(Subclass::Array, vec![]);
        let kept = heap.make_managed_array(Subclass::Array, vec![]);
        heap.push_guard_node(kept);
        assert_eq!(heap.sweeplist(), vec![lost]);
        assert!(heap.contains(lost));
        assert!(!heap.node(kept).flags.contains(NodeFlags::MARKED));
        heap.drop_guard();
    }

    #[test]
    fn test_symbols_are_collected_and_uninterned() {
        let mut heap = heap();
        let keep = heap.intern("keep");
        let word = Cell::word(keep);
        heap.intern("drop");
        heap.intern("DROP");
        heap.push_guard_cell(word);
        heap.recycle();
        heap.drop_guard();

        let stats = heap.symbol_stats();
        assert_eq!(stats.canons, 1);
        assert_eq!(heap.spelling(keep), "keep");
        assert_eq!(heap.intern("keep"), keep);
    }

    #[test]
    fn test_frame_args_marked_up_to_progress() {
        use crate::frame::{ActionState, Feed};

        let mut heap = heap();
        let paramlist = heap.make_managed_array(Subclass::Array, vec![]);
        let arg = heap.make_managed_array(Subclass::Array, vec![]);
        let f = heap.push_frame(Feed::empty());
        let mut state = ActionState::new(paramlist, Binding::Unbound, None, 0);
        state.args.push(Cell::block(arg));
        heap.frames[f].action = Some(state);

        heap.recycle();
        assert!(heap.contains(arg));
        assert!(heap.contains(paramlist));
        heap.pop_frame(false);
        heap.recycle();
        assert!(!heap.contains(arg));
    }

    #[test]
    fn test_handle_of_failed_frame_is_freed_silently() {
        use crate::frame::Feed;

        let mut heap = heap();
        heap.push_frame(Feed::empty());
        let handle = heap.alloc_root(Cell::integer(1));
        heap.recycle();
        assert!(heap.contains(handle));

        heap.pop_frame(true);
        let report = heap.recycle().unwrap();
        assert!(!heap.contains(handle));
        assert_eq!(report.failed_roots, 1);
        assert_eq!(report.leaked_roots, 0);
    }

    #[test]
    fn test_leaked_handle_is_reported_and_freed() {
        use crate::frame::Feed;

        let mut heap = heap();
        heap.push_frame(Feed::empty());
        let handle = heap.alloc_root(Cell::integer(1));
        heap.pop_frame(false);
        let report = heap.recycle().unwrap();
        assert!(!heap.contains(handle));
        assert_eq!(report.leaked_roots, 1);
        assert_eq!(heap.gc_stats().leaked_roots, 1);
    }

    #[test]
    #[should_panic(expected = "leaked by its frame")]
    fn test_leak_policy_panic() {
        use crate::frame::Feed;

        let mut heap = Heap::new(HeapConfig {
            leak_policy: LeakPolicy::Panic,
            ..HeapConfig::default()
        });
        heap.push_frame(Feed::empty());
        heap.alloc_root(Cell::integer(1));
        heap.pop_frame(false);
        heap.recycle();
    }

    #[test]
    fn test_unowned_handle_survives_until_shutdown() {
        let mut heap = heap();
        let handle = heap.alloc_root(Cell::integer(1));
        heap.recycle();
        assert!(heap.contains(handle));
        let report = heap.shutdown();
        assert_eq!(report.leaked_roots, 1);
        assert_eq!(heap.live_nodes(), 0);
    }

    #[test]
    fn test_inaccessible_varlist_content_is_not_walked() {
        let mut heap = heap();
        let inner = heap.make_managed_array(Subclass::Array, vec![]);
        let keylist = heap.make_managed_array(Subclass::Keylist { ancestor: None }, vec![]);
        let varlist = heap.make_managed_array(
            Subclass::Varlist {
                keysource: Keysource::Keylist(keylist),
                meta: None,
            },
            vec![Cell::blank(), Cell::block(inner)],
        );
        heap.node_mut(varlist).flags.insert(NodeFlags::INACCESSIBLE);
        heap.push_guard_node(varlist);
        heap.recycle();
        assert!(heap.contains(keylist));
        assert!(!heap.contains(inner));
        heap.drop_guard();
    }

    #[test]
    fn test_escape_nodes_follow_their_cell() {
        let mut heap = heap();
        let deep = heap.quotify(Cell::integer(7), 5);
        assert_eq!(deep.kind(), Kind::Quoted);
        heap.push_guard_cell(deep);
        heap.recycle();
        assert_eq!(heap.dequoted(&deep).as_integer(), Some(7));
        heap.drop_guard();
        assert_eq!(heap.recycle().map(|r| r.swept), Some(1));
    }
}
