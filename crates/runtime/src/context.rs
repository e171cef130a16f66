//! Contexts, binding and variable lookup
//!
//! A context is a varlist whose `[0]` is its own archetype value, paired
//! with a key source:
//!
//! - objects and errors use a keylist (`[0]` blank, then one key per var)
//! - FRAME! values made by `make-frame` use the action's paramlist
//! - a reified running frame points back at the frame itself and gets its
//!   keys from the paramlist that frame is running
//!
//! Words carry a [`Binding`] and a 1-based slot index. Function bodies are
//! copied once at creation with their parameter words made *relative* to the
//! paramlist; evaluation supplies the running frame as the specifier that
//! turns them back into something that can be looked up.

use crate::error::{Condition, ErrorId, Unwind};
use crate::interp::Interpreter;
use ren_core::{Binding, Cell, Keysource, Kind, NodeId, Subclass};
use std::collections::{HashMap, HashSet};

/// Where a variable lives once its word is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarLoc {
    /// Slot of a context varlist.
    Context(NodeId, usize),
    /// Argument slot of a frame that has not been reified.
    FrameArg(usize, usize),
}

/// Give a cell read out of relative source the frame (or frame-shaped
/// context) it was read through.
pub(crate) fn derelativize(mut cell: Cell, specifier: Binding) -> Cell {
    if !matches!(specifier, Binding::Frame(_) | Binding::Context(_)) {
        return cell;
    }
    let kind = cell.raw_kind();
    if kind.is_any_word() {
        if let Binding::Relative(_) = cell.binding() {
            let index = cell.word_index();
            cell.bind_word(specifier, index);
        }
    } else if kind.is_any_array() && matches!(cell.binding(), Binding::Relative(_)) {
        cell.set_binding(specifier);
    }
    cell
}

impl Interpreter {
    // =========================================================================
    // Keys
    // =========================================================================

    /// Managed keylist with one default-typed key per spelling.
    pub(crate) fn make_keylist(&mut self, names: &[NodeId]) -> NodeId {
        let mut cells = Vec::with_capacity(names.len() + 1);
        cells.push(Cell::blank());
        cells.extend(names.iter().map(|n| Cell::key(*n, ren_core::kind::TS_VALUE)));
        self.heap
            .make_managed_array(Subclass::Keylist { ancestor: None }, cells)
    }

    /// New context of `kind` over `keylist` with every variable void.
    pub(crate) fn make_context(&mut self, kind: Kind, keylist: NodeId) -> NodeId {
        let count = self.heap.len(keylist).saturating_sub(1);
        let varlist = self.heap.make_managed_array(
            Subclass::Varlist {
                keysource: Keysource::Keylist(keylist),
                meta: None,
            },
            Vec::with_capacity(count + 1),
        );
        let cells = self.heap.node_mut(varlist).cells_mut();
        if let Some(cells) = cells {
            cells.push(Cell::context(kind, varlist));
            cells.resize(count + 1, Cell::void());
        }
        varlist
    }

    /// Array holding the keys of a varlist: a keylist or a paramlist.
    pub(crate) fn context_keys(&self, varlist: NodeId) -> Result<NodeId, Condition> {
        match self.heap.subclass(varlist) {
            Subclass::Varlist {
                keysource: Keysource::Keylist(keys),
                ..
            } => Ok(keys),
            Subclass::Varlist {
                keysource: Keysource::Frame(serial),
                ..
            } => self
                .heap
                .frame_index(serial)
                .and_then(|fi| self.heap.frames[fi].action.as_ref())
                .map(|a| a.original)
                .ok_or_else(|| Condition::new(ErrorId::ExpiredFrame, ["frame"])),
            other => Err(Condition::new(
                ErrorId::Internal,
                [format!("{} is not a varlist", other.name())],
            )),
        }
    }

    /// 1-based slot of `spelling` among `keys`, compared case-insensitively.
    pub(crate) fn find_key(&self, keys: NodeId, spelling: NodeId) -> Option<usize> {
        let canon = self.heap.canon(spelling);
        self.heap
            .cells(keys)
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, key)| {
                key.key_spelling()
                    .is_some_and(|s| self.heap.canon(s) == canon)
            })
            .map(|(i, _)| i)
    }

    /// Slot of `spelling` in the library context, adding a void variable
    /// when it is new.
    pub(crate) fn lib_slot(&mut self, spelling: NodeId) -> Result<usize, Condition> {
        if let Some(index) = self.find_key(self.lib_keys, spelling) {
            return Ok(index);
        }
        self.heap
            .append(self.lib_keys, Cell::key(spelling, ren_core::kind::TS_VALUE))?;
        self.heap.append(self.lib, Cell::void())?;
        Ok(self.heap.len(self.lib) - 1)
    }

    /// Set a library variable by name, creating it if needed.
    pub(crate) fn set_lib(&mut self, name: &str, value: Cell) -> Result<usize, Condition> {
        let spelling = self.heap.intern(name);
        let index = self.lib_slot(spelling)?;
        self.heap.set_cell(self.lib, index, value)?;
        Ok(index)
    }

    pub fn lib_value(&mut self, name: &str) -> Option<Cell> {
        let spelling = self.heap.intern(name);
        let index = self.find_key(self.lib_keys, spelling)?;
        self.heap.cell_at(self.lib, index)
    }

    /// A word bound into the library context.
    pub fn lib_word(&mut self, name: &str) -> Result<Cell, Condition> {
        let spelling = self.heap.intern(name);
        let index = self.lib_slot(spelling)?;
        let mut word = Cell::word(spelling);
        word.bind_word(Binding::Context(self.lib), index);
        Ok(word)
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Bind every word in `array` (and arrays nested in it) that names a key
    /// of `varlist`. With `expand`, unknown words become new variables
    /// first; only the library context is expandable.
    pub(crate) fn bind_deep(
        &mut self,
        array: NodeId,
        varlist: NodeId,
        expand: bool,
    ) -> Result<(), Condition> {
        let keys = self.context_keys(varlist)?;
        let mut seen = HashSet::new();
        let mut pending = vec![array];
        while let Some(node) = pending.pop() {
            if !seen.insert(node) {
                continue;
            }
            let len = self.heap.len(node);
            for i in 0..len {
                let Some(mut cell) = self.heap.cell_at(node, i) else {
                    break;
                };
                let kind = cell.raw_kind();
                if kind.is_any_word() {
                    let Some(spelling) = cell.word_spelling() else {
                        continue;
                    };
                    let index = match self.find_key(keys, spelling) {
                        Some(index) => index,
                        None if expand => self.lib_slot(spelling)?,
                        None => continue,
                    };
                    cell.bind_word(Binding::Context(varlist), index);
                    self.heap.set_cell(node, i, cell)?;
                } else if kind.is_any_array()
                    && let Some((inner, _)) = cell.series_at()
                {
                    pending.push(inner);
                }
            }
        }
        Ok(())
    }

    /// Deep copy of an array with words naming parameters of `paramlist`
    /// made relative to it. Cells are first derelativized through
    /// `specifier`, so a body written inside another running body keeps its
    /// outer references.
    pub(crate) fn copy_relativized(
        &mut self,
        source: NodeId,
        index: usize,
        specifier: Binding,
        paramlist: NodeId,
    ) -> NodeId {
        let mut params: HashMap<NodeId, usize> = HashMap::new();
        for (i, param) in self.heap.cells(paramlist).iter().enumerate().skip(1) {
            if let Some(s) = param.key_spelling() {
                params.entry(self.heap.canon(s)).or_insert(i);
            }
        }

        let head: Vec<Cell> = self
            .heap
            .cells(source)
            .get(index..)
            .unwrap_or_default()
            .to_vec();
        let root = self.heap.make_managed_array(Subclass::Array, Vec::new());
        let mut pending = vec![(head, root)];
        while let Some((cells, target)) = pending.pop() {
            let mut out = Vec::with_capacity(cells.len());
            for cell in cells {
                let mut cell = derelativize(cell, specifier);
                let kind = cell.raw_kind();
                if kind.is_any_word() {
                    if let Some(&i) = cell
                        .word_spelling()
                        .and_then(|s| params.get(&self.heap.canon(s)))
                    {
                        cell.bind_word(Binding::Relative(paramlist), i);
                    }
                } else if kind.is_any_array()
                    && let Some((inner, at)) = cell.series_at()
                {
                    let inner_cells = self.heap.cells(inner).to_vec();
                    let copy = self.heap.make_managed_array(Subclass::Array, Vec::new());
                    // The whole array is copied, so the index stays valid.
                    debug_assert!(at <= inner_cells.len());
                    cell.set_series_node(copy);
                    cell.set_binding(Binding::Relative(paramlist));
                    pending.push((inner_cells, copy));
                }
                out.push(cell);
            }
            if let Some(cells) = self.heap.node_mut(target).cells_mut() {
                *cells = out;
            }
        }
        root
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    fn word_name(&self, word: &Cell) -> String {
        word.word_spelling()
            .map_or_else(|| "?".to_string(), |s| self.heap.spelling(s).to_string())
    }

    /// Resolve a word (already derelativized) to its variable.
    pub(crate) fn resolve(&self, word: &Cell) -> Result<VarLoc, Condition> {
        let index = word.word_index();
        match word.binding() {
            Binding::Context(varlist) => {
                if !self.heap.is_accessible(varlist) {
                    return Err(Condition::new(
                        ErrorId::ExpiredFrame,
                        [self.word_name(word)],
                    ));
                }
                Ok(VarLoc::Context(varlist, index))
            }
            Binding::Frame(serial) => {
                let fi = self.heap.frame_index(serial).ok_or_else(|| {
                    Condition::new(ErrorId::ExpiredFrame, [self.word_name(word)])
                })?;
                match self.heap.frames[fi].action.as_ref().and_then(|a| a.varlist) {
                    Some(varlist) => Ok(VarLoc::Context(varlist, index)),
                    None => Ok(VarLoc::FrameArg(fi, index)),
                }
            }
            Binding::Relative(_) | Binding::Unbound => {
                Err(Condition::new(ErrorId::NotBound, [self.word_name(word)]))
            }
        }
    }

    pub(crate) fn read_var(&self, loc: VarLoc) -> Cell {
        match loc {
            VarLoc::Context(varlist, index) => {
                self.heap.cell_at(varlist, index).unwrap_or_else(Cell::void)
            }
            VarLoc::FrameArg(fi, index) => self.heap.frames[fi]
                .action
                .as_ref()
                .and_then(|a| a.args.get(index.wrapping_sub(1)).copied())
                .unwrap_or_else(Cell::void),
        }
    }

    pub(crate) fn write_var(&mut self, loc: VarLoc, value: Cell) -> Result<(), Condition> {
        match loc {
            VarLoc::Context(varlist, index) => Ok(self.heap.set_cell(varlist, index, value)?),
            VarLoc::FrameArg(fi, index) => {
                let slot = self.heap.frames[fi]
                    .action
                    .as_mut()
                    .and_then(|a| a.args.get_mut(index.wrapping_sub(1)));
                match slot {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(Condition::new(
                        ErrorId::Internal,
                        [format!("frame argument {index} is not fulfilled")],
                    )),
                }
            }
        }
    }

    /// Value of a word, void allowed.
    pub(crate) fn get_var(&self, word: &Cell) -> Result<Cell, Unwind> {
        let loc = self.resolve(word)?;
        Ok(self.read_var(loc))
    }

    pub(crate) fn set_var(&mut self, word: &Cell, value: Cell) -> Result<(), Unwind> {
        let loc = self.resolve(word)?;
        Ok(self.write_var(loc, value)?)
    }

    // =========================================================================
    // Running frames as contexts
    // =========================================================================

    /// Argument `n` (1-based) of the action running in frame `fi`.
    pub(crate) fn frame_arg(&self, fi: usize, n: usize) -> Cell {
        let Some(action) = self.heap.frames[fi].action.as_ref() else {
            return Cell::void();
        };
        match action.varlist {
            Some(varlist) => self.heap.cell_at(varlist, n).unwrap_or_else(Cell::void),
            None => action.args.get(n - 1).copied().unwrap_or_else(Cell::void),
        }
    }

    pub(crate) fn set_frame_arg(&mut self, fi: usize, n: usize, value: Cell) -> Result<(), Condition> {
        let varlist = self.heap.frames[fi].action.as_ref().and_then(|a| a.varlist);
        match varlist {
            Some(v) => self.write_var(VarLoc::Context(v, n), value),
            None => self.write_var(VarLoc::FrameArg(fi, n), value),
        }
    }

    /// All arguments of frame `fi`, wherever they currently live.
    pub(crate) fn frame_args(&self, fi: usize) -> Vec<Cell> {
        let Some(action) = self.heap.frames[fi].action.as_ref() else {
            return Vec::new();
        };
        match action.varlist {
            Some(varlist) => self.heap.cells(varlist).get(1..).unwrap_or_default().to_vec(),
            None => action.args.clone(),
        }
    }

    /// FRAME! value for a running action, moving its arguments into a
    /// varlist on first request. The varlist goes inaccessible when the
    /// call ends.
    pub(crate) fn reify_frame(&mut self, fi: usize) -> Result<Cell, Condition> {
        let serial = self.heap.frames[fi].serial;
        let Some(action) = self.heap.frames[fi].action.as_mut() else {
            return Err(Condition::new(
                ErrorId::Internal,
                ["frame is not running an action"],
            ));
        };
        if let Some(varlist) = action.varlist {
            return Ok(self.heap.cell_at(varlist, 0).unwrap_or_else(Cell::void));
        }
        let args = std::mem::take(&mut action.args);
        let (phase, binding) = (action.phase, action.binding);
        let varlist = self.heap.make_managed_array(
            Subclass::Varlist {
                keysource: Keysource::Frame(serial),
                meta: None,
            },
            Vec::with_capacity(args.len() + 1),
        );
        let archetype = Cell::frame(varlist, phase, binding);
        if let Some(cells) = self.heap.node_mut(varlist).cells_mut() {
            cells.push(archetype);
            cells.extend(args);
        }
        if let Some(action) = self.heap.frames[fi].action.as_mut() {
            action.varlist = Some(varlist);
        }
        tracing::trace!(frame = serial.0, "reified frame");
        Ok(archetype)
    }
}
