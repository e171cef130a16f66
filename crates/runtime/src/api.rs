//! Host-facing handles and evaluation helpers
//!
//! A [`ValueHandle`] keeps one cell alive across collections. Handles made
//! while an action runs belong to that call: when it ends with an error they
//! are freed quietly, and when it ends normally without releasing them they
//! count as leaks under the configured [`LeakPolicy`](ren_core::LeakPolicy).
//! [`Interpreter::keep`] detaches a handle so it lives until released.

use crate::error::{Condition, ErrorId};
use crate::interp::Interpreter;
use crate::load::scan;
use ren_core::{Cell, GcReport, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueHandle(NodeId);

impl ValueHandle {
    pub const fn to_raw(self) -> u64 {
        self.0.to_raw()
    }

    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NodeId::from_raw(raw) {
            Some(id) => Some(ValueHandle(id)),
            None => None,
        }
    }
}

/// One piece of a host evaluation: source text or a value already held.
#[derive(Debug, Clone, Copy)]
pub enum Part<'a> {
    Text(&'a str),
    Value(Cell),
    Handle(ValueHandle),
}

impl Interpreter {
    pub fn alloc_value(&mut self, cell: Cell) -> ValueHandle {
        ValueHandle(self.heap.alloc_root(cell))
    }

    /// Value a handle holds; `None` once released or collected.
    pub fn value(&self, handle: ValueHandle) -> Option<Cell> {
        self.heap.root_value(handle.0)
    }

    /// Release a handle. `false` if it was already gone.
    pub fn release(&mut self, handle: ValueHandle) -> bool {
        self.heap.release_root(handle.0)
    }

    /// Let a handle outlive the call that made it.
    pub fn keep(&mut self, handle: ValueHandle) {
        self.heap.unmanage_root_owner(handle.0);
    }

    /// Evaluate a mix of source text and values as one expression stream.
    /// Values are spliced in as-is, so an action value is called.
    pub fn eval_parts(&mut self, parts: &[Part<'_>]) -> Result<Cell, Condition> {
        let mut cells = Vec::new();
        for part in parts {
            match part {
                Part::Text(text) => {
                    let block = self.load(text)?;
                    cells.extend_from_slice(self.heap.cells(block));
                }
                Part::Value(cell) => cells.push(*cell),
                Part::Handle(handle) => {
                    let cell = self
                        .value(*handle)
                        .ok_or_else(|| Condition::new(ErrorId::InvalidArg, ["released handle"]))?;
                    cells.push(cell);
                }
            }
        }
        self.eval_cells(cells)
    }

    /// Scan `text` without binding it.
    pub fn scan_text(&mut self, text: &str) -> Result<Cell, Condition> {
        Ok(Cell::block(scan(&mut self.heap, text)?))
    }

    pub fn recycle(&mut self) -> Option<GcReport> {
        self.heap.recycle()
    }

    /// Nodes the next collection would free, without freeing them.
    pub fn sweeplist(&mut self) -> Vec<NodeId> {
        self.heap.sweeplist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn interp() -> Interpreter {
        Interpreter::new(RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn test_handle_survives_collection() {
        let mut it = interp();
        let block = it.eval_text("[1 2 3]").unwrap();
        let handle = it.alloc_value(block);
        it.recycle();
        let held = it.value(handle).unwrap();
        assert_eq!(it.mold(&held), "[1 2 3]");
        assert!(it.release(handle));
        assert!(!it.release(handle));
        assert!(it.value(handle).is_none());
        it.shutdown();
    }

    #[test]
    fn test_raw_round_trip() {
        let mut it = interp();
        let handle = it.alloc_value(Cell::integer(7));
        let raw = handle.to_raw();
        assert_eq!(ValueHandle::from_raw(raw), Some(handle));
        it.release(handle);
        it.shutdown();
    }

    #[test]
    fn test_eval_parts_splices_values() {
        let mut it = interp();
        let add = it.lib_value("add").unwrap();
        let ten = it.alloc_value(Cell::integer(10));
        let result = it
            .eval_parts(&[Part::Value(add), Part::Handle(ten), Part::Text("5")])
            .unwrap();
        assert_eq!(result.as_integer(), Some(15));
        it.release(ten);
        it.shutdown();
    }

    #[test]
    fn test_unreleased_handle_reported_at_shutdown() {
        let mut it = interp();
        let _ = it.alloc_value(Cell::integer(1));
        let report = it.shutdown();
        assert_eq!(report.leaked_roots, 1);
    }
}
