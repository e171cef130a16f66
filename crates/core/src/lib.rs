//! Ren Core: cells, heap nodes and the collector
//!
//! This crate provides the evaluator-agnostic half of the runtime: how a
//! value is laid out, where the things it points at live, and how they are
//! reclaimed.
//!
//! # Modules
//!
//! - `kind`: value kinds, parameter classes and typeset bits
//! - `cell`: the fixed-size tagged value
//! - `node`: node handles, flags and subclasses
//! - `pool`: generation-checked node arena
//! - `symbol`: interned spellings with case-insensitive synonym groups
//! - `data_stack`: scratch cell stack shared by evaluation
//! - `frame`: call-frame records and input feeds
//! - `heap`: allocation, guards, quoting, frames and API handles
//! - `gc`: the iterative mark-and-sweep collector
//! - `memory_stats`: cross-thread statistics registry

pub mod cell;
pub mod data_stack;
pub mod frame;
pub mod gc;
pub mod heap;
pub mod kind;
pub mod memory_stats;
pub mod node;
pub mod pool;
pub mod symbol;

pub use cell::{Binding, Cell, CellFlags, Extra, INLINE_QUOTE_MAX, Payload};
pub use data_stack::DataStack;
pub use frame::{ActionState, Feed, FeedSource, Frame};
pub use gc::{GcReport, GcStats};
pub use heap::{Guard, Heap, HeapConfig, LeakPolicy, NodeError};
pub use kind::{Kind, ParamClass};
pub use memory_stats::{AggregateHeapStats, heap_registry};
pub use node::{
    ActionFlags, Content, DispatcherId, FrameSerial, Keysource, Node, NodeFlags, NodeId, Subclass,
};
pub use symbol::SymbolTableStats;
