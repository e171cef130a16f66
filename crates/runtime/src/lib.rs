//! Ren Runtime: actions, the evaluator and the host surface
//!
//! Builds on `ren-core`'s cells and heap:
//! - `typeset`, `context`, `paramlist`: type bits, binding and spec parsing
//! - `action`, `dispatch`, `combinators`: making and running actions,
//!   including ADAPT, SPECIALIZE, CHAIN, ENCLOSE and HIJACK
//! - `eval`, `path`, `natives`: the evaluator and its built-in actions
//! - `api`, `capi`: handles for Rust hosts and the C-callable surface
//! - `config`, `error`, `diagnostics`, `report`: the ambient runtime stack

pub mod action;
pub mod api;
pub mod capi;
pub mod combinators;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod eval;
pub mod interp;
pub mod load;
pub mod mold;
pub mod natives;
pub mod paramlist;
pub mod path;
#[cfg(feature = "diagnostics")]
pub mod report;
#[cfg(not(feature = "diagnostics"))]
#[path = "report_stub.rs"]
pub mod report;
pub mod typeset;

pub use api::{Part, ValueHandle};
pub use config::{CONFIG_ENV, RuntimeConfig};
pub use dispatch::{Bounce, Dispatcher};
pub use error::{Category, Condition, ErrorId, Thrown, Unwind};
pub use eval::Outcome;
pub use interp::Interpreter;
pub use mold::{form, mold};
pub use paramlist::{Definitional, SpecOptions};

pub use ren_core::{Cell, GcReport, Kind, NodeId};
