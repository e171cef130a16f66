//! The interpreter instance
//!
//! One [`Interpreter`] owns a heap, the library context every loaded word
//! is bound into, and the native table. Boot fills the library with:
//!
//! - a word per datatype (`integer!`) and per named typeset (`any-word!`)
//! - `true`, `false` and `blank`
//! - every native, built from its spec through the paramlist builder
//! - a checker per datatype and named typeset (`integer?`, `any-word?`)

use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Condition, ErrorId, Unwind};
use crate::eval::Outcome;
use crate::load::scan;
use crate::natives::{NATIVES, Native};
use crate::paramlist::{META_FIELDS, SpecOptions};
use ren_core::kind::{DATATYPES, NAMED_TYPESETS};
use ren_core::{Binding, Cell, CellFlags, GcReport, Heap, Keysource, Kind, NodeId, Subclass};
use std::time::Instant;

/// Canon spellings the builder and evaluator compare against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Syms {
    pub return_: NodeId,
    pub leave: NodeId,
}

/// Spec shared by every generated type checker.
const CHECKER_SPEC: &str = "[value [<opt> any-value!]]";

/// Field names of ERROR! objects.
const ERROR_FIELDS: [&str; 3] = ["type", "id", "message"];

pub struct Interpreter {
    pub heap: Heap,
    pub(crate) config: RuntimeConfig,
    pub(crate) lib: NodeId,
    pub(crate) lib_keys: NodeId,
    pub(crate) syms: Syms,
    pub(crate) natives: Vec<Native>,
    /// Archetypes that definitional exits are bound copies of.
    pub(crate) return_native: Cell,
    pub(crate) leave_native: Cell,
    pub(crate) meta_keys: NodeId,
    pub(crate) error_keys: NodeId,
    /// Nested evaluation levels currently running.
    pub(crate) depth: usize,
    /// Lines written by `print`, in order.
    pub(crate) output: Vec<String>,
}

impl Interpreter {
    pub fn new(config: RuntimeConfig) -> Result<Self, Condition> {
        config
            .validate()
            .map_err(|e| Condition::new(ErrorId::Internal, [e]))?;
        let started = Instant::now();
        crate::report::mark_start();
        let mut heap = Heap::new(config.heap_config());

        let lib_keys = heap.make_managed_array(
            Subclass::Keylist { ancestor: None },
            vec![Cell::blank()],
        );
        let lib = heap.make_managed_array(
            Subclass::Varlist {
                keysource: Keysource::Keylist(lib_keys),
                meta: None,
            },
            Vec::new(),
        );
        if let Some(cells) = heap.node_mut(lib).cells_mut() {
            cells.push(Cell::context(Kind::Module, lib));
        }
        heap.pin(lib_keys);
        heap.pin(lib);

        let return_ = heap.intern_pinned("return");
        let leave = heap.intern_pinned("leave");
        let syms = Syms {
            return_: heap.canon(return_),
            leave: heap.canon(leave),
        };

        let mut it = Interpreter {
            heap,
            config,
            lib,
            lib_keys,
            syms,
            natives: NATIVES.to_vec(),
            return_native: Cell::blank(),
            leave_native: Cell::blank(),
            meta_keys: lib_keys,
            error_keys: lib_keys,
            depth: 0,
            output: Vec::new(),
        };
        it.meta_keys = it.pinned_keylist(&META_FIELDS);
        it.error_keys = it.pinned_keylist(&ERROR_FIELDS);
        it.boot()?;

        tracing::info!(
            natives = it.natives.len(),
            lib_words = it.heap.len(it.lib_keys) - 1,
            elapsed_us = started.elapsed().as_micros() as u64,
            "interpreter ready"
        );
        Ok(it)
    }

    fn pinned_keylist(&mut self, names: &[&str]) -> NodeId {
        let spellings: Vec<NodeId> = names.iter().map(|n| self.heap.intern_pinned(n)).collect();
        let keys = self.make_keylist(&spellings);
        self.heap.pin(keys);
        keys
    }

    fn boot(&mut self) -> Result<(), Condition> {
        for kind in DATATYPES {
            self.set_lib(&kind.to_string(), Cell::datatype(kind))?;
        }
        for (name, bits) in NAMED_TYPESETS {
            self.set_lib(name, Cell::typeset(bits))?;
        }
        self.set_lib("true", Cell::logic(true))?;
        self.set_lib("false", Cell::logic(false))?;
        self.set_lib("blank", Cell::blank())?;

        for (index, native) in NATIVES.iter().enumerate() {
            let spec = self.spec_block(native.spec)?;
            let paramlist = self.build_paramlist(&spec, SpecOptions::native())?;
            let mut action =
                self.make_action(paramlist, Dispatcher::Native(index as u32), Vec::new(), None)?;
            if native.enfix {
                action.set_flag(CellFlags::ENFIXED);
            }
            self.set_lib(native.name, action)?;
            tracing::trace!(name = native.name, "registered native");
        }
        self.return_native = self.native_cell("return")?;
        self.leave_native = self.native_cell("leave")?;

        for kind in DATATYPES {
            let name = format!("{}?", kind.name());
            let checker = self.make_checker(Dispatcher::DatatypeChecker, Cell::datatype(kind))?;
            self.set_lib(&name, checker)?;
        }
        for (name, bits) in NAMED_TYPESETS {
            let name = format!("{}?", name.trim_end_matches('!'));
            let checker = self.make_checker(Dispatcher::TypesetChecker, Cell::typeset(bits))?;
            self.set_lib(&name, checker)?;
        }
        Ok(())
    }

    /// Unbound spec block from source text. Type words in it are looked up
    /// in the library by name.
    fn spec_block(&mut self, source: &str) -> Result<Cell, Condition> {
        let outer = scan(&mut self.heap, source)?;
        match self.heap.cell_at(outer, 0) {
            Some(block) if block.raw_kind() == Kind::Block => Ok(block),
            _ => Err(Condition::new(ErrorId::BadFuncDef, [source])),
        }
    }

    fn native_cell(&mut self, name: &str) -> Result<Cell, Condition> {
        self.lib_value(name)
            .filter(Cell::is_action)
            .ok_or_else(|| Condition::new(ErrorId::Internal, [format!("missing native {name}")]))
    }

    fn make_checker(&mut self, dispatcher: Dispatcher, payload: Cell) -> Result<Cell, Condition> {
        let spec = self.spec_block(CHECKER_SPEC)?;
        let paramlist = self.build_paramlist(&spec, SpecOptions::native())?;
        self.make_action(paramlist, dispatcher, vec![payload], None)
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Load and evaluate source text. The result is void when nothing was
    /// produced.
    pub fn eval_text(&mut self, source: &str) -> Result<Cell, Condition> {
        let block = self.load(source)?;
        let result = self.do_array(block, 0, Binding::Unbound);
        self.finish(result)
    }

    /// Evaluate cells supplied by the host one at a time.
    pub fn eval_cells(&mut self, cells: Vec<Cell>) -> Result<Cell, Condition> {
        let result = self.do_variadic(cells);
        self.finish(result)
    }

    /// Turn an evaluation result into what the host sees. A throw nobody
    /// caught becomes an error.
    pub(crate) fn finish(&mut self, result: Result<Outcome, Unwind>) -> Result<Cell, Condition> {
        if self.depth == 0 {
            self.heap.data_stack.drop_to(0);
        }
        match result {
            Ok(outcome) => Ok(outcome.or_void()),
            Err(Unwind::Fail(condition)) => {
                tracing::debug!(error = %condition, "evaluation failed");
                Err(condition)
            }
            Err(Unwind::Throw(thrown)) => {
                let name = if thrown.label.action_nodes() == self.leave_native.action_nodes() {
                    "leave"
                } else {
                    "return"
                };
                Err(Condition::new(ErrorId::NoCatch, [name]))
            }
        }
    }

    /// Lines printed since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Render a value as source text.
    pub fn mold(&self, value: &Cell) -> String {
        crate::mold::mold(&self.heap, value)
    }

    /// Free everything and report what the collector saw.
    pub fn shutdown(mut self) -> GcReport {
        self.heap.unpin(self.lib);
        self.heap.unpin(self.lib_keys);
        self.heap.unpin(self.meta_keys);
        self.heap.unpin(self.error_keys);
        let report = self.heap.shutdown();
        tracing::info!(swept = report.swept, leaked = report.leaked_roots, "interpreter shut down");
        report
    }
}
