//! Derived actions: adapt, specialize, chain, enclose and hijack
//!
//! Each builds a new action from existing ones without copying their
//! bodies. The new paramlist is a copy of the inner action's, so a frame
//! built for the outer action can be redone under the inner phase with
//! every argument in the right slot.

use crate::dispatch::{Bounce, Dispatcher};
use crate::error::{Condition, ErrorId, Unwind, fail};
use crate::eval::{ArgSource, Call, Outcome};
use crate::interp::Interpreter;
use crate::mold::mold;
use crate::typeset::type_check;
use ren_core::kind::TS_HIDDEN;
use ren_core::{Binding, Cell, Keysource, NodeId, ParamClass, Subclass};

impl Interpreter {
    fn paramlist_of(&self, action: &Cell) -> Result<NodeId, Condition> {
        action
            .action_nodes()
            .map(|(p, _)| p)
            .ok_or_else(|| Condition::new(ErrorId::NotAction, [mold(&self.heap, action)]))
    }

    /// Relativized copy of a block so it can run against frames of
    /// `paramlist`.
    fn relative_block(&mut self, block: &Cell, paramlist: NodeId) -> Result<Cell, Condition> {
        let Some((source, index)) = block.series_at() else {
            return Err(Condition::new(
                ErrorId::InvalidArg,
                [mold(&self.heap, block)],
            ));
        };
        let copy = self.copy_relativized(source, index, block.binding(), paramlist);
        let mut cell = Cell::block(copy);
        cell.set_binding(Binding::Relative(paramlist));
        Ok(cell)
    }

    /// FRAME!-shaped varlist keyed by `paramlist`, one value per parameter.
    pub(crate) fn make_frame_varlist(
        &mut self,
        paramlist: NodeId,
        binding: Binding,
        values: Vec<Cell>,
    ) -> NodeId {
        let varlist = self.heap.make_managed_array(
            Subclass::Varlist {
                keysource: Keysource::Keylist(paramlist),
                meta: None,
            },
            Vec::with_capacity(values.len() + 1),
        );
        if let Some(cells) = self.heap.node_mut(varlist).cells_mut() {
            cells.push(Cell::frame(varlist, paramlist, binding));
            cells.extend(values);
        }
        varlist
    }

    // =========================================================================
    // Adapt
    // =========================================================================

    /// Action that runs `prelude` with the gathered arguments, then the
    /// adaptee with whatever the prelude left in them.
    pub fn adapt(&mut self, adaptee: Cell, prelude: &Cell) -> Result<Cell, Condition> {
        let inner = self.paramlist_of(&adaptee)?;
        let paramlist = self.copy_paramlist(inner, &[]);
        let body = self.relative_block(prelude, paramlist)?;
        let exemplar = self.exemplar_of(inner);
        self.make_action(paramlist, Dispatcher::Adapter, vec![body, adaptee], exemplar)
    }

    pub(crate) fn dispatch_adapter(&mut self, fi: usize, details: NodeId) -> Result<Bounce, Unwind> {
        let (Some(prelude), Some(adaptee)) =
            (self.heap.cell_at(details, 0), self.heap.cell_at(details, 1))
        else {
            return fail(ErrorId::Internal, ["malformed adapter"]);
        };
        if let Some((node, index)) = prelude.series_at() {
            let serial = self.heap.frames[fi].serial;
            self.do_array(node, index, Binding::Frame(serial))?;
        }
        let inner = self.paramlist_of(&adaptee)?;
        self.rebind_frame(fi, &adaptee);
        Ok(Bounce::Redo {
            phase: inner,
            checked: true,
        })
    }

    fn rebind_frame(&mut self, fi: usize, action: &Cell) {
        let binding = action.binding();
        if binding != Binding::Unbound
            && let Some(state) = self.heap.frames[fi].action.as_mut()
        {
            state.binding = binding;
        }
    }

    // =========================================================================
    // Specialize
    // =========================================================================

    /// Action with some arguments fixed. `def` runs with the inner action's
    /// parameters as variables; each one it sets is hidden from callers.
    /// `refinements` (from a path like `append/dup`) are marked used
    /// without fixing their arguments.
    pub fn specialize(
        &mut self,
        specializee: Cell,
        label: Option<NodeId>,
        def: &Cell,
        refinements: &[NodeId],
    ) -> Result<Cell, Unwind> {
        let inner = self.paramlist_of(&specializee)?;
        let params = self.params_of(inner);
        let inner_exemplar = self.exemplar_of(inner);

        let mut values = Vec::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            let hidden = param.typeset_bits().is_some_and(|b| b & TS_HIDDEN != 0);
            let value = if hidden {
                inner_exemplar
                    .and_then(|e| self.heap.cell_at(e, i + 1))
                    .filter(|c| !c.is_end())
                    .unwrap_or_else(Cell::void)
            } else if param.param_class() == Some(ParamClass::Refinement)
                && param.key_spelling().is_some_and(|s| {
                    let canon = self.heap.canon(s);
                    refinements.iter().any(|r| self.heap.canon(*r) == canon)
                })
            {
                Cell::logic(true)
            } else {
                Cell::void()
            };
            values.push(value);
        }
        for r in refinements {
            let known = params.iter().any(|p| {
                p.param_class() == Some(ParamClass::Refinement)
                    && p.key_spelling()
                        .is_some_and(|s| self.heap.canon(s) == self.heap.canon(*r))
            });
            if !known {
                return fail(ErrorId::BadRefine, [self.heap.spelling(*r).to_string()]);
            }
        }

        let varlist = self.make_frame_varlist(inner, specializee.binding(), values);
        let Some((source, index)) = def.series_at() else {
            return fail(ErrorId::InvalidArg, [mold(&self.heap, def)]);
        };
        let body = self.copy_relativized(source, index, def.binding(), inner);
        self.heap.push_guard_node(varlist);
        let ran = self.do_array(body, 0, Binding::Context(varlist));
        self.heap.drop_guard();
        ran?;

        let label = label.map_or_else(
            || "specialization".to_string(),
            |s| self.heap.spelling(s).to_string(),
        );
        let settled = self.heap.cells(varlist).get(1..).unwrap_or_default().to_vec();
        let mut hide = vec![false; params.len()];
        let mut exemplar_cells = vec![Cell::blank(); params.len() + 1];
        let mut refinement_at: Option<usize> = None;
        for (i, param) in params.iter().enumerate() {
            let bits = param.typeset_bits().unwrap_or(0);
            let value = settled.get(i).copied().unwrap_or_else(Cell::void);
            let class = param.param_class();
            if bits & TS_HIDDEN != 0 {
                hide[i] = true;
                exemplar_cells[i + 1] = value;
                if class == Some(ParamClass::Refinement) {
                    refinement_at = Some(i);
                }
                continue;
            }
            match class {
                Some(ParamClass::Refinement) => {
                    refinement_at = Some(i);
                    if value.is_void() {
                        exemplar_cells[i + 1] = Cell::end();
                    } else {
                        let used = value.is_truthy();
                        hide[i] = true;
                        exemplar_cells[i + 1] = Cell::logic(used);
                    }
                }
                Some(c) if c.takes_argument() => {
                    if value.is_void() {
                        exemplar_cells[i + 1] = Cell::end();
                        continue;
                    }
                    if !type_check(&self.heap, bits, &value) {
                        return fail(
                            ErrorId::ArgType,
                            [label.clone(), self.param_label(param), value.kind().to_string()],
                        );
                    }
                    hide[i] = true;
                    exemplar_cells[i + 1] = value;
                    // A fixed refinement argument means the refinement is in use.
                    if let Some(r) = refinement_at
                        && !hide[r]
                    {
                        hide[r] = true;
                        exemplar_cells[r + 1] = Cell::logic(true);
                    }
                }
                _ => exemplar_cells[i + 1] = Cell::end(),
            }
        }

        let exemplar = self.heap.make_managed_array(
            Subclass::Varlist {
                keysource: Keysource::Keylist(inner),
                meta: None,
            },
            exemplar_cells,
        );
        let paramlist = self.copy_paramlist(inner, &hide);
        tracing::trace!(label = %label, hidden = hide.iter().filter(|h| **h).count(), "specialized");
        Ok(self.make_action(
            paramlist,
            Dispatcher::Specializer,
            vec![specializee],
            Some(exemplar),
        )?)
    }

    pub(crate) fn dispatch_specializer(
        &mut self,
        fi: usize,
        details: NodeId,
    ) -> Result<Bounce, Unwind> {
        let Some(specializee) = self.heap.cell_at(details, 0) else {
            return fail(ErrorId::Internal, ["malformed specializer"]);
        };
        let inner = self.paramlist_of(&specializee)?;
        self.rebind_frame(fi, &specializee);
        Ok(Bounce::Redo {
            phase: inner,
            checked: false,
        })
    }

    fn param_label(&self, param: &Cell) -> String {
        param
            .key_spelling()
            .map_or_else(|| "?".to_string(), |s| self.heap.spelling(s).to_string())
    }

    // =========================================================================
    // Chain
    // =========================================================================

    /// Action that runs each of `pipeline` in turn, feeding every result to
    /// the next. Takes the arguments of the first.
    pub fn chain(&mut self, pipeline: Vec<Cell>) -> Result<Cell, Condition> {
        let Some(first) = pipeline.first() else {
            return Err(Condition::new(ErrorId::InvalidArg, ["[]"]));
        };
        for stage in &pipeline {
            self.paramlist_of(stage)?;
        }
        let inner = self.paramlist_of(first)?;
        let paramlist = self.copy_paramlist(inner, &[]);
        let exemplar = self.exemplar_of(inner);
        let stages = self.heap.make_managed_array(Subclass::Array, pipeline);
        self.make_action(
            paramlist,
            Dispatcher::Chainer,
            vec![Cell::block(stages)],
            exemplar,
        )
    }

    pub(crate) fn dispatch_chainer(&mut self, fi: usize, details: NodeId) -> Result<Bounce, Unwind> {
        let Some((stages, _)) = self.heap.cell_at(details, 0).and_then(|c| c.series_at()) else {
            return fail(ErrorId::Internal, ["malformed chainer"]);
        };
        let pipeline = self.heap.cells(stages).to_vec();
        let Some((first, rest)) = pipeline.split_first() else {
            return fail(ErrorId::Internal, ["empty chain"]);
        };
        // Later stages run after this frame's dispatch, top of stack first.
        for stage in rest.iter().rev() {
            self.heap.data_stack.push(*stage);
        }
        let inner = self.paramlist_of(first)?;
        self.rebind_frame(fi, first);
        Ok(Bounce::Redo {
            phase: inner,
            checked: false,
        })
    }

    // =========================================================================
    // Enclose
    // =========================================================================

    /// Action that gathers `inner`'s arguments into a FRAME! and passes it
    /// to `outer`, which decides whether and how to run it.
    pub fn enclose(&mut self, inner: Cell, outer: Cell) -> Result<Cell, Condition> {
        let inner_list = self.paramlist_of(&inner)?;
        self.paramlist_of(&outer)?;
        let paramlist = self.copy_paramlist(inner_list, &[]);
        let exemplar = self.exemplar_of(inner_list);
        self.make_action(paramlist, Dispatcher::Encloser, vec![inner, outer], exemplar)
    }

    pub(crate) fn dispatch_encloser(&mut self, fi: usize, details: NodeId) -> Result<Bounce, Unwind> {
        let (Some(inner), Some(outer)) =
            (self.heap.cell_at(details, 0), self.heap.cell_at(details, 1))
        else {
            return fail(ErrorId::Internal, ["malformed encloser"]);
        };
        let inner_list = self.paramlist_of(&inner)?;
        let args = self.frame_args(fi);
        let varlist = self.make_frame_varlist(inner_list, inner.binding(), args);
        let frame = self.heap.cell_at(varlist, 0).unwrap_or_else(Cell::void);
        self.heap.frames[fi].spare = frame;
        let out = self.call_with(outer, vec![frame])?;
        Ok(match out {
            Outcome::Value(v) => Bounce::Out(v),
            Outcome::Invisible => Bounce::Invisible,
        })
    }

    // =========================================================================
    // Hijack
    // =========================================================================

    /// Make every reference to `victim` run `hijacker` instead. Returns a
    /// new action that still behaves like the original victim.
    pub fn hijack(&mut self, victim: Cell, hijacker: Cell) -> Result<Cell, Condition> {
        let Some((victim_list, victim_details)) = victim.action_nodes() else {
            return Err(Condition::new(ErrorId::NotAction, [mold(&self.heap, &victim)]));
        };
        let Some((hijacker_list, hijacker_details)) = hijacker.action_nodes() else {
            return Err(Condition::new(ErrorId::NotAction, [mold(&self.heap, &hijacker)]));
        };

        let old_subclass = self.heap.subclass(victim_details);
        let Subclass::Details {
            dispatcher,
            exemplar,
        } = old_subclass
        else {
            return Err(Condition::new(ErrorId::Internal, ["victim has no details"]));
        };
        let Some(old_dispatcher) = Dispatcher::from_id(dispatcher) else {
            return Err(Condition::new(ErrorId::Internal, ["unknown dispatcher"]));
        };
        let old_body = self.heap.cells(victim_details).to_vec();
        let proxy_list = self.copy_paramlist(victim_list, &[]);
        let proxy = self.make_action(proxy_list, old_dispatcher, old_body, exemplar)?;

        let same_interface = self.underlying(hijacker_list) == self.underlying(victim_list);
        let (subclass, cells) = if same_interface {
            (
                self.heap.subclass(hijacker_details),
                self.heap.cells(hijacker_details).to_vec(),
            )
        } else {
            (
                Subclass::Details {
                    dispatcher: Dispatcher::Hijacker.id(),
                    exemplar: None,
                },
                vec![hijacker],
            )
        };
        self.heap.set_subclass(victim_details, subclass);
        if let Some(slot) = self.heap.node_mut(victim_details).cells_mut() {
            *slot = cells;
        }
        tracing::debug!(same_interface, "hijacked action");
        Ok(proxy)
    }

    pub(crate) fn dispatch_hijacker(&mut self, fi: usize, details: NodeId) -> Result<Bounce, Unwind> {
        let Some(hijacker) = self.heap.cell_at(details, 0) else {
            return fail(ErrorId::Internal, ["malformed hijacker"]);
        };
        let hijacker_list = self.paramlist_of(&hijacker)?;
        let Some(phase) = self.heap.frames[fi].action.as_ref().map(|a| a.phase) else {
            return fail(ErrorId::Internal, ["hijacker without a frame"]);
        };
        let victim_params = self.params_of(phase);

        // Arguments are matched to the hijacker's parameters by name.
        let mut values = Vec::new();
        for param in self.params_of(hijacker_list) {
            let slot = param.key_spelling().and_then(|s| {
                let canon = self.heap.canon(s);
                victim_params.iter().position(|p| {
                    p.key_spelling().is_some_and(|v| self.heap.canon(v) == canon)
                })
            });
            let value = match (param.param_class(), slot) {
                (Some(ParamClass::Return | ParamClass::Leave | ParamClass::Local), _) => {
                    Cell::void()
                }
                (_, Some(at)) => self.frame_arg(fi, at + 1),
                (_, None) => Cell::void(),
            };
            values.push(value);
        }
        let varlist = self.make_frame_varlist(hijacker_list, hijacker.binding(), values);
        let dsp = self.heap.data_stack.dsp();
        let out = self.call_action(Call {
            action: hijacker,
            label: None,
            source: ArgSource::Frame(varlist),
            left: None,
            dsp_base: dsp,
        })?;
        Ok(match out {
            Outcome::Value(v) => Bounce::Out(v),
            Outcome::Invisible => Bounce::Invisible,
        })
    }
}
