//! Action construction
//!
//! An action is two nodes:
//!
//! ```text
//!   paramlist                         details
//!   ┌──────────────────────────┐      ┌──────────────────────────┐
//!   │ [0] archetype ───────────┼────► │ dispatcher id, exemplar  │
//!   │ [1..] parameters         │      │ [0..] body cells         │
//!   │ underlying/facade/meta   │      └──────────────────────────┘
//!   └──────────────────────────┘
//! ```
//!
//! The archetype in `[0]` is an ACTION! value naming this same paramlist
//! and its details. Derived actions (adapt, specialize, chain, enclose)
//! copy the inner paramlist so argument slots line up, and record the
//! inner action's underlying paramlist.

use crate::dispatch::Dispatcher;
use crate::error::{Condition, ErrorId};
use crate::interp::Interpreter;
use crate::paramlist::SpecOptions;
use ren_core::kind::TS_HIDDEN;
use ren_core::{ActionFlags, Binding, Cell, NodeFlags, NodeId, ParamClass, Subclass};

/// Flags a derived paramlist keeps from its source. The first-argument
/// flags are always recomputed.
const INHERITED_FLAGS: [ActionFlags; 3] = [
    ActionFlags::RETURN,
    ActionFlags::LEAVE,
    ActionFlags::INVISIBLE,
];

impl Interpreter {
    pub(crate) fn action_flags(&self, paramlist: NodeId) -> ActionFlags {
        match self.heap.subclass(paramlist) {
            Subclass::Paramlist { flags, .. } => flags,
            _ => ActionFlags::empty(),
        }
    }

    pub(crate) fn underlying(&self, paramlist: NodeId) -> NodeId {
        match self.heap.subclass(paramlist) {
            Subclass::Paramlist { underlying, .. } => underlying,
            _ => paramlist,
        }
    }

    /// Paramlist that presents the action's interface. Derived actions
    /// hide parameters with `TS_HIDDEN` on their own copy, so this is the
    /// action's paramlist unless a facade was installed.
    pub(crate) fn facade(&self, paramlist: NodeId) -> NodeId {
        match self.heap.subclass(paramlist) {
            Subclass::Paramlist { facade, .. } => facade,
            _ => paramlist,
        }
    }

    fn update_paramlist(
        &mut self,
        paramlist: NodeId,
        f: impl FnOnce(&mut NodeId, &mut ActionFlags),
    ) {
        if let Subclass::Paramlist {
            mut underlying,
            facade,
            meta,
            mut flags,
        } = self.heap.subclass(paramlist)
        {
            f(&mut underlying, &mut flags);
            self.heap.set_subclass(
                paramlist,
                Subclass::Paramlist {
                    underlying,
                    facade,
                    meta,
                    flags,
                },
            );
        }
    }

    /// The archetype action stored in a paramlist's `[0]`.
    pub(crate) fn archetype(&self, paramlist: NodeId) -> Cell {
        self.heap.cell_at(paramlist, 0).unwrap_or_else(Cell::blank)
    }

    pub(crate) fn details_of(&self, paramlist: NodeId) -> Option<NodeId> {
        self.archetype(paramlist).action_nodes().map(|(_, d)| d)
    }

    pub(crate) fn dispatcher_of(&self, details: NodeId) -> Option<Dispatcher> {
        match self.heap.subclass(details) {
            Subclass::Details { dispatcher, .. } => Dispatcher::from_id(dispatcher),
            _ => None,
        }
    }

    pub(crate) fn exemplar_of(&self, paramlist: NodeId) -> Option<NodeId> {
        match self.details_of(paramlist).map(|d| self.heap.subclass(d)) {
            Some(Subclass::Details { exemplar, .. }) => exemplar,
            _ => None,
        }
    }

    /// Parameter cells of a paramlist, `[1..]`.
    pub(crate) fn params_of(&self, paramlist: NodeId) -> Vec<Cell> {
        self.heap
            .cells(paramlist)
            .get(1..)
            .unwrap_or_default()
            .to_vec()
    }

    /// First-argument flags from the first visible argument-taking
    /// parameter before any refinement.
    fn first_arg_flags(&self, paramlist: NodeId) -> ActionFlags {
        let mut flags = ActionFlags::empty();
        for param in self.heap.cells(paramlist).iter().skip(1) {
            let hidden = param.typeset_bits().is_some_and(|b| b & TS_HIDDEN != 0);
            match param.param_class() {
                Some(ParamClass::Local | ParamClass::Return | ParamClass::Leave) => continue,
                _ if hidden => continue,
                Some(ParamClass::Normal) => {
                    flags.insert(ActionFlags::DEFERS_LOOKBACK);
                    break;
                }
                Some(ParamClass::HardQuote | ParamClass::SoftQuote) => {
                    flags.insert(ActionFlags::QUOTES_FIRST_ARG);
                    break;
                }
                _ => break,
            }
        }
        flags
    }

    /// Finish an action over a built paramlist: allocate its details,
    /// compute its flags and write the archetype.
    pub fn make_action(
        &mut self,
        paramlist: NodeId,
        dispatcher: Dispatcher,
        body: Vec<Cell>,
        exemplar: Option<NodeId>,
    ) -> Result<Cell, Condition> {
        let details = self.heap.make_managed_array(
            Subclass::Details {
                dispatcher: dispatcher.id(),
                exemplar,
            },
            body,
        );
        let first = self.first_arg_flags(paramlist);
        self.update_paramlist(paramlist, |_, flags| {
            flags.remove(ActionFlags::DEFERS_LOOKBACK);
            flags.remove(ActionFlags::QUOTES_FIRST_ARG);
            flags.insert(first);
            if matches!(dispatcher, Dispatcher::Native(_)) {
                flags.insert(ActionFlags::NATIVE);
            }
        });
        let archetype = Cell::action(paramlist, details);
        self.heap.set_cell(paramlist, 0, archetype)?;
        Ok(archetype)
    }

    /// Copy of `source` for a derived action. `hide` marks parameters that
    /// callers no longer see. The copy's underlying is the source's.
    pub(crate) fn copy_paramlist(&mut self, source: NodeId, hide: &[bool]) -> NodeId {
        let mut cells = self.heap.cells(source).to_vec();
        if let Some(first) = cells.first_mut() {
            *first = Cell::blank();
        }
        for (i, cell) in cells.iter_mut().enumerate().skip(1) {
            if hide.get(i - 1).copied().unwrap_or(false)
                && let Some(bits) = cell.typeset_bits()
            {
                cell.set_typeset_bits(bits | TS_HIDDEN);
            }
        }
        let (underlying, meta, flags) = match self.heap.subclass(source) {
            Subclass::Paramlist {
                underlying,
                meta,
                flags,
                ..
            } => (underlying, meta, flags),
            _ => (source, None, ActionFlags::empty()),
        };
        let copy = self.heap.make_managed_array(Subclass::Array, cells);
        self.heap.node_mut(copy).flags.insert(NodeFlags::FIXED_SIZE);
        let mut kept = ActionFlags::empty();
        for flag in INHERITED_FLAGS {
            if flags.contains(flag) {
                kept.insert(flag);
            }
        }
        self.heap.set_subclass(
            copy,
            Subclass::Paramlist {
                underlying,
                facade: copy,
                meta,
                flags: kept,
            },
        );
        copy
    }

    /// `func`/`proc`: build the paramlist, copy and relativize the body and
    /// pick a dispatcher from the shape of both.
    pub fn make_interpreted(
        &mut self,
        spec: &Cell,
        body: &Cell,
        options: SpecOptions,
    ) -> Result<Cell, Condition> {
        let paramlist = self.build_paramlist(spec, options)?;
        let Some((source, index)) = body.series_at() else {
            return Err(Condition::new(
                ErrorId::BadFuncDef,
                [crate::mold::mold(&self.heap, body)],
            ));
        };
        let empty = self.heap.len(source) <= index;
        let flags = self.action_flags(paramlist);
        let invisible = flags.contains(ActionFlags::INVISIBLE);

        let dispatcher = if empty {
            let return_allows_void = self
                .heap
                .cells(paramlist)
                .last()
                .filter(|p| p.param_class() == Some(ParamClass::Return))
                .and_then(|p| p.typeset_bits())
                .is_none_or(|b| b & ren_core::Kind::Void.bit() != 0);
            if invisible {
                Dispatcher::Commenter
            } else if flags.contains(ActionFlags::RETURN) && !return_allows_void {
                Dispatcher::Returner
            } else {
                Dispatcher::Noop
            }
        } else if invisible {
            Dispatcher::Elider
        } else if flags.contains(ActionFlags::RETURN) {
            Dispatcher::Returner
        } else if flags.contains(ActionFlags::LEAVE) {
            Dispatcher::Voider
        } else {
            Dispatcher::Unchecked
        };

        let copy = self.copy_relativized(source, index, body.binding(), paramlist);
        let mut body_cell = Cell::block(copy);
        body_cell.set_binding(Binding::Relative(paramlist));
        tracing::trace!(?dispatcher, "made interpreted action");
        self.make_action(paramlist, dispatcher, vec![body_cell], None)
    }

    /// FRAME! for `action` with every slot the caller may fill set to void.
    /// Specialized slots keep their values and are hidden from the caller.
    pub fn make_frame(&mut self, action: &Cell) -> Result<Cell, Condition> {
        let Some((paramlist, _)) = action.action_nodes() else {
            return Err(Condition::new(
                ErrorId::NotAction,
                [crate::mold::mold(&self.heap, action)],
            ));
        };
        let exemplar = self.exemplar_of(paramlist);
        let values: Vec<Cell> = self
            .params_of(paramlist)
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let hidden = param.typeset_bits().is_some_and(|b| b & TS_HIDDEN != 0);
                match exemplar.and_then(|e| self.heap.cell_at(e, i + 1)) {
                    Some(v) if hidden && !v.is_end() => v,
                    _ => Cell::void(),
                }
            })
            .collect();
        let varlist = self.make_frame_varlist(paramlist, action.binding(), values);
        Ok(self.heap.cell_at(varlist, 0).unwrap_or_else(Cell::void))
    }
}
