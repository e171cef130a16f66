//! The evaluator
//!
//! Evaluation is a loop of steps over a frame's feed. One step reads one
//! expression: a word is looked up (and called, if it names an action), a
//! set-word assigns the value of the next step, a group is evaluated in a
//! frame of its own, and anything else stands for itself. After each step
//! the next cell is checked for an enfix action, which takes the value just
//! produced as its first argument.
//!
//! Calling an action pushes a frame, fulfills its arguments in parameter
//! order and runs its dispatcher, redoing the same frame under a new phase
//! when the dispatcher asks.
//!
//! Arguments come from one of three places:
//!
//! - the caller's feed, for ordinary calls
//! - a list of values, for host calls and combinators
//! - a FRAME! varlist, for `do frame`
//!
//! Garbage collection only happens at the top of a step. Anything held
//! across a step must be in a frame, on the data stack or guarded.

use crate::context::derelativize;
use crate::dispatch::Bounce;
use crate::error::{ErrorId, Unwind, fail};
use crate::interp::Interpreter;
use crate::mold::mold;
use crate::typeset::type_check;
use ren_core::kind::{TS_ENDABLE, TS_HIDDEN, TS_NOOP_IF_BLANK, TS_SKIPPABLE, TS_VARIADIC};
use ren_core::{ActionFlags, ActionState, Binding, Cell, CellFlags, Feed, Kind, NodeId, ParamClass};

/// Result of evaluating something that may vanish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Value(Cell),
    /// Nothing was produced (`comment`, `elide`, a bar).
    Invisible,
}

impl Outcome {
    pub fn or_void(self) -> Cell {
        match self {
            Outcome::Value(cell) => cell,
            Outcome::Invisible => Cell::void(),
        }
    }

    pub fn is_invisible(&self) -> bool {
        matches!(self, Outcome::Invisible)
    }
}

/// How far a step may look ahead for enfix actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookahead {
    Full,
    /// Stop before enfix actions that defer to the whole expression.
    Defer,
    /// No enfix at all.
    Tight,
}

pub(crate) enum ArgSource {
    /// Frame index whose feed supplies the arguments.
    Feed(usize),
    Values(Vec<Cell>),
    /// Varlist of a FRAME! value.
    Frame(NodeId),
}

pub(crate) struct Call {
    pub action: Cell,
    pub label: Option<NodeId>,
    pub source: ArgSource,
    /// Left-hand value for an enfix call.
    pub left: Option<Cell>,
    /// Refinement words pushed on the data stack above this point.
    pub dsp_base: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refine {
    Ordinary,
    Unused,
    Using,
}

struct Enfix {
    action: Cell,
    label: Option<NodeId>,
    flags: ActionFlags,
}

impl Interpreter {
    pub(crate) fn enter_level(&mut self) -> Result<(), Unwind> {
        if self.depth >= self.config.eval.max_depth {
            return fail(ErrorId::StackOverflow, Vec::<String>::new());
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn frame_label(&self, fi: usize) -> String {
        self.heap.frames[fi]
            .action
            .as_ref()
            .and_then(|a| a.label)
            .map_or_else(|| "anonymous".to_string(), |s| self.heap.spelling(s).to_string())
    }

    fn param_name(&self, param: &Cell) -> String {
        param
            .key_spelling()
            .map_or_else(|| "?".to_string(), |s| self.heap.spelling(s).to_string())
    }

    // =========================================================================
    // Running arrays
    // =========================================================================

    /// Evaluate an array from `index` to its end. An empty array gives void;
    /// one whose every step vanished gives [`Outcome::Invisible`].
    pub fn do_array(
        &mut self,
        array: NodeId,
        index: usize,
        specifier: Binding,
    ) -> Result<Outcome, Unwind> {
        if self.heap.len(array) <= index {
            return Ok(Outcome::Value(Cell::void()));
        }
        self.run_feed(Feed::array(array, index, specifier))
    }

    /// Evaluate host-supplied cells without first copying them into an
    /// array.
    pub fn do_variadic<I>(&mut self, cells: I) -> Result<Outcome, Unwind>
    where
        I: IntoIterator<Item = Cell>,
        I::IntoIter: 'static,
    {
        self.run_feed(Feed::variadic(cells))
    }

    fn run_feed(&mut self, feed: Feed) -> Result<Outcome, Unwind> {
        self.enter_level()?;
        let fi = self.heap.push_frame(feed);
        let mut result = Ok(());
        while !self.heap.feed_at_end(fi) {
            match self.eval_step(fi, Lookahead::Full) {
                Ok(Outcome::Value(v)) => self.heap.frames[fi].out = v,
                Ok(Outcome::Invisible) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let frame = self.heap.pop_frame(result.is_err());
        self.depth -= 1;
        result?;
        if frame.out.is_end() {
            Ok(Outcome::Invisible)
        } else {
            Ok(Outcome::Value(frame.out))
        }
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Evaluate one expression from frame `fi`'s feed.
    pub(crate) fn eval_step(&mut self, fi: usize, mode: Lookahead) -> Result<Outcome, Unwind> {
        if let Some(report) = self.heap.recycle_if_signaled() {
            tracing::debug!(swept = report.swept, "collected at evaluation step");
        }
        let Some(raw) = self.heap.feed_next(fi) else {
            return Ok(Outcome::Invisible);
        };
        let specifier = self.heap.frames[fi].feed.specifier;
        let cell = derelativize(raw, specifier);

        // An enfix action that quotes its left side gets this cell as is.
        if mode != Lookahead::Tight
            && let Some(enfix) = self.peek_enfix(fi)
            && enfix.flags.contains(ActionFlags::QUOTES_FIRST_ARG)
        {
            self.heap.feed_next(fi);
            let dsp = self.heap.data_stack.dsp();
            let out = self.call_action(Call {
                action: enfix.action,
                label: enfix.label,
                source: ArgSource::Feed(fi),
                left: Some(cell),
                dsp_base: dsp,
            })?;
            return self.lookahead(fi, out, mode);
        }

        let out = self.eval_cell(fi, cell)?;
        self.lookahead(fi, out, mode)
    }

    fn lookahead(&mut self, fi: usize, out: Outcome, mode: Lookahead) -> Result<Outcome, Unwind> {
        let Outcome::Value(mut value) = out else {
            return Ok(out);
        };
        if mode == Lookahead::Tight {
            return Ok(Outcome::Value(value));
        }
        while let Some(enfix) = self.peek_enfix(fi) {
            if mode == Lookahead::Defer && enfix.flags.contains(ActionFlags::DEFERS_LOOKBACK) {
                break;
            }
            self.heap.feed_next(fi);
            self.heap.frames[fi].spare = value;
            let dsp = self.heap.data_stack.dsp();
            let next = self.call_action(Call {
                action: enfix.action,
                label: enfix.label,
                source: ArgSource::Feed(fi),
                left: Some(value),
                dsp_base: dsp,
            })?;
            if let Outcome::Value(v) = next {
                value = v;
            }
        }
        Ok(Outcome::Value(value))
    }

    /// The next cell of the feed, if it is a word naming an enfixed action.
    fn peek_enfix(&mut self, fi: usize) -> Option<Enfix> {
        let next = self.heap.feed_peek(fi)?;
        if next.is_quoted() || next.raw_kind() != Kind::Word {
            return None;
        }
        let word = derelativize(next, self.heap.frames[fi].feed.specifier);
        let value = self.get_var(&word).ok()?;
        if !value.is_action() || !value.flags().contains(CellFlags::ENFIXED) {
            return None;
        }
        let (paramlist, _) = value.action_nodes()?;
        Some(Enfix {
            action: value,
            label: word.word_spelling(),
            flags: self.action_flags(paramlist),
        })
    }

    fn eval_cell(&mut self, fi: usize, cell: Cell) -> Result<Outcome, Unwind> {
        if cell.is_quoted() {
            return Ok(Outcome::Value(self.heap.unquotify(cell, 1)));
        }
        match cell.raw_kind() {
            Kind::Word => {
                let value = self.get_var(&cell)?;
                if value.is_action() {
                    let dsp = self.heap.data_stack.dsp();
                    return self.call_action(Call {
                        action: value,
                        label: cell.word_spelling(),
                        source: ArgSource::Feed(fi),
                        left: None,
                        dsp_base: dsp,
                    });
                }
                if value.is_void() {
                    return fail(ErrorId::NoValue, [mold(&self.heap, &cell)]);
                }
                Ok(Outcome::Value(value))
            }
            Kind::SetWord => {
                let value = self.eval_assigned(fi, &cell)?;
                self.set_var(&cell, value)?;
                Ok(Outcome::Value(value))
            }
            Kind::GetWord => Ok(Outcome::Value(self.get_var(&cell)?)),
            Kind::Path => self.eval_path(fi, &cell),
            Kind::GetPath => Ok(Outcome::Value(self.get_path(&cell)?)),
            Kind::SetPath => {
                let value = self.eval_assigned(fi, &cell)?;
                self.set_path(&cell, value)?;
                Ok(Outcome::Value(value))
            }
            Kind::Group => {
                let Some((node, index)) = cell.series_at() else {
                    return Ok(Outcome::Value(Cell::void()));
                };
                self.do_array(node, index, cell.binding())
            }
            Kind::Action => {
                let dsp = self.heap.data_stack.dsp();
                self.call_action(Call {
                    action: cell,
                    label: None,
                    source: ArgSource::Feed(fi),
                    left: None,
                    dsp_base: dsp,
                })
            }
            Kind::Bar => Ok(Outcome::Invisible),
            _ => Ok(Outcome::Value(cell)),
        }
    }

    /// Right-hand side of a set-word or set-path: the next step that
    /// produces something.
    fn eval_assigned(&mut self, fi: usize, target: &Cell) -> Result<Cell, Unwind> {
        loop {
            let at_barrier = match self.heap.feed_peek(fi) {
                None => true,
                Some(next) => next.raw_kind() == Kind::Bar && !next.is_quoted(),
            };
            if at_barrier {
                return fail(ErrorId::NoArg, [mold(&self.heap, target), "value".to_string()]);
            }
            self.heap.frames[fi].spare = *target;
            if let Outcome::Value(v) = self.eval_step(fi, Lookahead::Full)? {
                return Ok(v);
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Call an action with values for its visible arguments, in order.
    pub fn call_with(&mut self, action: Cell, args: Vec<Cell>) -> Result<Outcome, Unwind> {
        let dsp = self.heap.data_stack.dsp();
        self.call_action(Call {
            action,
            label: None,
            source: ArgSource::Values(args),
            left: None,
            dsp_base: dsp,
        })
    }

    pub(crate) fn call_action(&mut self, call: Call) -> Result<Outcome, Unwind> {
        let Some((paramlist, _)) = call.action.action_nodes() else {
            return fail(ErrorId::NotAction, [mold(&self.heap, &call.action)]);
        };
        self.enter_level()?;

        let refinements: Vec<NodeId> = self
            .heap
            .data_stack
            .pop_to(call.dsp_base)
            .iter()
            .filter_map(Cell::word_spelling)
            .map(|s| self.heap.canon(s))
            .collect();
        let dsp = self.heap.data_stack.dsp();
        let caller = match call.source {
            ArgSource::Feed(p) => Some(self.heap.frames[p].serial),
            _ => None,
        };

        let fi = self.heap.push_frame(Feed::empty());
        let mut state = ActionState::new(paramlist, call.action.binding(), call.label, dsp);
        state.special = self.exemplar_of(paramlist);
        state.caller = caller;
        self.heap.frames[fi].action = Some(state);
        if let ArgSource::Frame(varlist) = call.source
            && let Some(archetype) = self.heap.cell_at(varlist, 0)
        {
            self.heap.frames[fi].spare = archetype;
        }

        let result = self.run_action(fi, call.source, refinements, call.left);
        let frame = self.heap.pop_frame(result.is_err());
        self.depth -= 1;
        tracing::trace!(serial = frame.serial.0, ok = result.is_ok(), "call finished");
        result
    }

    fn run_action(
        &mut self,
        fi: usize,
        source: ArgSource,
        refinements: Vec<NodeId>,
        left: Option<Cell>,
    ) -> Result<Outcome, Unwind> {
        if self.fulfill(fi, source, refinements, left)? {
            return Ok(Outcome::Value(Cell::void()));
        }

        let serial = self.heap.frames[fi].serial;
        let mut out = match self.dispatch_loop(fi) {
            Ok(out) => out,
            Err(Unwind::Throw(thrown)) if thrown.label.binding() == Binding::Frame(serial) => {
                Outcome::Value(thrown.value)
            }
            Err(e) => return Err(e),
        };

        // Pipeline pushed by a chain: each stage gets the previous result.
        let dsp_orig = self.heap.frames[fi].action.as_ref().map_or(0, |a| a.dsp_orig);
        while self.heap.data_stack.dsp() > dsp_orig {
            let Some(next) = self.heap.data_stack.pop() else {
                break;
            };
            let input = out.or_void();
            self.heap.frames[fi].out = input;
            self.heap.frames[fi].spare = next;
            out = self.call_with(next, vec![input])?;
        }

        if let Outcome::Value(v) = out {
            self.heap.frames[fi].out = v;
        }
        Ok(out)
    }

    fn dispatch_loop(&mut self, fi: usize) -> Result<Outcome, Unwind> {
        let Some(mut phase) = self.heap.frames[fi].action.as_ref().map(|a| a.original) else {
            return fail(ErrorId::Internal, ["dispatch without an action"]);
        };
        loop {
            match self.dispatch(fi, phase)? {
                Bounce::Out(v) => return Ok(Outcome::Value(v)),
                Bounce::Invisible => return Ok(Outcome::Invisible),
                Bounce::Redo { phase: next, checked } => {
                    if checked {
                        self.typecheck_frame(fi, next)?;
                    }
                    if let Some(action) = self.heap.frames[fi].action.as_mut() {
                        action.phase = next;
                    }
                    phase = next;
                }
            }
        }
    }

    // =========================================================================
    // Argument fulfillment
    // =========================================================================

    fn push_arg(&mut self, fi: usize, value: Cell) {
        if let Some(action) = self.heap.frames[fi].action.as_mut() {
            action.args.push(value);
        }
    }

    /// Fill the frame's arguments. Returns `true` when a `<blank>`
    /// parameter received a blank and the call should be skipped.
    fn fulfill(
        &mut self,
        fi: usize,
        mut source: ArgSource,
        mut refinements: Vec<NodeId>,
        mut left: Option<Cell>,
    ) -> Result<bool, Unwind> {
        let Some(state) = self.heap.frames[fi].action.as_ref() else {
            return fail(ErrorId::Internal, ["fulfill without an action"]);
        };
        let (original, exemplar) = (state.original, state.special);
        let serial = self.heap.frames[fi].serial;
        let params = self.params_of(original);

        let prebuilt = match &source {
            ArgSource::Frame(varlist) => {
                self.heap.check_accessible(*varlist)?;
                Some(self.heap.cells(*varlist).get(1..).unwrap_or_default().to_vec())
            }
            _ => None,
        };
        let mut values = match &mut source {
            ArgSource::Values(v) => std::mem::take(v).into_iter(),
            _ => Vec::new().into_iter(),
        };

        let mut refine = Refine::Ordinary;
        let mut noop = false;
        for (i, param) in params.iter().enumerate() {
            let n = i + 1;
            let class = param.param_class().unwrap_or(ParamClass::Normal);
            let bits = param.typeset_bits().unwrap_or(0);
            let hidden = bits & TS_HIDDEN != 0;

            let value = match class {
                ParamClass::Return | ParamClass::Leave => {
                    let mut exit = if class == ParamClass::Return {
                        self.return_native
                    } else {
                        self.leave_native
                    };
                    exit.set_binding(Binding::Frame(serial));
                    exit
                }
                ParamClass::Local => Cell::void(),
                _ if hidden => {
                    let special = exemplar
                        .and_then(|e| self.heap.cell_at(e, n))
                        .filter(|c| !c.is_end())
                        .unwrap_or_else(Cell::void);
                    if class == ParamClass::Refinement {
                        refine = if special.is_truthy() {
                            Refine::Using
                        } else {
                            Refine::Unused
                        };
                    }
                    special
                }
                ParamClass::Refinement => {
                    let used = match &prebuilt {
                        Some(cells) => cells.get(i).is_some_and(Cell::is_truthy),
                        None => {
                            let canon = param.key_spelling().map(|s| self.heap.canon(s));
                            match refinements.iter().position(|r| Some(*r) == canon) {
                                Some(at) => {
                                    refinements.remove(at);
                                    true
                                }
                                None => false,
                            }
                        }
                    };
                    refine = if used { Refine::Using } else { Refine::Unused };
                    if used { Cell::logic(true) } else { Cell::void() }
                }
                _ if refine == Refine::Unused => Cell::void(),
                _ => {
                    let value = if let Some(l) = left.take() {
                        l
                    } else if bits & TS_VARIADIC != 0 {
                        Cell::varargs(serial, n)
                    } else {
                        match &source {
                            ArgSource::Feed(p) => {
                                let p = *p;
                                self.gather_feed_arg(p, class, bits)?.unwrap_or_else(Cell::end)
                            }
                            ArgSource::Values(_) => values.next().unwrap_or_else(Cell::end),
                            ArgSource::Frame(_) => prebuilt
                                .as_ref()
                                .and_then(|c| c.get(i).copied())
                                .filter(|c| !c.is_end())
                                .unwrap_or_else(Cell::void),
                        }
                    };
                    let value = self.check_arg(fi, param, value)?;
                    if bits & TS_NOOP_IF_BLANK != 0 && value.is_blank() {
                        noop = true;
                    }
                    value
                }
            };
            self.push_arg(fi, value);
        }

        if let Some(extra) = refinements.first() {
            return fail(ErrorId::BadRefine, [self.heap.spelling(*extra).to_string()]);
        }
        Ok(noop)
    }

    /// Typecheck a visible argument. A missing argument becomes void when
    /// the parameter is endable.
    fn check_arg(&self, fi: usize, param: &Cell, value: Cell) -> Result<Cell, Unwind> {
        let bits = param.typeset_bits().unwrap_or(0);
        if value.is_end() {
            if bits & (TS_ENDABLE | Kind::Void.bit()) != 0 {
                return Ok(Cell::void());
            }
            return fail(ErrorId::NoArg, [self.frame_label(fi), self.param_name(param)]);
        }
        let ok = if value.is_void() {
            bits & (TS_ENDABLE | Kind::Void.bit()) != 0
        } else if bits & TS_VARIADIC != 0 && value.raw_kind() == Kind::Varargs {
            true
        } else if bits & TS_NOOP_IF_BLANK != 0 && value.is_blank() {
            true
        } else {
            type_check(&self.heap, bits, &value)
        };
        if ok {
            Ok(value)
        } else {
            fail(
                ErrorId::ArgType,
                [
                    self.frame_label(fi),
                    self.param_name(param),
                    value.kind().to_string(),
                ],
            )
        }
    }

    /// Next argument from frame `p`'s feed for a parameter of `class`.
    /// `None` at the end of the feed or at a bar.
    fn gather_feed_arg(
        &mut self,
        p: usize,
        class: ParamClass,
        bits: u64,
    ) -> Result<Option<Cell>, Unwind> {
        loop {
            let Some(next) = self.heap.feed_peek(p) else {
                return Ok(None);
            };
            if next.raw_kind() == Kind::Bar && !next.is_quoted() {
                return Ok(None);
            }
            let specifier = self.heap.frames[p].feed.specifier;
            match class {
                ParamClass::HardQuote => {
                    let cell = derelativize(next, specifier);
                    if bits & TS_SKIPPABLE != 0 && !type_check(&self.heap, bits, &cell) {
                        return Ok(Some(Cell::void()));
                    }
                    self.heap.feed_next(p);
                    return Ok(Some(cell));
                }
                ParamClass::SoftQuote => {
                    self.heap.feed_next(p);
                    let cell = derelativize(next, specifier);
                    if cell.is_quoted() {
                        return Ok(Some(cell));
                    }
                    let value = match cell.raw_kind() {
                        Kind::Group => match cell.series_at() {
                            Some((node, index)) => {
                                self.do_array(node, index, cell.binding())?.or_void()
                            }
                            None => Cell::void(),
                        },
                        Kind::GetWord => self.get_var(&cell)?,
                        Kind::GetPath => self.get_path(&cell)?,
                        _ => cell,
                    };
                    return Ok(Some(value));
                }
                _ => {
                    let mode = if class == ParamClass::Tight {
                        Lookahead::Tight
                    } else {
                        Lookahead::Defer
                    };
                    if let Outcome::Value(v) = self.eval_step(p, mode)? {
                        return Ok(Some(v));
                    }
                }
            }
        }
    }

    /// Recheck a frame's visible arguments against `phase`, after code
    /// that could have changed them ran.
    pub(crate) fn typecheck_frame(&mut self, fi: usize, phase: NodeId) -> Result<(), Unwind> {
        let mut refine = Refine::Ordinary;
        for (i, param) in self.params_of(phase).iter().enumerate() {
            let n = i + 1;
            let bits = param.typeset_bits().unwrap_or(0);
            let value = self.frame_arg(fi, n);
            match param.param_class() {
                Some(ParamClass::Refinement) => {
                    refine = if value.is_truthy() {
                        Refine::Using
                    } else {
                        Refine::Unused
                    };
                }
                Some(class) if class.takes_argument() => {
                    if bits & TS_HIDDEN != 0 || refine == Refine::Unused {
                        continue;
                    }
                    let checked = self.check_arg(fi, param, value)?;
                    if checked != value {
                        self.set_frame_arg(fi, n, checked)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
