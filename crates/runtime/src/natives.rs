//! Native actions
//!
//! Each native is a spec string plus a Rust function that reads its
//! arguments out of the running frame by position. The specs go through
//! the same paramlist builder as `func`, so natives typecheck, quote and
//! refine exactly like interpreted actions.

use crate::dispatch::Bounce;
use crate::error::{Condition, ErrorId, Thrown, Unwind, fail};
use crate::eval::{ArgSource, Call, Lookahead, Outcome};
use crate::interp::Interpreter;
use crate::mold::{form, mold};
use crate::paramlist::SpecOptions;
use crate::typeset::{self, type_check};
use ren_core::kind::{TS_HIDDEN, TS_VARIADIC};
use ren_core::{Binding, Cell, CellFlags, Feed, Keysource, Kind, NodeId, ParamClass, Subclass};

pub(crate) type NativeFn = fn(&mut Interpreter, usize) -> Result<Bounce, Unwind>;

#[derive(Clone, Copy)]
pub(crate) struct Native {
    pub name: &'static str,
    pub spec: &'static str,
    pub run: NativeFn,
    pub enfix: bool,
}

const fn native(name: &'static str, spec: &'static str, run: NativeFn) -> Native {
    Native {
        name,
        spec,
        run,
        enfix: false,
    }
}

const fn enfix(name: &'static str, spec: &'static str, run: NativeFn) -> Native {
    Native {
        name,
        spec,
        run,
        enfix: true,
    }
}

pub(crate) const NATIVES: &[Native] = &[
    // Actions
    native("func", r#"["Make an action with a definitional return" spec [block!] body [block!]]"#, n_func),
    native("proc", r#"["Make an action with a definitional leave" spec [block!] body [block!]]"#, n_proc),
    native("return", r#"["Return a value from the enclosing action" value [<opt> <end> any-value!]]"#, n_return),
    native("leave", r#"["Leave the enclosing action with no value"]"#, n_leave),
    native("adapt", r#"[adaptee [action! word! path!] prelude [block!]]"#, n_adapt),
    native("specialize", r#"[specializee [action! word! path!] def [block!]]"#, n_specialize),
    native("chain", r#"[pipeline [block!]]"#, n_chain),
    native("enclose", r#"[inner [action! word! path!] outer [action! word! path!]]"#, n_enclose),
    native("hijack", r#"[victim [word! path! action!] hijacker [action! word! path!]]"#, n_hijack),
    native("make-frame", r#"[action [action! word! path!]]"#, n_make_frame),
    native("enfix", r#"[action [action!]]"#, n_enfix),
    native("meta-of", r#"[action [action!]]"#, n_meta_of),
    native("parameters-of", r#"[action [action!]]"#, n_parameters_of),
    // Evaluation
    native("do", r#"[source [<opt> block! group! text! action! frame!]]"#, n_do),
    native("apply", r#"[action [action! word! path!] args [block!]]"#, n_apply),
    native("reduce", r#"[block [block!]]"#, n_reduce),
    native("comment", r#"["Ignore the argument" return: [] :discarded [block! any-string! binary! any-scalar!]]"#, n_comment),
    native("elide", r#"["Evaluate and discard the argument" return: [] discarded [<opt> any-value!]]"#, n_elide),
    native("quote", r#"[value [any-value!]]"#, n_quote),
    native("if", r#"[condition [<opt> any-value!] branch [block! action!]]"#, n_if),
    native("either", r#"[condition [<opt> any-value!] true-branch [block! action!] false-branch [block! action!]]"#, n_either),
    native("not", r#"[value [<opt> any-value!]]"#, n_not),
    native("trap", r#"[code [block! action!]]"#, n_trap),
    native("fail", r#"[reason [text! error!]]"#, n_fail),
    native("binding-of", r#"[word [any-word!]]"#, n_binding_of),
    native("object", r#"[spec [block!]]"#, n_object),
    // Math and comparison
    native("add", r#"[value1 [any-number!] value2 [any-number!]]"#, n_add),
    native("subtract", r#"[value1 [any-number!] value2 [any-number!]]"#, n_subtract),
    native("multiply", r#"[value1 [any-number!] value2 [any-number!]]"#, n_multiply),
    native("equal?", r#"[value1 [<opt> any-value!] value2 [<opt> any-value!]]"#, n_equal),
    enfix("+", r#"[#value1 [any-number!] #value2 [any-number!]]"#, n_add),
    enfix("-", r#"[#value1 [any-number!] #value2 [any-number!]]"#, n_subtract),
    enfix("*", r#"[#value1 [any-number!] #value2 [any-number!]]"#, n_multiply),
    enfix("=", r#"[#value1 [<opt> any-value!] #value2 [<opt> any-value!]]"#, n_equal),
    // Series
    native("append", r#"[series [block! any-string! binary!] value [<opt> any-value!] /only /dup count [integer!]]"#, n_append),
    native("length-of", r#"[series [any-series!]]"#, n_length_of),
    native("take", r#"[series [block! varargs!]]"#, n_take),
    native("mold", r#"[value [<opt> any-value!]]"#, n_mold),
    native("print", r#"[value [<opt> any-value!]]"#, n_print),
    // Typesets
    native("make-typeset", r#"[spec [block!]]"#, n_make_typeset),
    native("union", r#"[set1 [typeset!] set2 [typeset!]]"#, n_union),
    native("intersect", r#"[set1 [typeset!] set2 [typeset!]]"#, n_intersect),
    native("difference", r#"[set1 [typeset!] set2 [typeset!]]"#, n_difference),
    native("complement", r#"[set [typeset!]]"#, n_complement),
    // Memory
    native("recycle", r#"["Run the garbage collector" /off /on]"#, n_recycle),
];

// =============================================================================
// Helpers
// =============================================================================

impl Interpreter {
    fn arg(&self, fi: usize, n: usize) -> Cell {
        self.frame_arg(fi, n)
    }

    fn flag(&self, fi: usize, n: usize) -> bool {
        self.frame_arg(fi, n).is_truthy()
    }

    /// An action named by an argument: the action itself, a word holding
    /// one, or a path naming one plus refinements.
    fn action_arg(&mut self, value: &Cell) -> Result<(Cell, Option<NodeId>, Vec<NodeId>), Unwind> {
        if value.is_action() {
            return Ok((*value, None, Vec::new()));
        }
        match value.kind() {
            Kind::Word => {
                let action = self.get_var(value)?;
                if !action.is_action() {
                    return fail(ErrorId::NotAction, [mold(&self.heap, value)]);
                }
                Ok((action, value.word_spelling(), Vec::new()))
            }
            Kind::Path => {
                let Some((node, index)) = value.series_at() else {
                    return fail(ErrorId::NotAction, [mold(&self.heap, value)]);
                };
                let items: Vec<Cell> = self
                    .heap
                    .cells(node)
                    .get(index..)
                    .unwrap_or_default()
                    .iter()
                    .map(|c| crate::context::derelativize(*c, value.binding()))
                    .collect();
                let Some(head) = items.first() else {
                    return fail(ErrorId::NotAction, [mold(&self.heap, value)]);
                };
                let action = self.get_var(head)?;
                if !action.is_action() {
                    return fail(ErrorId::NotAction, [mold(&self.heap, head)]);
                }
                let mut refinements = Vec::new();
                for item in &items[1..] {
                    match item.word_spelling().filter(|_| item.raw_kind() == Kind::Word) {
                        Some(s) => refinements.push(s),
                        None => return fail(ErrorId::BadRefine, [mold(&self.heap, item)]),
                    }
                }
                Ok((action, head.word_spelling(), refinements))
            }
            _ => fail(ErrorId::NotAction, [mold(&self.heap, value)]),
        }
    }

    /// Run a branch: a block is evaluated, an action is called with no
    /// arguments.
    fn run_branch(&mut self, branch: &Cell) -> Result<Cell, Unwind> {
        if branch.is_action() {
            return Ok(self.call_with(*branch, Vec::new())?.or_void());
        }
        match branch.series_at() {
            Some((node, index)) => Ok(self.do_array(node, index, branch.binding())?.or_void()),
            None => Ok(Cell::void()),
        }
    }

    /// Evaluate each expression of a block, collecting the results. The
    /// results sit on the data stack while later expressions run.
    pub(crate) fn reduce_values(
        &mut self,
        node: NodeId,
        index: usize,
        specifier: Binding,
    ) -> Result<Vec<Cell>, Unwind> {
        self.enter_level()?;
        let dsp = self.heap.data_stack.dsp();
        let fi = self.heap.push_frame(Feed::array(node, index, specifier));
        let mut result = Ok(());
        while !self.heap.feed_at_end(fi) {
            match self.eval_step(fi, Lookahead::Full) {
                Ok(Outcome::Value(v)) => self.heap.data_stack.push(v),
                Ok(Outcome::Invisible) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.heap.pop_frame(result.is_err());
        self.depth -= 1;
        let values = self.heap.data_stack.pop_to(dsp);
        result.map(|()| values)
    }

    fn block_arg(&mut self, cell: &Cell) -> Result<Vec<Cell>, Unwind> {
        match cell.series_at() {
            Some((node, index)) => self.reduce_values(node, index, cell.binding()),
            None => Ok(Vec::new()),
        }
    }

    /// ERROR! object describing a condition.
    pub(crate) fn error_object(&mut self, condition: &Condition) -> Cell {
        let varlist = self.make_context(Kind::Error, self.error_keys);
        let kind = self.heap.intern(condition.category().name());
        let id = self.heap.intern(condition.id.name());
        let message = self.heap.make_string(&condition.message());
        let fields = [Cell::word(kind), Cell::word(id), Cell::text(message)];
        for (i, field) in fields.into_iter().enumerate() {
            // Fresh varlist: the slots exist and are accessible.
            let _ = self.heap.set_cell(varlist, i + 1, field);
        }
        Cell::context(Kind::Error, varlist)
    }

    /// Values equal the way `=` sees them: numbers by value, text and
    /// words without regard to case, blocks item by item.
    pub(crate) fn values_equal(&self, a: &Cell, b: &Cell) -> bool {
        let mut pending = vec![(*a, *b)];
        while let Some((a, b)) = pending.pop() {
            if a.is_quoted() || b.is_quoted() {
                if self.heap.quote_depth(&a) != self.heap.quote_depth(&b) {
                    return false;
                }
                pending.push((self.heap.dequoted(&a), self.heap.dequoted(&b)));
                continue;
            }
            let (ka, kb) = (a.raw_kind(), b.raw_kind());
            if let (Some(x), Some(y)) = (number(&a), number(&b)) {
                if x != y {
                    return false;
                }
                continue;
            }
            if ka != kb {
                return false;
            }
            if ka.is_any_word() {
                let same = match (a.word_spelling(), b.word_spelling()) {
                    (Some(x), Some(y)) => self.heap.same_spelling(x, y),
                    _ => false,
                };
                if !same {
                    return false;
                }
            } else if ka.is_any_string() {
                if self.series_text(&a).to_lowercase() != self.series_text(&b).to_lowercase() {
                    return false;
                }
            } else if ka.is_any_array() {
                let (Some((na, ia)), Some((nb, ib))) = (a.series_at(), b.series_at()) else {
                    return false;
                };
                let xs = self.heap.cells(na).get(ia..).unwrap_or_default();
                let ys = self.heap.cells(nb).get(ib..).unwrap_or_default();
                if xs.len() != ys.len() {
                    return false;
                }
                pending.extend(xs.iter().copied().zip(ys.iter().copied()));
            } else if a.payload() != b.payload() {
                return false;
            }
        }
        true
    }
}

fn number(cell: &Cell) -> Option<f64> {
    if cell.is_quoted() {
        return None;
    }
    match cell.raw_kind() {
        Kind::Integer => cell.as_integer().map(|i| i as f64),
        Kind::Decimal => cell.as_decimal(),
        _ => None,
    }
}

fn out(cell: Cell) -> Result<Bounce, Unwind> {
    Ok(Bounce::Out(cell))
}

// =============================================================================
// Actions
// =============================================================================

fn n_func(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let (spec, body) = (it.arg(fi, 1), it.arg(fi, 2));
    out(it.make_interpreted(&spec, &body, SpecOptions::func())?)
}

fn n_proc(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let (spec, body) = (it.arg(fi, 1), it.arg(fi, 2));
    out(it.make_interpreted(&spec, &body, SpecOptions::proc())?)
}

/// Frame an exit native is bound to, if that call is still running.
fn exit_target(it: &Interpreter, fi: usize, name: &str) -> Result<(usize, ren_core::FrameSerial), Unwind> {
    let binding = it.heap.frames[fi].action.as_ref().map(|a| a.binding);
    let Some(Binding::Frame(target)) = binding else {
        return fail(ErrorId::ReturnOutsideAction, [name]);
    };
    match it.heap.frame_index(target) {
        Some(tfi) => Ok((tfi, target)),
        None => fail(ErrorId::ExpiredFrame, [name]),
    }
}

fn n_return(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let value = it.arg(fi, 1);
    let (tfi, target) = exit_target(it, fi, "return")?;
    if let Some(phase) = it.heap.frames[tfi].action.as_ref().map(|a| a.phase) {
        it.check_return(tfi, phase, &value)?;
    }
    let mut label = it.return_native;
    label.set_binding(Binding::Frame(target));
    Err(Unwind::Throw(Thrown { label, value }))
}

fn n_leave(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let (_, target) = exit_target(it, fi, "leave")?;
    let mut label = it.leave_native;
    label.set_binding(Binding::Frame(target));
    Err(Unwind::Throw(Thrown {
        label,
        value: Cell::void(),
    }))
}

fn n_adapt(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let arg1 = it.arg(fi, 1);
    let (adaptee, _, refinements) = it.action_arg(&arg1)?;
    if !refinements.is_empty() {
        return fail(ErrorId::InvalidArg, [mold(&it.heap, &it.arg(fi, 1))]);
    }
    let prelude = it.arg(fi, 2);
    out(it.adapt(adaptee, &prelude)?)
}

fn n_specialize(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let arg1 = it.arg(fi, 1);
    let (specializee, label, refinements) = it.action_arg(&arg1)?;
    let def = it.arg(fi, 2);
    out(it.specialize(specializee, label, &def, &refinements)?)
}

fn n_chain(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let arg1 = it.arg(fi, 1);
    let pipeline = it.block_arg(&arg1)?;
    let mut stages = Vec::with_capacity(pipeline.len());
    for stage in &pipeline {
        stages.push(it.action_arg(stage)?.0);
    }
    out(it.chain(stages)?)
}

fn n_enclose(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let arg1 = it.arg(fi, 1);
    let (inner, _, _) = it.action_arg(&arg1)?;
    let arg2 = it.arg(fi, 2);
    let (outer, _, _) = it.action_arg(&arg2)?;
    out(it.enclose(inner, outer)?)
}

fn n_hijack(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let arg1 = it.arg(fi, 1);
    let (victim, _, _) = it.action_arg(&arg1)?;
    let arg2 = it.arg(fi, 2);
    let (hijacker, _, _) = it.action_arg(&arg2)?;
    out(it.hijack(victim, hijacker)?)
}

fn n_make_frame(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let arg1 = it.arg(fi, 1);
    let (action, _, _) = it.action_arg(&arg1)?;
    out(it.make_frame(&action)?)
}

fn n_enfix(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let mut action = it.arg(fi, 1);
    action.set_flag(CellFlags::ENFIXED);
    out(action)
}

fn n_meta_of(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let action = it.arg(fi, 1);
    let meta = action
        .action_nodes()
        .and_then(|(p, _)| it.paramlist_meta(p))
        .and_then(|m| it.heap.cell_at(m, 0));
    out(meta.unwrap_or_else(Cell::void))
}

fn n_parameters_of(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let action = it.arg(fi, 1);
    let Some((paramlist, _)) = action.action_nodes() else {
        return out(Cell::void());
    };
    let facade = it.facade(paramlist);
    let mut words = Vec::new();
    for param in it.params_of(facade) {
        let bits = param.typeset_bits().unwrap_or(0);
        let Some(spelling) = param.key_spelling() else { continue };
        if bits & TS_HIDDEN != 0 {
            continue;
        }
        let word = match param.param_class() {
            Some(ParamClass::Normal) => Cell::word(spelling),
            Some(ParamClass::Tight) => Cell::any_word(Kind::Issue, spelling),
            Some(ParamClass::HardQuote) => Cell::any_word(Kind::GetWord, spelling),
            Some(ParamClass::SoftQuote) => it.heap.quotify(Cell::word(spelling), 1),
            Some(ParamClass::Refinement) => Cell::any_word(Kind::Refinement, spelling),
            _ => continue,
        };
        words.push(word);
    }
    let block = it.heap.make_managed_array(Subclass::Array, words);
    out(Cell::block(block))
}

// =============================================================================
// Evaluation
// =============================================================================

fn n_do(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let source = it.arg(fi, 1);
    match source.kind() {
        Kind::Void => out(Cell::void()),
        Kind::Block | Kind::Group => match source.series_at() {
            Some((node, index)) => match it.do_array(node, index, source.binding())? {
                Outcome::Value(v) => out(v),
                Outcome::Invisible => out(Cell::void()),
            },
            None => out(Cell::void()),
        },
        Kind::Text => {
            let text = it.series_text(&source);
            let block = it.load(&text)?;
            it.heap.frames[fi].spare = Cell::block(block);
            out(it.do_array(block, 0, Binding::Unbound)?.or_void())
        }
        Kind::Action => out(it.call_with(source, Vec::new())?.or_void()),
        Kind::Frame => {
            let (Some(varlist), Some(phase)) = (source.context_varlist(), source.frame_phase()) else {
                return fail(ErrorId::InvalidArg, [mold(&it.heap, &source)]);
            };
            it.heap.check_accessible(varlist)?;
            if matches!(
                it.heap.subclass(varlist),
                Subclass::Varlist {
                    keysource: Keysource::Frame(_),
                    ..
                }
            ) {
                // A running call's own frame cannot be run again.
                return fail(ErrorId::InvalidArg, [mold(&it.heap, &source)]);
            }
            let mut action = it.archetype(phase);
            action.set_binding(source.binding());
            let dsp = it.heap.data_stack.dsp();
            let result = it.call_action(Call {
                action,
                label: None,
                source: ArgSource::Frame(varlist),
                left: None,
                dsp_base: dsp,
            })?;
            out(result.or_void())
        }
        _ => fail(ErrorId::InvalidArg, [mold(&it.heap, &source)]),
    }
}

fn n_apply(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let arg1 = it.arg(fi, 1);
    let (action, label, refinements) = it.action_arg(&arg1)?;
    let arg2 = it.arg(fi, 2);
    let values = it.block_arg(&arg2)?;
    let dsp = it.heap.data_stack.dsp();
    for r in refinements {
        it.heap.data_stack.push(Cell::any_word(Kind::Refinement, r));
    }
    let result = it.call_action(Call {
        action,
        label,
        source: ArgSource::Values(values),
        left: None,
        dsp_base: dsp,
    })?;
    out(result.or_void())
}

fn n_reduce(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let arg1 = it.arg(fi, 1);
    let values = it.block_arg(&arg1)?;
    let block = it.heap.make_managed_array(Subclass::Array, values);
    out(Cell::block(block))
}

fn n_comment(_: &mut Interpreter, _: usize) -> Result<Bounce, Unwind> {
    Ok(Bounce::Invisible)
}

fn n_elide(_: &mut Interpreter, _: usize) -> Result<Bounce, Unwind> {
    Ok(Bounce::Invisible)
}

fn n_quote(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let value = it.arg(fi, 1);
    out(it.heap.quotify(value, 1))
}

fn n_if(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    if it.flag(fi, 1) {
        let branch = it.arg(fi, 2);
        out(it.run_branch(&branch)?)
    } else {
        out(Cell::void())
    }
}

fn n_either(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let branch = if it.flag(fi, 1) { it.arg(fi, 2) } else { it.arg(fi, 3) };
    out(it.run_branch(&branch)?)
}

fn n_not(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    out(Cell::logic(!it.flag(fi, 1)))
}

fn n_trap(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let code = it.arg(fi, 1);
    let guards = it.heap.guard_depth();
    match it.run_branch(&code) {
        Ok(_) => out(Cell::void()),
        Err(Unwind::Fail(condition)) => {
            while it.heap.guard_depth() > guards {
                it.heap.drop_guard();
            }
            tracing::debug!(error = %condition, "trapped");
            out(it.error_object(&condition))
        }
        Err(thrown) => Err(thrown),
    }
}

fn n_fail(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let reason = it.arg(fi, 1);
    let message = if reason.kind() == Kind::Error {
        let varlist = reason.context_varlist();
        varlist
            .and_then(|v| it.heap.cell_at(v, 3))
            .map_or_else(String::new, |m| it.series_text(&m))
    } else {
        it.series_text(&reason)
    };
    fail(ErrorId::UserFail, [message])
}

fn n_binding_of(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let word = it.arg(fi, 1);
    match word.binding() {
        Binding::Context(varlist) if it.heap.is_accessible(varlist) => {
            out(it.heap.cell_at(varlist, 0).unwrap_or_else(Cell::void))
        }
        Binding::Frame(serial) => match it.heap.frame_index(serial) {
            Some(target) => out(it.reify_frame(target)?),
            None => fail(ErrorId::ExpiredFrame, [mold(&it.heap, &word)]),
        },
        _ => out(Cell::void()),
    }
}

fn n_object(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let spec = it.arg(fi, 1);
    let Some((node, index)) = spec.series_at() else {
        return out(Cell::void());
    };
    let mut names: Vec<NodeId> = Vec::new();
    for cell in it.heap.cells(node).get(index..).unwrap_or_default() {
        if cell.raw_kind() == Kind::SetWord && !cell.is_quoted()
            && let Some(s) = cell.word_spelling()
        {
            let canon = it.heap.canon(s);
            if !names.iter().any(|n| it.heap.canon(*n) == canon) {
                names.push(s);
            }
        }
    }
    let keylist = it.make_keylist(&names);
    let varlist = it.make_context(Kind::Object, keylist);
    it.heap.frames[fi].spare = Cell::context(Kind::Object, varlist);
    it.bind_deep(node, varlist, false)?;
    it.do_array(node, index, spec.binding())?;
    out(Cell::context(Kind::Object, varlist))
}

// =============================================================================
// Math and comparison
// =============================================================================

fn arithmetic(
    it: &Interpreter,
    fi: usize,
    int_op: fn(i64, i64) -> Option<i64>,
    dec_op: fn(f64, f64) -> f64,
) -> Result<Bounce, Unwind> {
    let (a, b) = (it.arg(fi, 1), it.arg(fi, 2));
    if let (Some(x), Some(y)) = (a.as_integer(), b.as_integer()) {
        return match int_op(x, y) {
            Some(r) => out(Cell::integer(r)),
            None => fail(ErrorId::Overflow, Vec::<String>::new()),
        };
    }
    match (number(&a), number(&b)) {
        (Some(x), Some(y)) => {
            let r = dec_op(x, y);
            if r.is_finite() {
                out(Cell::decimal(r))
            } else {
                fail(ErrorId::Overflow, Vec::<String>::new())
            }
        }
        _ => fail(ErrorId::InvalidArg, [mold(&it.heap, &a)]),
    }
}

fn n_add(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    arithmetic(it, fi, i64::checked_add, |x, y| x + y)
}

fn n_subtract(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    arithmetic(it, fi, i64::checked_sub, |x, y| x - y)
}

fn n_multiply(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    arithmetic(it, fi, i64::checked_mul, |x, y| x * y)
}

fn n_equal(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let (a, b) = (it.arg(fi, 1), it.arg(fi, 2));
    out(Cell::logic(it.values_equal(&a, &b)))
}

// =============================================================================
// Series
// =============================================================================

fn n_append(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let series = it.arg(fi, 1);
    let value = it.arg(fi, 2);
    let only = it.flag(fi, 3);
    let times = if it.flag(fi, 4) {
        it.arg(fi, 5).as_integer().unwrap_or(1).max(0)
    } else {
        1
    };
    let Some((node, _)) = series.series_at() else {
        return out(series);
    };
    if value.is_void() {
        return out(series);
    }

    match series.kind() {
        Kind::Block => {
            let items: Vec<Cell> = if value.kind() == Kind::Block && !only {
                value
                    .series_at()
                    .map(|(n, i)| {
                        it.heap
                            .cells(n)
                            .get(i..)
                            .unwrap_or_default()
                            .iter()
                            .map(|c| crate::context::derelativize(*c, value.binding()))
                            .collect()
                    })
                    .unwrap_or_default()
            } else {
                vec![value]
            };
            for _ in 0..times {
                for item in &items {
                    it.heap.append(node, *item)?;
                }
            }
        }
        Kind::Binary => {
            let bytes: Vec<u8> = match value.kind() {
                Kind::Integer => match value.as_integer().and_then(|i| u8::try_from(i).ok()) {
                    Some(b) => vec![b],
                    None => return fail(ErrorId::InvalidArg, [mold(&it.heap, &value)]),
                },
                Kind::Binary => value
                    .series_at()
                    .map(|(n, i)| it.heap.bytes(n).get(i..).unwrap_or_default().to_vec())
                    .unwrap_or_default(),
                _ => form(&it.heap, &value).into_bytes(),
            };
            for _ in 0..times {
                it.heap.append_bytes(node, &bytes)?;
            }
        }
        _ => {
            let text = form(&it.heap, &value);
            for _ in 0..times {
                it.heap.append_bytes(node, text.as_bytes())?;
            }
        }
    }
    out(series)
}

fn n_length_of(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let series = it.arg(fi, 1);
    let Some((node, index)) = series.series_at() else {
        return out(Cell::integer(0));
    };
    let kind = series.kind();
    let len = if kind.is_any_string() {
        it.heap.text(node).chars().count()
    } else if kind == Kind::Binary {
        it.heap.bytes(node).len()
    } else {
        it.heap.len(node)
    };
    out(Cell::integer(len.saturating_sub(index) as i64))
}

fn n_take(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let series = it.arg(fi, 1);
    if let Some((serial, param)) = series.as_varargs() {
        return take_vararg(it, serial, param);
    }
    let Some((node, index)) = series.series_at() else {
        return out(Cell::void());
    };
    if index >= it.heap.len(node) {
        return out(Cell::void());
    }
    let taken = it.heap.remove_at(node, index)?;
    out(crate::context::derelativize(taken, series.binding()))
}

/// Next value for a variadic parameter, read from the feed of the frame
/// that called the action owning it.
fn take_vararg(it: &mut Interpreter, serial: ren_core::FrameSerial, n: usize) -> Result<Bounce, Unwind> {
    let Some(owner) = it.heap.frame_index(serial) else {
        return fail(ErrorId::ExpiredFrame, ["varargs"]);
    };
    let Some(state) = it.heap.frames[owner].action.as_ref() else {
        return out(Cell::void());
    };
    let (original, caller) = (state.original, state.caller);
    let Some(param) = it.heap.cell_at(original, n) else {
        return out(Cell::void());
    };
    let Some(p) = caller.and_then(|s| it.heap.frame_index(s)) else {
        return out(Cell::void());
    };
    let at_end = match it.heap.feed_peek(p) {
        None => true,
        Some(next) => next.raw_kind() == Kind::Bar && !next.is_quoted(),
    };
    if at_end {
        return out(Cell::void());
    }
    let value = match param.param_class() {
        Some(ParamClass::HardQuote) => {
            let specifier = it.heap.frames[p].feed.specifier;
            let raw = it.heap.feed_next(p).unwrap_or_else(Cell::void);
            crate::context::derelativize(raw, specifier)
        }
        Some(ParamClass::Tight) => it.eval_step(p, Lookahead::Tight)?.or_void(),
        _ => it.eval_step(p, Lookahead::Defer)?.or_void(),
    };
    let bits = param.typeset_bits().unwrap_or(0) & !TS_VARIADIC;
    if !value.is_void() && !type_check(&it.heap, bits, &value) {
        let label = it.frame_label(owner);
        let name = param
            .key_spelling()
            .map_or_else(String::new, |s| it.heap.spelling(s).to_string());
        return fail(ErrorId::ArgType, [label, name, value.kind().to_string()]);
    }
    out(value)
}

fn n_mold(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let value = it.arg(fi, 1);
    let text = mold(&it.heap, &value);
    let node = it.heap.make_string(&text);
    out(Cell::text(node))
}

fn n_print(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let value = it.arg(fi, 1);
    let line = if value.kind() == Kind::Block {
        let values = it.block_arg(&value)?;
        values
            .iter()
            .map(|v| form(&it.heap, v))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        form(&it.heap, &value)
    };
    tracing::debug!(%line, "print");
    it.output.push(line);
    out(Cell::void())
}

// =============================================================================
// Typesets
// =============================================================================

fn n_make_typeset(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let spec = it.arg(fi, 1);
    let items: Vec<Cell> = spec
        .series_at()
        .map(|(n, i)| it.heap.cells(n).get(i..).unwrap_or_default().to_vec())
        .unwrap_or_default();
    out(Cell::typeset(it.make_typeset(&items, None)?))
}

fn typeset_pair(it: &Interpreter, fi: usize) -> (u64, u64) {
    (
        it.arg(fi, 1).typeset_bits().unwrap_or(0),
        it.arg(fi, 2).typeset_bits().unwrap_or(0),
    )
}

fn n_union(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let (a, b) = typeset_pair(it, fi);
    out(Cell::typeset(typeset::union(a, b)))
}

fn n_intersect(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let (a, b) = typeset_pair(it, fi);
    out(Cell::typeset(typeset::intersect(a, b)))
}

fn n_difference(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let (a, b) = typeset_pair(it, fi);
    out(Cell::typeset(typeset::difference(a, b)))
}

fn n_complement(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    let a = it.arg(fi, 1).typeset_bits().unwrap_or(0);
    out(Cell::typeset(typeset::complement(a)))
}

// =============================================================================
// Memory
// =============================================================================

fn n_recycle(it: &mut Interpreter, fi: usize) -> Result<Bounce, Unwind> {
    if it.flag(fi, 1) {
        it.heap.disable_gc();
        return out(Cell::void());
    }
    if it.flag(fi, 2) {
        it.heap.enable_gc();
        return out(Cell::void());
    }
    let swept = it.heap.recycle().map_or(0, |r| r.swept);
    out(Cell::integer(swept as i64))
}
