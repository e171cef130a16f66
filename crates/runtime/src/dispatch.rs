//! Dispatchers
//!
//! Every action's details node names one dispatcher. Interpreted actions
//! get one chosen from the shape of their spec and body; derived actions
//! get the combinator that built them; natives get their table index.
//!
//! A dispatcher either produces the call's result or asks the evaluator to
//! run the same frame again under a different phase ([`Bounce::Redo`]).
//! Redo is how adapt, specialize, chain and hijack hand off without
//! building a new frame.

use crate::error::{Unwind, fail, ErrorId};
use crate::eval::Outcome;
use crate::interp::Interpreter;
use crate::typeset::type_check;
use ren_core::{Binding, Cell, DispatcherId, Kind, NodeId, ParamClass};

/// Native ids start here so they never collide with the built-in kinds.
const NATIVE_BASE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatcher {
    /// Empty body: result is void.
    Noop,
    /// Empty body of an invisible action.
    Commenter,
    /// Body result is the call's result.
    Unchecked,
    /// Body runs; result is void.
    Voider,
    /// Body result is checked against the `return:` types.
    Returner,
    /// Body runs; the call leaves no result.
    Elider,
    Adapter,
    Specializer,
    Chainer,
    Encloser,
    Hijacker,
    /// Generated `integer?`-style checker.
    DatatypeChecker,
    /// Generated `any-word?`-style checker.
    TypesetChecker,
    /// Index into the interpreter's native table.
    Native(u32),
}

impl Dispatcher {
    pub const fn id(self) -> DispatcherId {
        DispatcherId(match self {
            Dispatcher::Noop => 0,
            Dispatcher::Commenter => 1,
            Dispatcher::Unchecked => 2,
            Dispatcher::Voider => 3,
            Dispatcher::Returner => 4,
            Dispatcher::Elider => 5,
            Dispatcher::Adapter => 6,
            Dispatcher::Specializer => 7,
            Dispatcher::Chainer => 8,
            Dispatcher::Encloser => 9,
            Dispatcher::Hijacker => 10,
            Dispatcher::DatatypeChecker => 11,
            Dispatcher::TypesetChecker => 12,
            Dispatcher::Native(n) => NATIVE_BASE + n,
        })
    }

    pub const fn from_id(id: DispatcherId) -> Option<Self> {
        Some(match id.0 {
            0 => Dispatcher::Noop,
            1 => Dispatcher::Commenter,
            2 => Dispatcher::Unchecked,
            3 => Dispatcher::Voider,
            4 => Dispatcher::Returner,
            5 => Dispatcher::Elider,
            6 => Dispatcher::Adapter,
            7 => Dispatcher::Specializer,
            8 => Dispatcher::Chainer,
            9 => Dispatcher::Encloser,
            10 => Dispatcher::Hijacker,
            11 => Dispatcher::DatatypeChecker,
            12 => Dispatcher::TypesetChecker,
            n if n >= NATIVE_BASE => Dispatcher::Native(n - NATIVE_BASE),
            _ => return None,
        })
    }
}

/// What a dispatcher asks of the evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bounce {
    Out(Cell),
    /// No result; the previous value in the caller stands.
    Invisible,
    /// Run the frame again under `phase`. `checked` retypechecks the
    /// arguments against that phase first.
    Redo { phase: NodeId, checked: bool },
}

impl Interpreter {
    /// Run the dispatcher of `phase` for the action in frame `fi`.
    pub(crate) fn dispatch(&mut self, fi: usize, phase: NodeId) -> Result<Bounce, Unwind> {
        let Some(details) = self.details_of(phase) else {
            return fail(ErrorId::Internal, ["paramlist has no archetype"]);
        };
        let Some(dispatcher) = self.dispatcher_of(details) else {
            return fail(ErrorId::Internal, ["unknown dispatcher"]);
        };
        tracing::trace!(?dispatcher, frame = fi, "dispatch");

        match dispatcher {
            Dispatcher::Noop => Ok(Bounce::Out(Cell::void())),
            Dispatcher::Commenter => Ok(Bounce::Invisible),
            Dispatcher::Unchecked => {
                let out = self.run_body(fi, details)?;
                Ok(Bounce::Out(out.or_void()))
            }
            Dispatcher::Voider => {
                self.run_body(fi, details)?;
                Ok(Bounce::Out(Cell::void()))
            }
            Dispatcher::Returner => {
                let value = self.run_body(fi, details)?.or_void();
                self.check_return(fi, phase, &value)?;
                Ok(Bounce::Out(value))
            }
            Dispatcher::Elider => {
                self.run_body(fi, details)?;
                Ok(Bounce::Invisible)
            }
            Dispatcher::Adapter => self.dispatch_adapter(fi, details),
            Dispatcher::Specializer => self.dispatch_specializer(fi, details),
            Dispatcher::Chainer => self.dispatch_chainer(fi, details),
            Dispatcher::Encloser => self.dispatch_encloser(fi, details),
            Dispatcher::Hijacker => self.dispatch_hijacker(fi, details),
            Dispatcher::DatatypeChecker => {
                let Some(kind) = self.heap.cell_at(details, 0).and_then(|c| c.as_datatype()) else {
                    return fail(ErrorId::Internal, ["checker without datatype"]);
                };
                let value = self.frame_arg(fi, 1);
                Ok(Bounce::Out(Cell::logic(value.kind() == kind)))
            }
            Dispatcher::TypesetChecker => {
                let bits = self
                    .heap
                    .cell_at(details, 0)
                    .and_then(|c| c.typeset_bits())
                    .unwrap_or(0);
                let value = self.frame_arg(fi, 1);
                Ok(Bounce::Out(Cell::logic(type_check(&self.heap, bits, &value))))
            }
            Dispatcher::Native(n) => {
                let Some(native) = self.natives.get(n as usize).copied() else {
                    return fail(ErrorId::Internal, [format!("no native #{n}")]);
                };
                (native.run)(self, fi)
            }
        }
    }

    /// Run an interpreted body (`details[0]`) with the frame as specifier.
    fn run_body(&mut self, fi: usize, details: NodeId) -> Result<Outcome, Unwind> {
        let Some((body, index)) = self.heap.cell_at(details, 0).and_then(|c| c.series_at()) else {
            return fail(ErrorId::Internal, ["interpreted action without body"]);
        };
        let serial = self.heap.frames[fi].serial;
        self.do_array(body, index, Binding::Frame(serial))
    }

    /// Check a result against the types of `phase`'s `return:` slot.
    pub(crate) fn check_return(&self, fi: usize, phase: NodeId, value: &Cell) -> Result<(), Unwind> {
        let Some(bits) = self
            .heap
            .cells(phase)
            .last()
            .filter(|p| p.param_class() == Some(ParamClass::Return))
            .and_then(|p| p.typeset_bits())
        else {
            return Ok(());
        };
        let ok = if value.is_void() {
            bits & Kind::Void.bit() != 0
        } else {
            type_check(&self.heap, bits, value)
        };
        if ok {
            Ok(())
        } else {
            fail(
                ErrorId::BadReturnType,
                [self.frame_label(fi), value.kind().to_string()],
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_ids_round_trip() {
        for d in [
            Dispatcher::Noop,
            Dispatcher::Returner,
            Dispatcher::Hijacker,
            Dispatcher::TypesetChecker,
            Dispatcher::Native(0),
            Dispatcher::Native(41),
        ] {
            assert_eq!(Dispatcher::from_id(d.id()), Some(d));
        }
        assert_eq!(Dispatcher::from_id(DispatcherId(50)), None);
    }
}
