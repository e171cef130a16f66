//! Path evaluation
//!
//! `a/b/c` starts from the value of `a` and picks `b`, then `c`. Picking a
//! word out of a context reads that field; picking an integer out of an
//! array or string indexes it from 1. Once an action is reached, the rest
//! of the path names refinements for the call.

use crate::context::derelativize;
use crate::error::{ErrorId, Unwind, fail};
use crate::eval::{ArgSource, Call, Outcome};
use crate::interp::Interpreter;
use crate::mold::mold;
use ren_core::{Cell, CellFlags, Kind};

impl Interpreter {
    fn path_items(&self, path: &Cell) -> Vec<Cell> {
        let Some((node, index)) = path.series_at() else {
            return Vec::new();
        };
        let specifier = path.binding();
        self.heap
            .cells(node)
            .get(index..)
            .unwrap_or_default()
            .iter()
            .map(|c| derelativize(*c, specifier))
            .collect()
    }

    fn path_head(&self, path: &Cell, items: &[Cell]) -> Result<Cell, Unwind> {
        let Some(head) = items.first() else {
            return fail(ErrorId::BadPath, [mold(&self.heap, path), String::new()]);
        };
        if !head.raw_kind().is_any_word() || head.is_quoted() {
            return fail(
                ErrorId::BadPath,
                [mold(&self.heap, path), mold(&self.heap, head)],
            );
        }
        let value = self.get_var(&head.with_kind(Kind::Word))?;
        if value.is_void() {
            return fail(ErrorId::NoValue, [mold(&self.heap, head)]);
        }
        Ok(value)
    }

    /// Evaluate a PATH!, calling the action it reaches with the remaining
    /// items as refinements.
    pub(crate) fn eval_path(&mut self, fi: usize, path: &Cell) -> Result<Outcome, Unwind> {
        let items = self.path_items(path);
        let mut current = self.path_head(path, &items)?;
        let mut label = items.first().and_then(Cell::word_spelling);
        let mut rest = 1;
        while rest < items.len() && !current.is_action() {
            current = self.pick(&current, &items[rest])?;
            label = items[rest].word_spelling().or(label);
            rest += 1;
        }
        if !current.is_action() {
            if current.is_void() {
                return fail(ErrorId::NoValue, [mold(&self.heap, path)]);
            }
            return Ok(Outcome::Value(current));
        }

        let dsp_base = self.heap.data_stack.dsp();
        for item in &items[rest..] {
            let Some(spelling) = item.word_spelling().filter(|_| item.raw_kind() == Kind::Word) else {
                self.heap.data_stack.drop_to(dsp_base);
                return fail(ErrorId::BadRefine, [mold(&self.heap, item)]);
            };
            self.heap
                .data_stack
                .push(Cell::any_word(Kind::Refinement, spelling));
        }
        // Reaching an enfixed action through a path calls it prefix.
        current.clear_flag(CellFlags::ENFIXED);
        self.call_action(Call {
            action: current,
            label,
            source: ArgSource::Feed(fi),
            left: None,
            dsp_base,
        })
    }

    /// Value a GET-PATH! names, without calling anything.
    pub(crate) fn get_path(&mut self, path: &Cell) -> Result<Cell, Unwind> {
        let items = self.path_items(path);
        let mut current = self.path_head(path, &items)?;
        for item in items.iter().skip(1) {
            current = self.pick(&current, item)?;
        }
        Ok(current)
    }

    pub(crate) fn set_path(&mut self, path: &Cell, value: Cell) -> Result<(), Unwind> {
        let items = self.path_items(path);
        let Some((last, inner)) = items.split_last() else {
            return fail(ErrorId::BadPath, [mold(&self.heap, path), String::new()]);
        };
        if inner.is_empty() {
            return fail(ErrorId::BadPath, [mold(&self.heap, path), mold(&self.heap, last)]);
        }
        let mut container = self.path_head(path, inner)?;
        for item in inner.iter().skip(1) {
            container = self.pick(&container, item)?;
        }
        self.poke(&container, last, value)
    }

    fn bad_pick<T>(&self, container: &Cell, picker: &Cell) -> Result<T, Unwind> {
        fail(
            ErrorId::BadPath,
            [container.kind().to_string(), mold(&self.heap, picker)],
        )
    }

    fn pick(&mut self, container: &Cell, picker: &Cell) -> Result<Cell, Unwind> {
        let kind = container.kind();
        if kind.is_any_context() {
            let Some(varlist) = container.context_varlist() else {
                return self.bad_pick(container, picker);
            };
            self.heap.check_accessible(varlist)?;
            let keys = self.context_keys(varlist)?;
            let index = picker
                .word_spelling()
                .filter(|_| picker.raw_kind().is_any_word())
                .and_then(|s| self.find_key(keys, s));
            return match index {
                Some(i) => Ok(self.heap.cell_at(varlist, i).unwrap_or_else(Cell::void)),
                None => self.bad_pick(container, picker),
            };
        }
        let Some(n) = picker.as_integer() else {
            return self.bad_pick(container, picker);
        };
        let Some((node, index)) = container.series_at() else {
            return self.bad_pick(container, picker);
        };
        let Some(at) = usize::try_from(n).ok().filter(|n| *n >= 1).map(|n| index + n - 1) else {
            return Ok(Cell::void());
        };
        if kind.is_any_array() {
            Ok(self
                .heap
                .cell_at(node, at)
                .map(|c| derelativize(c, container.binding()))
                .unwrap_or_else(Cell::void))
        } else if kind.is_any_string() {
            Ok(self
                .heap
                .text(node)
                .chars()
                .nth(at)
                .map_or_else(Cell::void, Cell::char))
        } else if kind == Kind::Binary {
            Ok(self
                .heap
                .bytes(node)
                .get(at)
                .map_or_else(Cell::void, |b| Cell::integer(i64::from(*b))))
        } else {
            self.bad_pick(container, picker)
        }
    }

    fn poke(&mut self, container: &Cell, picker: &Cell, value: Cell) -> Result<(), Unwind> {
        let kind = container.kind();
        if kind.is_any_context() {
            let Some(varlist) = container.context_varlist() else {
                return self.bad_pick(container, picker);
            };
            self.heap.check_accessible(varlist)?;
            let keys = self.context_keys(varlist)?;
            let Some(index) = picker
                .word_spelling()
                .filter(|_| picker.raw_kind().is_any_word())
                .and_then(|s| self.find_key(keys, s))
            else {
                return self.bad_pick(container, picker);
            };
            self.heap.set_cell(varlist, index, value)?;
            return Ok(());
        }
        if kind.is_any_array()
            && let (Some(n), Some((node, index))) = (picker.as_integer(), container.series_at())
            && let Some(at) = usize::try_from(n).ok().filter(|n| *n >= 1).map(|n| index + n - 1)
            && at < self.heap.len(node)
        {
            self.heap.set_cell(node, at, value)?;
            return Ok(());
        }
        self.bad_pick(container, picker)
    }
}
