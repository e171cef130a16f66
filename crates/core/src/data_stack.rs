//! Data stack
//!
//! A contiguous, growable stack of cells shared by everything that needs
//! scratch space during evaluation: refinement ordering, chain pipelines,
//! block collection. The collector marks every live cell on it.
//!
//! ```text
//! ┌──────┬──────┬──────┬──────┬──────┐
//! │  c1  │  c2  │  c3  │  c4  │ ...  │
//! └──────┴──────┴──────┴──────┴──────┘
//!                              ↑ dsp
//! ```
//!
//! Slot 0 is never used, so a saved `dsp` of 0 means "empty" and indices
//! pushed after a saved position are `saved + 1 ..= dsp()`.

use crate::cell::Cell;

/// Initial slot count.
pub const DEFAULT_DATA_STACK_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct DataStack {
    cells: Vec<Cell>,
    /// Deepest the stack has been.
    peak: usize,
}

impl Default for DataStack {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_STACK_CAPACITY)
    }
}

impl DataStack {
    pub fn new(capacity: usize) -> Self {
        let mut cells = Vec::with_capacity(capacity.max(1));
        cells.push(Cell::end());
        DataStack { cells, peak: 0 }
    }

    /// Index of the topmost cell; 0 when empty.
    #[inline]
    pub fn dsp(&self) -> usize {
        self.cells.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dsp() == 0
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    #[inline]
    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
        if self.dsp() > self.peak {
            self.peak = self.dsp();
        }
    }

    /// Pop the top cell. `None` when empty.
    #[inline]
    pub fn pop(&mut self) -> Option<Cell> {
        if self.is_empty() {
            return None;
        }
        self.cells.pop()
    }

    #[inline]
    pub fn top(&self) -> Option<&Cell> {
        if self.is_empty() { None } else { self.cells.last() }
    }

    /// Cell at a 1-based position.
    #[inline]
    pub fn at(&self, index: usize) -> Option<&Cell> {
        if index == 0 { None } else { self.cells.get(index) }
    }

    #[inline]
    pub fn at_mut(&mut self, index: usize) -> Option<&mut Cell> {
        if index == 0 {
            None
        } else {
            self.cells.get_mut(index)
        }
    }

    /// Discard everything above `dsp`.
    ///
    /// # Panics
    /// Panics if `dsp` is above the current top, which means a caller lost
    /// track of its own pushes.
    pub fn drop_to(&mut self, dsp: usize) {
        assert!(
            dsp <= self.dsp(),
            "data stack drop to {dsp} above current top {}",
            self.dsp()
        );
        self.cells.truncate(dsp + 1);
    }

    /// Cells pushed since `dsp`, bottom first, removed from the stack.
    pub fn pop_to(&mut self, dsp: usize) -> Vec<Cell> {
        assert!(dsp <= self.dsp(), "data stack pop to {dsp} above current top");
        self.cells.split_off(dsp + 1)
    }

    /// Cells above `dsp`, bottom first.
    pub fn since(&self, dsp: usize) -> &[Cell] {
        &self.cells[(dsp + 1).min(self.cells.len())..]
    }

    /// Every live cell.
    pub fn live(&self) -> &[Cell] {
        &self.cells[1..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_basic_operations() {
        let mut stack = DataStack::new(4);
        assert!(stack.is_empty());
        assert_eq!(stack.pop(), None);

        stack.push(Cell::integer(1));
        stack.push(Cell::integer(2));
        assert_eq!(stack.dsp(), 2);
        assert_eq!(stack.top().and_then(Cell::as_integer), Some(2));
        assert_eq!(stack.at(1).and_then(Cell::as_integer), Some(1));
        assert_eq!(stack.at(0), None);
        assert_eq!(stack.pop().and_then(|c| c.as_integer()), Some(2));
        assert_eq!(stack.dsp(), 1);
    }

    #[test]
    fn test_stack_grows_past_capacity() {
        let mut stack = DataStack::new(2);
        for i in 0..1000 {
            stack.push(Cell::integer(i));
        }
        assert_eq!(stack.dsp(), 1000);
        assert_eq!(stack.peak(), 1000);
        assert_eq!(stack.at(1000).and_then(Cell::as_integer), Some(999));
    }

    #[test]
    fn test_drop_and_pop_to_saved_position() {
        let mut stack = DataStack::default();
        stack.push(Cell::integer(1));
        let saved = stack.dsp();
        stack.push(Cell::integer(2));
        stack.push(Cell::integer(3));
        assert_eq!(stack.since(saved).len(), 2);

        let popped = stack.pop_to(saved);
        let values: Vec<_> = popped.iter().filter_map(Cell::as_integer).collect();
        assert_eq!(values, vec![2, 3]);
        assert_eq!(stack.dsp(), saved);

        stack.push(Cell::blank());
        stack.drop_to(0);
        assert!(stack.is_empty());
        assert_eq!(stack.peak(), 3);
    }

    #[test]
    #[should_panic(expected = "above current top")]
    fn test_drop_to_above_top_panics() {
        let mut stack = DataStack::default();
        stack.drop_to(3);
    }
}
