//! Typesets: 64-bit kind sets plus parameter pseudo-types
//!
//! The low bits are one per datatype ([`Kind::bit`]); the top byte holds
//! flags that only mean something on a parameter (`<opt>` is the void bit,
//! `<end>`, `<skip>`, `<...>` and `<blank>` are pseudo bits).

use crate::error::{Condition, ErrorId};
use crate::interp::Interpreter;
use ren_core::kind::{
    DATATYPES, TS_ENDABLE, TS_NOOP_IF_BLANK, TS_PSEUDO, TS_QUOTED_PATH, TS_QUOTED_WORD,
    TS_SKIPPABLE, TS_VARIADIC,
};
use ren_core::{Cell, Heap, Kind, ParamClass};

pub const fn union(a: u64, b: u64) -> u64 {
    a | b
}

pub const fn intersect(a: u64, b: u64) -> u64 {
    a & b
}

pub const fn difference(a: u64, b: u64) -> u64 {
    a & !b
}

/// Flip every kind bit; pseudo bits are kept, so this is an involution.
pub const fn complement(a: u64) -> u64 {
    a ^ !TS_PSEUDO
}

/// Does `bits` accept `value`?
pub fn type_check(heap: &Heap, bits: u64, value: &Cell) -> bool {
    if value.is_end() {
        return false;
    }
    if value.is_quoted() {
        if bits & Kind::Quoted.bit() != 0 {
            return true;
        }
        if heap.quote_depth(value) != 1 {
            return false;
        }
        let inner = heap.dequoted(value).raw_kind();
        return (inner.is_any_word() && bits & TS_QUOTED_WORD != 0)
            || (inner.is_any_path() && bits & TS_QUOTED_PATH != 0);
    }
    bits & value.raw_kind().bit() != 0
}

/// Datatypes whose bit is set, in kind order.
pub fn kinds_of(bits: u64) -> Vec<Kind> {
    DATATYPES
        .iter()
        .copied()
        .filter(|k| bits & k.bit() != 0)
        .collect()
}

/// Tag spellings accepted in type blocks and the bits they add.
fn tag_bits(tag: &str) -> Option<u64> {
    Some(match tag {
        "opt" => Kind::Void.bit(),
        "end" => TS_ENDABLE,
        "..." => TS_VARIADIC,
        "skip" => TS_SKIPPABLE | TS_ENDABLE,
        "blank" => TS_NOOP_IF_BLANK,
        _ => return None,
    })
}

impl Interpreter {
    /// Typeset described by a block of datatypes, typesets, words naming
    /// either, and parameter tags. `class` is the parameter the block
    /// belongs to, when there is one; `<skip>` needs a hard quote.
    pub(crate) fn make_typeset(
        &mut self,
        items: &[Cell],
        class: Option<ParamClass>,
    ) -> Result<u64, Condition> {
        let mut bits = 0u64;
        for item in items {
            bits |= self.typeset_item(item, class)?;
        }
        Ok(bits)
    }

    fn typeset_item(&mut self, item: &Cell, class: Option<ParamClass>) -> Result<u64, Condition> {
        let invalid = |me: &Self| {
            Condition::new(
                ErrorId::InvalidTypesetItem,
                [crate::mold::mold(&me.heap, item)],
            )
        };

        if item.is_quoted() {
            if self.heap.quote_depth(item) != 1 {
                return Err(invalid(self));
            }
            let inner = self.heap.dequoted(item);
            return match self.typeset_word_value(&inner).and_then(|v| v.as_datatype()) {
                Some(k) if k.is_any_word() => Ok(TS_QUOTED_WORD),
                Some(k) if k.is_any_path() => Ok(TS_QUOTED_PATH),
                _ => Err(invalid(self)),
            };
        }

        match item.raw_kind() {
            Kind::Datatype => item.as_datatype().map(Kind::bit).ok_or_else(|| invalid(self)),
            Kind::Typeset => item.typeset_bits().ok_or_else(|| invalid(self)),
            Kind::Tag => {
                let text = self.series_text(item);
                let bits = tag_bits(&text).ok_or_else(|| invalid(self))?;
                if bits & TS_SKIPPABLE != 0 && class != Some(ParamClass::HardQuote) {
                    return Err(Condition::new(
                        ErrorId::SkipNotHardQuote,
                        [crate::mold::mold(&self.heap, item)],
                    ));
                }
                Ok(bits)
            }
            Kind::Word => match self.typeset_word_value(item) {
                Some(v) if v.raw_kind() == Kind::Datatype && !v.is_quoted() => {
                    v.as_datatype().map(Kind::bit).ok_or_else(|| invalid(self))
                }
                Some(v) if v.raw_kind() == Kind::Typeset && !v.is_quoted() => {
                    v.typeset_bits().ok_or_else(|| invalid(self))
                }
                _ => Err(invalid(self)),
            },
            _ => Err(invalid(self)),
        }
    }

    /// A word in a type block: its binding if it has a usable one, else the
    /// library variable of the same name.
    fn typeset_word_value(&mut self, word: &Cell) -> Option<Cell> {
        if word.raw_kind() != Kind::Word {
            return None;
        }
        if let Ok(value) = self.get_var(word) {
            return Some(value);
        }
        let spelling = word.word_spelling()?;
        let name = self.heap.spelling(spelling).to_string();
        self.lib_value(&name)
    }

    /// Text of a string-kind series from its index on.
    pub(crate) fn series_text(&self, cell: &Cell) -> String {
        match cell.series_at() {
            Some((node, index)) => self.heap.text(node).get(index..).unwrap_or("").to_string(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ren_core::kind::{TS_ALL_KINDS, TS_NUMBER, TS_VALUE};

    #[test]
    fn test_algebra_laws() {
        let samples = [
            0u64,
            TS_NUMBER,
            TS_VALUE,
            TS_ALL_KINDS,
            Kind::Block.bit() | TS_ENDABLE,
            TS_VARIADIC | Kind::Integer.bit(),
        ];
        for a in samples {
            assert_eq!(complement(complement(a)), a);
            for b in samples {
                assert_eq!(union(a, b), union(b, a));
                assert_eq!(intersect(a, b), intersect(b, a));
                assert_eq!(difference(a, b) & b, 0);
                assert_eq!(union(difference(a, b), intersect(a, b)), a);
            }
        }
    }

    #[test]
    fn test_complement_keeps_pseudo_bits() {
        let a = Kind::Integer.bit() | TS_ENDABLE;
        let c = complement(a);
        assert_eq!(c & TS_ENDABLE, TS_ENDABLE);
        assert_eq!(c & Kind::Integer.bit(), 0);
        assert_ne!(c & Kind::Text.bit(), 0);
    }

    #[test]
    fn test_type_check_plain_and_quoted() {
        let mut heap = Heap::default();
        let word = Cell::word(heap.intern("x"));
        let quoted = heap.quotify(word, 1);
        let twice = heap.quotify(word, 2);

        assert!(type_check(&heap, Kind::Word.bit(), &word));
        assert!(!type_check(&heap, Kind::Word.bit(), &quoted));
        assert!(type_check(&heap, TS_QUOTED_WORD, &quoted));
        assert!(!type_check(&heap, TS_QUOTED_WORD, &twice));
        assert!(type_check(&heap, Kind::Quoted.bit(), &twice));
        assert!(!type_check(&heap, TS_ALL_KINDS, &Cell::end()));
        assert!(!type_check(&heap, TS_VALUE, &Cell::void()));
    }

    #[test]
    fn test_empty_typeset_accepts_nothing() {
        let mut it = Interpreter::new(crate::RuntimeConfig::default()).unwrap();
        let bits = it.make_typeset(&[], None).unwrap();
        let word = Cell::word(it.heap.intern("x"));
        for value in [Cell::integer(1), Cell::blank(), Cell::void(), word] {
            assert!(!type_check(&it.heap, bits, &value));
        }
        it.shutdown();
    }

    #[test]
    fn test_kinds_of() {
        assert_eq!(kinds_of(TS_NUMBER), vec![Kind::Integer, Kind::Decimal]);
        assert!(kinds_of(TS_ENDABLE).is_empty());
    }
}
