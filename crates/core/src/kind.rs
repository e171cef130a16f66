//! Value kinds, parameter classes and typeset bit constants
//!
//! Every cell carries a one-byte kind. Ordinary datatypes occupy the low
//! values and each owns one bit of a 64-bit typeset. Parameter classes reuse
//! the same byte to say "this cell is a parameter of class X" and so can
//! never be confused with a plain typeset. The top eight bits of a typeset
//! are pseudo-types describing parameter properties rather than datatypes.
//!
//! ```text
//!  0 ........................ 32 | 48 ........ 55 | 56 ........... 63
//!  datatype kinds (typeset bits)  | param classes  | pseudo-type bits
//! ```

use std::fmt;

/// One byte describing how a cell's payload is interpreted.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    End = 0,
    Action = 1,
    Word = 2,
    SetWord = 3,
    GetWord = 4,
    Refinement = 5,
    Issue = 6,
    Path = 7,
    SetPath = 8,
    GetPath = 9,
    Block = 10,
    Group = 11,
    Text = 12,
    Binary = 13,
    Tag = 14,
    Integer = 15,
    Decimal = 16,
    Logic = 17,
    Char = 18,
    Pair = 19,
    Blank = 20,
    Bar = 21,
    Datatype = 22,
    Typeset = 23,
    Object = 24,
    Frame = 25,
    Module = 26,
    Error = 27,
    Map = 28,
    Varargs = 29,
    Handle = 30,
    Quoted = 31,
    Void = 32,

    ParamNormal = 48,
    ParamTight = 49,
    ParamHardQuote = 50,
    ParamSoftQuote = 51,
    ParamRefinement = 52,
    ParamLocal = 53,
    ParamReturn = 54,
    ParamLeave = 55,
}

/// Datatypes that have a `name!` word in the library context.
pub const DATATYPES: [Kind; 32] = [
    Kind::Action,
    Kind::Word,
    Kind::SetWord,
    Kind::GetWord,
    Kind::Refinement,
    Kind::Issue,
    Kind::Path,
    Kind::SetPath,
    Kind::GetPath,
    Kind::Block,
    Kind::Group,
    Kind::Text,
    Kind::Binary,
    Kind::Tag,
    Kind::Integer,
    Kind::Decimal,
    Kind::Logic,
    Kind::Char,
    Kind::Pair,
    Kind::Blank,
    Kind::Bar,
    Kind::Datatype,
    Kind::Typeset,
    Kind::Object,
    Kind::Frame,
    Kind::Module,
    Kind::Error,
    Kind::Map,
    Kind::Varargs,
    Kind::Handle,
    Kind::Quoted,
    Kind::Void,
];

impl Kind {
    /// Typeset bit for this kind. Parameter classes have no bit.
    #[inline]
    pub const fn bit(self) -> u64 {
        let n = self as u8;
        if n < 48 { 1u64 << n } else { 0 }
    }

    #[inline]
    pub const fn is_param_class(self) -> bool {
        (self as u8) >= 48
    }

    pub const fn param_class(self) -> Option<ParamClass> {
        Some(match self {
            Kind::ParamNormal => ParamClass::Normal,
            Kind::ParamTight => ParamClass::Tight,
            Kind::ParamHardQuote => ParamClass::HardQuote,
            Kind::ParamSoftQuote => ParamClass::SoftQuote,
            Kind::ParamRefinement => ParamClass::Refinement,
            Kind::ParamLocal => ParamClass::Local,
            Kind::ParamReturn => ParamClass::Return,
            Kind::ParamLeave => ParamClass::Leave,
            _ => return None,
        })
    }

    pub const fn is_any_word(self) -> bool {
        matches!(
            self,
            Kind::Word | Kind::SetWord | Kind::GetWord | Kind::Refinement | Kind::Issue
        )
    }

    pub const fn is_any_path(self) -> bool {
        matches!(self, Kind::Path | Kind::SetPath | Kind::GetPath)
    }

    pub const fn is_any_array(self) -> bool {
        matches!(
            self,
            Kind::Block | Kind::Group | Kind::Path | Kind::SetPath | Kind::GetPath
        )
    }

    pub const fn is_any_string(self) -> bool {
        matches!(self, Kind::Text | Kind::Tag)
    }

    pub const fn is_any_series(self) -> bool {
        self.is_any_array() || self.is_any_string() || matches!(self, Kind::Binary)
    }

    pub const fn is_any_context(self) -> bool {
        matches!(self, Kind::Object | Kind::Frame | Kind::Module | Kind::Error)
    }

    /// Lowercase name without the trailing `!`.
    pub const fn name(self) -> &'static str {
        match self {
            Kind::End => "end",
            Kind::Action => "action",
            Kind::Word => "word",
            Kind::SetWord => "set-word",
            Kind::GetWord => "get-word",
            Kind::Refinement => "refinement",
            Kind::Issue => "issue",
            Kind::Path => "path",
            Kind::SetPath => "set-path",
            Kind::GetPath => "get-path",
            Kind::Block => "block",
            Kind::Group => "group",
            Kind::Text => "text",
            Kind::Binary => "binary",
            Kind::Tag => "tag",
            Kind::Integer => "integer",
            Kind::Decimal => "decimal",
            Kind::Logic => "logic",
            Kind::Char => "char",
            Kind::Pair => "pair",
            Kind::Blank => "blank",
            Kind::Bar => "bar",
            Kind::Datatype => "datatype",
            Kind::Typeset => "typeset",
            Kind::Object => "object",
            Kind::Frame => "frame",
            Kind::Module => "module",
            Kind::Error => "error",
            Kind::Map => "map",
            Kind::Varargs => "varargs",
            Kind::Handle => "handle",
            Kind::Quoted => "quoted",
            Kind::Void => "void",
            Kind::ParamNormal => "param-normal",
            Kind::ParamTight => "param-tight",
            Kind::ParamHardQuote => "param-hard-quote",
            Kind::ParamSoftQuote => "param-soft-quote",
            Kind::ParamRefinement => "param-refinement",
            Kind::ParamLocal => "param-local",
            Kind::ParamReturn => "param-return",
            Kind::ParamLeave => "param-leave",
        }
    }

    /// Look up a datatype by its bit position.
    pub fn from_bit(n: u8) -> Option<Kind> {
        DATATYPES.iter().copied().find(|k| *k as u8 == n)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!", self.name())
    }
}

/// How an argument is gathered for a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamClass {
    Normal,
    Tight,
    HardQuote,
    SoftQuote,
    Refinement,
    Local,
    Return,
    Leave,
}

impl ParamClass {
    pub const fn kind(self) -> Kind {
        match self {
            ParamClass::Normal => Kind::ParamNormal,
            ParamClass::Tight => Kind::ParamTight,
            ParamClass::HardQuote => Kind::ParamHardQuote,
            ParamClass::SoftQuote => Kind::ParamSoftQuote,
            ParamClass::Refinement => Kind::ParamRefinement,
            ParamClass::Local => Kind::ParamLocal,
            ParamClass::Return => Kind::ParamReturn,
            ParamClass::Leave => Kind::ParamLeave,
        }
    }

    /// Classes whose slot is filled from the call site.
    pub const fn takes_argument(self) -> bool {
        matches!(
            self,
            ParamClass::Normal | ParamClass::Tight | ParamClass::HardQuote | ParamClass::SoftQuote
        )
    }
}

// =============================================================================
// Typeset bits
// =============================================================================

/// Accepts a variadic feed (`<...>`).
pub const TS_VARIADIC: u64 = 1 << 56;
/// Accepts reaching the end of input (`<end>`).
pub const TS_ENDABLE: u64 = 1 << 57;
/// Hard-quoted argument may be skipped when its type does not match (`<skip>`).
pub const TS_SKIPPABLE: u64 = 1 << 58;
/// A blank argument makes the call return void without running (`<blank>`).
pub const TS_NOOP_IF_BLANK: u64 = 1 << 59;
/// Accepts a word quoted exactly once (`'word!`).
pub const TS_QUOTED_WORD: u64 = 1 << 60;
/// Accepts a path quoted exactly once (`'path!`).
pub const TS_QUOTED_PATH: u64 = 1 << 61;
/// Parameter is hidden from the public interface (specialized out).
pub const TS_HIDDEN: u64 = 1 << 62;
/// Key cannot be bound to by words.
pub const TS_UNBINDABLE: u64 = 1 << 63;

/// Every pseudo-type bit.
pub const TS_PSEUDO: u64 = 0xFF00_0000_0000_0000;

/// Every datatype bit.
pub const TS_ALL_KINDS: u64 = {
    let mut bits = 0u64;
    let mut i = 0;
    while i < DATATYPES.len() {
        bits |= DATATYPES[i].bit();
        i += 1;
    }
    bits
};

/// Every datatype except void.
pub const TS_VALUE: u64 = TS_ALL_KINDS & !Kind::Void.bit();

/// Default constraint for a parameter with no type block.
pub const TS_DEFAULT_PARAM: u64 = TS_ALL_KINDS & !(Kind::Void.bit() | Kind::Action.bit());

pub const TS_WORD: u64 = Kind::Word.bit()
    | Kind::SetWord.bit()
    | Kind::GetWord.bit()
    | Kind::Refinement.bit()
    | Kind::Issue.bit();

pub const TS_PATH: u64 = Kind::Path.bit() | Kind::SetPath.bit() | Kind::GetPath.bit();

pub const TS_ARRAY: u64 = TS_PATH | Kind::Block.bit() | Kind::Group.bit();

pub const TS_STRING: u64 = Kind::Text.bit() | Kind::Tag.bit();

pub const TS_SERIES: u64 = TS_ARRAY | TS_STRING | Kind::Binary.bit();

pub const TS_NUMBER: u64 = Kind::Integer.bit() | Kind::Decimal.bit();

pub const TS_SCALAR: u64 = TS_NUMBER | Kind::Char.bit() | Kind::Pair.bit();

pub const TS_CONTEXT: u64 =
    Kind::Object.bit() | Kind::Frame.bit() | Kind::Module.bit() | Kind::Error.bit();

/// Named typesets installed in the library context.
pub const NAMED_TYPESETS: [(&str, u64); 9] = [
    ("any-value!", TS_VALUE),
    ("any-word!", TS_WORD),
    ("any-path!", TS_PATH),
    ("any-number!", TS_NUMBER),
    ("any-scalar!", TS_SCALAR),
    ("any-series!", TS_SERIES),
    ("any-string!", TS_STRING),
    ("any-context!", TS_CONTEXT),
    ("any-array!", TS_ARRAY),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_bits_are_distinct() {
        let mut seen = 0u64;
        for kind in DATATYPES {
            assert_eq!(seen & kind.bit(), 0, "{kind} shares a bit");
            seen |= kind.bit();
        }
        assert_eq!(seen, TS_ALL_KINDS);
        assert_eq!(TS_ALL_KINDS & TS_PSEUDO, 0);
    }

    #[test]
    fn test_param_classes_share_kind_byte() {
        for class in [
            ParamClass::Normal,
            ParamClass::Tight,
            ParamClass::HardQuote,
            ParamClass::SoftQuote,
            ParamClass::Refinement,
            ParamClass::Local,
            ParamClass::Return,
            ParamClass::Leave,
        ] {
            let kind = class.kind();
            assert!(kind.is_param_class());
            assert_eq!(kind.bit(), 0);
            assert_eq!(kind.param_class(), Some(class));
        }
        assert_eq!(Kind::Typeset.param_class(), None);
    }

    #[test]
    fn test_from_bit_round_trips_names() {
        assert_eq!(Kind::from_bit(15), Some(Kind::Integer));
        assert_eq!(Kind::from_bit(48), None);
        assert_eq!(Kind::Integer.to_string(), "integer!");
    }
}
