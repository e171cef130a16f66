//! The cell: a fixed-size, self-describing value
//!
//! ```text
//! ┌──────────────────────────────┬──────────────┬─────────────────────────┐
//! │ header                       │ extra        │ payload                 │
//! │ kind: u8 | quotes: u8 | flags│ binding or   │ inline scalar, or node  │
//! │                              │ key spelling │ handle (+ index)        │
//! └──────────────────────────────┴──────────────┴─────────────────────────┘
//! ```
//!
//! The kind decides how payload and extra are read. Accessors check that the
//! kind and payload agree and return `None` otherwise, so a cell is never read
//! with the wrong interpretation. Scalars live inline; nothing is boxed.
//!
//! Quoting is a depth counter in the header. Depths above
//! [`INLINE_QUOTE_MAX`] are stored in an escape node (see `Heap::quotify`).

use crate::kind::{Kind, ParamClass};
use crate::node::{FrameSerial, NodeId};

/// Deepest quoting stored directly in the header.
pub const INLINE_QUOTE_MAX: u8 = 3;

bitflags::bitflags! {
    /// Per-cell header bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CellFlags: u8 {
        /// Variable may not be written through this cell.
        const PROTECTED = 1 << 0;
        /// Action value that takes its first argument from the left.
        const ENFIXED = 1 << 1;
        /// Value came from source without evaluation.
        const UNEVALUATED = 1 << 2;
        /// Molds with a line break before it.
        const NEWLINE_BEFORE = 1 << 3;
    }
}

/// What a word (or a block carrying a binding) resolves against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Binding {
    #[default]
    Unbound,
    /// A specific varlist.
    Context(NodeId),
    /// A paramlist; resolved through the frame given by a specifier.
    Relative(NodeId),
    /// A running frame.
    Frame(FrameSerial),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Extra {
    #[default]
    None,
    Binding(Binding),
    /// Key or parameter name.
    Spelling(NodeId),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Payload {
    #[default]
    None,
    Integer(i64),
    Decimal(f64),
    Logic(bool),
    Char(char),
    Datatype(Kind),
    Typeset(u64),
    /// Any series: arrays, strings, binaries.
    Series { node: NodeId, index: u32 },
    /// Any word. `index` is 0 when unbound.
    Word { spelling: NodeId, index: u32 },
    Context { varlist: NodeId, phase: Option<NodeId> },
    Action { paramlist: NodeId, details: NodeId },
    Map(NodeId),
    Pair(NodeId),
    /// Escaped quoting beyond the inline limit.
    Quoted { node: NodeId, depth: u32 },
    Varargs { frame: FrameSerial, param: u32 },
    Handle(usize),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell {
    kind: Kind,
    quotes: u8,
    flags: CellFlags,
    extra: Extra,
    payload: Payload,
}

const _: () = assert!(
    std::mem::size_of::<Cell>() <= 64,
    "Cell must stay a small fixed size"
);

impl Default for Cell {
    fn default() -> Self {
        Cell::end()
    }
}

// =============================================================================
// Construction
// =============================================================================

impl Cell {
    #[inline]
    const fn make(kind: Kind, extra: Extra, payload: Payload) -> Self {
        Cell {
            kind,
            quotes: 0,
            flags: CellFlags::empty(),
            extra,
            payload,
        }
    }

    /// Unfilled slot / end of input.
    pub const fn end() -> Self {
        Cell::make(Kind::End, Extra::None, Payload::None)
    }

    /// The "no value" sentinel.
    pub const fn void() -> Self {
        Cell::make(Kind::Void, Extra::None, Payload::None)
    }

    pub const fn blank() -> Self {
        Cell::make(Kind::Blank, Extra::None, Payload::None)
    }

    pub const fn bar() -> Self {
        Cell::make(Kind::Bar, Extra::None, Payload::None)
    }

    pub const fn logic(b: bool) -> Self {
        Cell::make(Kind::Logic, Extra::None, Payload::Logic(b))
    }

    pub const fn integer(i: i64) -> Self {
        Cell::make(Kind::Integer, Extra::None, Payload::Integer(i))
    }

    pub const fn decimal(d: f64) -> Self {
        Cell::make(Kind::Decimal, Extra::None, Payload::Decimal(d))
    }

    pub const fn char(c: char) -> Self {
        Cell::make(Kind::Char, Extra::None, Payload::Char(c))
    }

    pub const fn datatype(kind: Kind) -> Self {
        Cell::make(Kind::Datatype, Extra::None, Payload::Datatype(kind))
    }

    pub const fn typeset(bits: u64) -> Self {
        Cell::make(Kind::Typeset, Extra::None, Payload::Typeset(bits))
    }

    pub const fn handle(data: usize) -> Self {
        Cell::make(Kind::Handle, Extra::None, Payload::Handle(data))
    }

    /// Object key: a typeset that carries a name.
    pub const fn key(spelling: NodeId, bits: u64) -> Self {
        Cell::make(Kind::Typeset, Extra::Spelling(spelling), Payload::Typeset(bits))
    }

    /// Parameter: the class rides in the kind byte, the name in extra.
    pub const fn param(class: ParamClass, bits: u64, spelling: NodeId) -> Self {
        Cell::make(class.kind(), Extra::Spelling(spelling), Payload::Typeset(bits))
    }

    /// Series value. `kind` must be an array, string or binary kind.
    pub fn series(kind: Kind, node: NodeId, index: usize) -> Self {
        debug_assert!(kind.is_any_series(), "{kind} is not a series kind");
        Cell::make(
            kind,
            Extra::Binding(Binding::Unbound),
            Payload::Series {
                node,
                index: index as u32,
            },
        )
    }

    pub fn block(node: NodeId) -> Self {
        Cell::series(Kind::Block, node, 0)
    }

    pub fn group(node: NodeId) -> Self {
        Cell::series(Kind::Group, node, 0)
    }

    pub fn text(node: NodeId) -> Self {
        Cell::series(Kind::Text, node, 0)
    }

    /// Unbound word of any word kind.
    pub fn any_word(kind: Kind, spelling: NodeId) -> Self {
        debug_assert!(kind.is_any_word(), "{kind} is not a word kind");
        Cell::make(
            kind,
            Extra::Binding(Binding::Unbound),
            Payload::Word { spelling, index: 0 },
        )
    }

    pub fn word(spelling: NodeId) -> Self {
        Cell::any_word(Kind::Word, spelling)
    }

    pub fn context(kind: Kind, varlist: NodeId) -> Self {
        debug_assert!(kind.is_any_context(), "{kind} is not a context kind");
        Cell::make(
            kind,
            Extra::Binding(Binding::Unbound),
            Payload::Context {
                varlist,
                phase: None,
            },
        )
    }

    /// FRAME! value; `phase` is the action the frame runs when invoked.
    pub fn frame(varlist: NodeId, phase: NodeId, binding: Binding) -> Self {
        Cell::make(
            Kind::Frame,
            Extra::Binding(binding),
            Payload::Context {
                varlist,
                phase: Some(phase),
            },
        )
    }

    pub fn action(paramlist: NodeId, details: NodeId) -> Self {
        Cell::make(
            Kind::Action,
            Extra::Binding(Binding::Unbound),
            Payload::Action { paramlist, details },
        )
    }

    pub fn map(pairlist: NodeId) -> Self {
        Cell::make(Kind::Map, Extra::None, Payload::Map(pairlist))
    }

    pub fn pair(pairing: NodeId) -> Self {
        Cell::make(Kind::Pair, Extra::None, Payload::Pair(pairing))
    }

    pub fn varargs(frame: FrameSerial, param: usize) -> Self {
        Cell::make(
            Kind::Varargs,
            Extra::None,
            Payload::Varargs {
                frame,
                param: param as u32,
            },
        )
    }

    pub(crate) fn escaped(node: NodeId, depth: u32) -> Self {
        Cell::make(Kind::Quoted, Extra::None, Payload::Quoted { node, depth })
    }
}

// =============================================================================
// Header access
// =============================================================================

impl Cell {
    /// Kind as seen by type checks: any quoted value reports `Quoted`.
    #[inline]
    pub fn kind(&self) -> Kind {
        if self.quotes > 0 { Kind::Quoted } else { self.kind }
    }

    /// Kind byte ignoring inline quotes. Escaped cells report `Quoted`.
    #[inline]
    pub fn raw_kind(&self) -> Kind {
        self.kind
    }

    /// Inline quote depth; escaped cells keep their depth in the payload.
    #[inline]
    pub fn inline_quotes(&self) -> u8 {
        self.quotes
    }

    #[inline]
    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    #[inline]
    pub fn set_flag(&mut self, flag: CellFlags) {
        self.flags.insert(flag);
    }

    #[inline]
    pub fn clear_flag(&mut self, flag: CellFlags) {
        self.flags.remove(flag);
    }

    #[inline]
    pub fn extra(&self) -> Extra {
        self.extra
    }

    #[inline]
    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// Re-tag an any-word or any-array cell in place (word -> set-word, ...).
    pub fn with_kind(mut self, kind: Kind) -> Self {
        debug_assert!(
            (kind.is_any_word() && self.kind.is_any_word())
                || (kind.is_any_array() && self.kind.is_any_array())
                || (kind.is_param_class() && self.kind.is_param_class()),
            "cannot retag {} as {}",
            self.kind,
            kind
        );
        self.kind = kind;
        self
    }

    pub(crate) fn with_inline_quotes(mut self, quotes: u8) -> Self {
        debug_assert!(quotes <= INLINE_QUOTE_MAX);
        self.quotes = quotes;
        self
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.kind == Kind::End
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        self.kind == Kind::Void && self.quotes == 0
    }

    #[inline]
    pub fn is_blank(&self) -> bool {
        self.kind == Kind::Blank && self.quotes == 0
    }

    #[inline]
    pub fn is_quoted(&self) -> bool {
        self.quotes > 0 || self.kind == Kind::Quoted
    }

    #[inline]
    pub fn is_action(&self) -> bool {
        self.kind == Kind::Action && self.quotes == 0
    }

    /// Conditional truth: everything but void, blank and false.
    pub fn is_truthy(&self) -> bool {
        if self.quotes > 0 {
            return true;
        }
        !matches!(
            (self.kind, self.payload),
            (Kind::Void, _) | (Kind::Blank, _) | (Kind::Logic, Payload::Logic(false))
        )
    }
}

// =============================================================================
// Typed payload access
// =============================================================================

impl Cell {
    pub fn as_integer(&self) -> Option<i64> {
        match (self.kind(), self.payload) {
            (Kind::Integer, Payload::Integer(i)) => Some(i),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match (self.kind(), self.payload) {
            (Kind::Decimal, Payload::Decimal(d)) => Some(d),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> Option<bool> {
        match (self.kind(), self.payload) {
            (Kind::Logic, Payload::Logic(b)) => Some(b),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match (self.kind(), self.payload) {
            (Kind::Char, Payload::Char(c)) => Some(c),
            _ => None,
        }
    }

    pub fn as_datatype(&self) -> Option<Kind> {
        match (self.kind(), self.payload) {
            (Kind::Datatype, Payload::Datatype(k)) => Some(k),
            _ => None,
        }
    }

    /// Bits of a typeset, key or parameter cell.
    pub fn typeset_bits(&self) -> Option<u64> {
        match self.payload {
            Payload::Typeset(bits) if self.kind == Kind::Typeset || self.kind.is_param_class() => {
                Some(bits)
            }
            _ => None,
        }
    }

    pub fn set_typeset_bits(&mut self, bits: u64) {
        debug_assert!(self.kind == Kind::Typeset || self.kind.is_param_class());
        self.payload = Payload::Typeset(bits);
    }

    pub fn param_class(&self) -> Option<ParamClass> {
        self.kind.param_class()
    }

    /// Name carried by a key or parameter.
    pub fn key_spelling(&self) -> Option<NodeId> {
        match self.extra {
            Extra::Spelling(s) => Some(s),
            _ => None,
        }
    }

    /// Node and index of a series value, unquoted or not.
    pub fn series_at(&self) -> Option<(NodeId, usize)> {
        match self.payload {
            Payload::Series { node, index } if self.kind.is_any_series() => {
                Some((node, index as usize))
            }
            _ => None,
        }
    }

    pub fn set_series_index(&mut self, index: usize) {
        if let Payload::Series { node, .. } = self.payload {
            self.payload = Payload::Series {
                node,
                index: index as u32,
            };
        }
    }

    /// Point a series cell at another node, keeping index, quotes and flags.
    pub fn set_series_node(&mut self, node: NodeId) {
        if let Payload::Series { index, .. } = self.payload {
            self.payload = Payload::Series { node, index };
        }
    }

    pub fn word_spelling(&self) -> Option<NodeId> {
        match self.payload {
            Payload::Word { spelling, .. } if self.kind.is_any_word() => Some(spelling),
            _ => None,
        }
    }

    /// 1-based slot of a bound word; 0 when unbound.
    pub fn word_index(&self) -> usize {
        match self.payload {
            Payload::Word { index, .. } => index as usize,
            _ => 0,
        }
    }

    /// Binding of a word or series; `Unbound` for everything else.
    pub fn binding(&self) -> Binding {
        match self.extra {
            Extra::Binding(b) => b,
            _ => Binding::Unbound,
        }
    }

    pub fn bind_word(&mut self, binding: Binding, index: usize) {
        if let Payload::Word { spelling, .. } = self.payload {
            self.payload = Payload::Word {
                spelling,
                index: index as u32,
            };
            self.extra = Extra::Binding(binding);
        }
    }

    pub fn unbind_word(&mut self) {
        self.bind_word(Binding::Unbound, 0);
    }

    /// Replace the binding of a series, context or action value.
    pub fn set_binding(&mut self, binding: Binding) {
        self.extra = Extra::Binding(binding);
    }

    pub fn context_varlist(&self) -> Option<NodeId> {
        match self.payload {
            Payload::Context { varlist, .. } if self.kind.is_any_context() => Some(varlist),
            _ => None,
        }
    }

    pub fn frame_phase(&self) -> Option<NodeId> {
        match self.payload {
            Payload::Context { phase, .. } if self.kind == Kind::Frame => phase,
            _ => None,
        }
    }

    pub fn set_frame_phase(&mut self, phase: NodeId) {
        if let Payload::Context { varlist, .. } = self.payload {
            self.payload = Payload::Context {
                varlist,
                phase: Some(phase),
            };
        }
    }

    /// Paramlist and details of an action value.
    pub fn action_nodes(&self) -> Option<(NodeId, NodeId)> {
        match self.payload {
            Payload::Action { paramlist, details } if self.kind == Kind::Action => {
                Some((paramlist, details))
            }
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<NodeId> {
        match self.payload {
            Payload::Map(n) if self.kind == Kind::Map => Some(n),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<NodeId> {
        match self.payload {
            Payload::Pair(n) if self.kind == Kind::Pair => Some(n),
            _ => None,
        }
    }

    pub fn as_varargs(&self) -> Option<(FrameSerial, usize)> {
        match (self.kind(), self.payload) {
            (Kind::Varargs, Payload::Varargs { frame, param }) => Some((frame, param as usize)),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<usize> {
        match (self.kind(), self.payload) {
            (Kind::Handle, Payload::Handle(h)) => Some(h),
            _ => None,
        }
    }

    pub(crate) fn escape(&self) -> Option<(NodeId, u32)> {
        match self.payload {
            Payload::Quoted { node, depth } if self.kind == Kind::Quoted => Some((node, depth)),
            _ => None,
        }
    }

    /// Heap nodes this cell keeps alive, payload first then extra.
    pub fn referenced_nodes(&self) -> [Option<NodeId>; 3] {
        let (a, b) = match self.payload {
            Payload::Series { node, .. }
            | Payload::Map(node)
            | Payload::Pair(node)
            | Payload::Quoted { node, .. } => (Some(node), None),
            Payload::Word { spelling, .. } => (Some(spelling), None),
            Payload::Context { varlist, phase } => (Some(varlist), phase),
            Payload::Action { paramlist, details } => (Some(paramlist), Some(details)),
            _ => (None, None),
        };
        let c = match self.extra {
            Extra::Binding(Binding::Context(n)) | Extra::Binding(Binding::Relative(n)) => Some(n),
            Extra::Spelling(n) => Some(n),
            _ => None,
        };
        [a, b, c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::TS_DEFAULT_PARAM;

    fn id(n: u32) -> NodeId {
        NodeId::new(n, 0)
    }

    #[test]
    fn test_accessors_check_kind() {
        let i = Cell::integer(42);
        assert_eq!(i.as_integer(), Some(42));
        assert_eq!(i.as_logic(), None);
        assert_eq!(i.series_at(), None);

        let t = Cell::typeset(0b110);
        assert_eq!(t.typeset_bits(), Some(0b110));
        assert_eq!(Cell::integer(6).typeset_bits(), None);
    }

    #[test]
    fn test_quoted_reports_quoted_kind() {
        let w = Cell::word(id(3)).with_inline_quotes(1);
        assert_eq!(w.kind(), Kind::Quoted);
        assert_eq!(w.raw_kind(), Kind::Word);
        assert!(w.is_quoted());
        assert_eq!(Cell::integer(1).with_inline_quotes(2).as_integer(), None);
    }

    #[test]
    fn test_param_cell_carries_class_and_name() {
        let p = Cell::param(ParamClass::HardQuote, TS_DEFAULT_PARAM, id(9));
        assert_eq!(p.param_class(), Some(ParamClass::HardQuote));
        assert_eq!(p.key_spelling(), Some(id(9)));
        assert_eq!(p.typeset_bits(), Some(TS_DEFAULT_PARAM));
        assert_eq!(Cell::key(id(9), 1).param_class(), None);
    }

    #[test]
    fn test_word_binding() {
        let mut w = Cell::word(id(1));
        assert_eq!(w.word_index(), 0);
        assert_eq!(w.binding(), Binding::Unbound);
        w.bind_word(Binding::Context(id(7)), 4);
        assert_eq!(w.word_index(), 4);
        assert_eq!(w.binding(), Binding::Context(id(7)));
        assert_eq!(w.referenced_nodes(), [Some(id(1)), None, Some(id(7))]);
    }

    #[test]
    fn test_truthiness() {
        assert!(Cell::integer(0).is_truthy());
        assert!(!Cell::logic(false).is_truthy());
        assert!(!Cell::blank().is_truthy());
        assert!(!Cell::void().is_truthy());
        assert!(Cell::logic(false).with_inline_quotes(1).is_truthy());
    }
}
