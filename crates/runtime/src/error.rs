//! Runtime errors
//!
//! Two layers live here:
//!
//! - [`Condition`]: the catchable error raised by evaluation. It carries an
//!   [`ErrorId`] and its arguments already rendered to text, so it holds no
//!   heap references and survives any number of popped frames.
//! - A thread-local "last error" slot for the C API, which must never let
//!   a panic or a `Result` cross the FFI boundary.
//!
//! Non-local control flow (`return`, `leave`) travels as [`Unwind::Throw`]
//! through the same `?` paths as failures, so every frame between the
//! thrower and the catcher is popped the same way.
//!
//! # FFI usage
//!
//! ```ignore
//! if ren_has_error() {
//!     let msg = ren_take_error();
//!     // copy msg before the next runtime call
//! }
//! ```

use ren_core::{Cell, NodeError};
use std::cell::RefCell;
use std::ffi::{CString, c_char};
use std::fmt;
use std::ptr;

/// Error class, used for the `type` field of ERROR! values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Malformed action specs.
    Construction,
    TypeCheck,
    Script,
    /// Use of storage that is gone.
    Access,
    Syntax,
    Internal,
}

impl Category {
    pub const fn name(self) -> &'static str {
        match self {
            Category::Construction => "construction",
            Category::TypeCheck => "type-check",
            Category::Script => "script",
            Category::Access => "access",
            Category::Syntax => "syntax",
            Category::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorId {
    BadFuncDef,
    DupVars,
    InvalidTypesetItem,
    SkipNotHardQuote,
    RefinementArgOpt,
    ArgType,
    BadReturnType,
    NoArg,
    NoValue,
    NotBound,
    BadRefine,
    NotAction,
    BadPath,
    InvalidArg,
    Overflow,
    StackOverflow,
    UserFail,
    NoCatch,
    ReturnOutsideAction,
    ExpiredFrame,
    Syntax,
    Internal,
}

impl ErrorId {
    pub const fn category(self) -> Category {
        match self {
            ErrorId::BadFuncDef
            | ErrorId::DupVars
            | ErrorId::InvalidTypesetItem
            | ErrorId::SkipNotHardQuote
            | ErrorId::RefinementArgOpt => Category::Construction,
            ErrorId::ArgType | ErrorId::BadReturnType | ErrorId::NoArg => Category::TypeCheck,
            ErrorId::ExpiredFrame => Category::Access,
            ErrorId::Syntax => Category::Syntax,
            ErrorId::Internal => Category::Internal,
            _ => Category::Script,
        }
    }

    /// Word used for the `id` field of ERROR! values.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorId::BadFuncDef => "bad-func-def",
            ErrorId::DupVars => "dup-vars",
            ErrorId::InvalidTypesetItem => "invalid-typeset-item",
            ErrorId::SkipNotHardQuote => "skip-not-hard-quote",
            ErrorId::RefinementArgOpt => "refinement-arg-opt",
            ErrorId::ArgType => "arg-type",
            ErrorId::BadReturnType => "bad-return-type",
            ErrorId::NoArg => "no-arg",
            ErrorId::NoValue => "no-value",
            ErrorId::NotBound => "not-bound",
            ErrorId::BadRefine => "bad-refine",
            ErrorId::NotAction => "not-action",
            ErrorId::BadPath => "bad-path",
            ErrorId::InvalidArg => "invalid-arg",
            ErrorId::Overflow => "overflow",
            ErrorId::StackOverflow => "stack-overflow",
            ErrorId::UserFail => "user",
            ErrorId::NoCatch => "no-catch",
            ErrorId::ReturnOutsideAction => "return-archetype",
            ErrorId::ExpiredFrame => "expired-frame",
            ErrorId::Syntax => "syntax",
            ErrorId::Internal => "internal",
        }
    }

    /// Message template; `:argN` is replaced by the Nth argument.
    pub const fn template(self) -> &'static str {
        match self {
            ErrorId::BadFuncDef => "invalid function definition: :arg1",
            ErrorId::DupVars => "duplicate variable specified: :arg1",
            ErrorId::InvalidTypesetItem => "invalid item in typeset spec: :arg1",
            ErrorId::SkipNotHardQuote => "<skip> is only allowed on hard quoted parameters: :arg1",
            ErrorId::RefinementArgOpt => "refinement arguments cannot take <opt>: :arg1",
            ErrorId::ArgType => ":arg1 does not allow :arg3 for its :arg2 argument",
            ErrorId::BadReturnType => ":arg1 does not allow :arg2 for its return value",
            ErrorId::NoArg => ":arg1 is missing its :arg2 argument",
            ErrorId::NoValue => ":arg1 has no value",
            ErrorId::NotBound => ":arg1 word is not bound to a context",
            ErrorId::BadRefine => "incompatible or invalid refinement: :arg1",
            ErrorId::NotAction => ":arg1 is not an action",
            ErrorId::BadPath => "cannot pick :arg2 from :arg1",
            ErrorId::InvalidArg => "invalid argument: :arg1",
            ErrorId::Overflow => "math or number overflow",
            ErrorId::StackOverflow => "stack overflow",
            ErrorId::UserFail => ":arg1",
            ErrorId::NoCatch => "no catch for throw: :arg1",
            ErrorId::ReturnOutsideAction => ":arg1 used outside of an action",
            ErrorId::ExpiredFrame => "variables of :arg1 are gone; its call has ended",
            ErrorId::Syntax => "invalid :arg1 -- :arg2",
            ErrorId::Internal => "internal error: :arg1",
        }
    }
}

/// A raised, catchable error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub id: ErrorId,
    pub args: Vec<String>,
}

impl Condition {
    pub fn new<I, S>(id: ErrorId, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition {
            id,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A condition whose template takes no arguments.
    pub fn bare(id: ErrorId) -> Self {
        Condition {
            id,
            args: Vec::new(),
        }
    }

    pub fn category(&self) -> Category {
        self.id.category()
    }

    pub fn message(&self) -> String {
        let mut out = self.id.template().to_string();
        // Highest first so :arg1 does not eat the prefix of :arg10.
        for (i, arg) in self.args.iter().enumerate().rev() {
            out = out.replace(&format!(":arg{}", i + 1), arg);
        }
        out
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.category().name(), self.message())
    }
}

impl std::error::Error for Condition {}

impl From<NodeError> for Condition {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Inaccessible(_) => Condition::new(ErrorId::ExpiredFrame, ["frame"]),
            other => Condition::new(ErrorId::Internal, [other.to_string()]),
        }
    }
}

/// A value in flight toward whoever catches `label`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thrown {
    /// The throwing action, bound to the frame it targets.
    pub label: Cell,
    pub value: Cell,
}

/// Why evaluation stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwind {
    Fail(Condition),
    Throw(Thrown),
}

impl From<Condition> for Unwind {
    fn from(c: Condition) -> Self {
        Unwind::Fail(c)
    }
}

impl From<NodeError> for Unwind {
    fn from(err: NodeError) -> Self {
        Unwind::Fail(err.into())
    }
}

/// Shorthand for raising a condition.
pub(crate) fn fail<T, S: Into<String>>(id: ErrorId, args: impl IntoIterator<Item = S>) -> Result<T, Unwind> {
    Err(Unwind::Fail(Condition::new(id, args)))
}

// =============================================================================
// FFI error slot
// =============================================================================

thread_local! {
    /// Last error message raised through the C API
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };

    /// Cached C string so the pointer handed out stays valid until the next call
    static ERROR_CSTRING: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last runtime error message. Clears the cached C string first.
pub fn set_runtime_error(msg: impl Into<String>) {
    ERROR_CSTRING.with(|cs| *cs.borrow_mut() = None);
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(msg.into());
    });
}

/// Take (and clear) the last runtime error message
pub fn take_runtime_error() -> Option<String> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

pub fn has_runtime_error() -> bool {
    LAST_ERROR.with(|e| e.borrow().is_some())
}

pub fn clear_runtime_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
    ERROR_CSTRING.with(|e| *e.borrow_mut() = None);
}

/// Format a panic payload into an error message
pub fn format_panic_payload(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn cache_cstring(msg: &str) -> *const c_char {
    let safe_msg: String = msg
        .chars()
        .map(|c| if c == '\0' { '?' } else { c })
        .collect();
    let cstring = CString::new(safe_msg).unwrap_or_default();
    ERROR_CSTRING.with(|cs| {
        let ptr = cstring.as_ptr();
        *cs.borrow_mut() = Some(cstring);
        ptr
    })
}

/// Check if there's a pending runtime error (FFI-safe)
#[unsafe(no_mangle)]
pub extern "C" fn ren_has_error() -> bool {
    has_runtime_error()
}

/// Get the last error message as a C string pointer (FFI-safe)
///
/// Returns null if no error is pending.
///
/// # WARNING: Pointer Lifetime
/// The returned pointer is only valid until the next call to `set_runtime_error`,
/// `ren_get_error`, `ren_take_error`, or `ren_clear_error`.
#[unsafe(no_mangle)]
pub extern "C" fn ren_get_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(msg) => cache_cstring(msg),
        None => ptr::null(),
    })
}

/// Take (and clear) the last error, returning it as a C string (FFI-safe)
///
/// Returns null if no error is pending. Same pointer lifetime as
/// [`ren_get_error`].
#[unsafe(no_mangle)]
pub extern "C" fn ren_take_error() -> *const c_char {
    match take_runtime_error() {
        Some(s) => cache_cstring(&s),
        None => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn ren_clear_error() {
    clear_runtime_error();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_take_error() {
        clear_runtime_error();
        assert!(!has_runtime_error());

        set_runtime_error("test error");
        assert!(has_runtime_error());

        let error = take_runtime_error();
        assert_eq!(error, Some("test error".to_string()));
        assert!(!has_runtime_error());
    }

    #[test]
    fn test_clear_error() {
        set_runtime_error("another error");
        assert!(has_runtime_error());

        clear_runtime_error();
        assert!(!has_runtime_error());
        assert!(take_runtime_error().is_none());
    }

    #[test]
    fn test_format_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("panic message");
        assert_eq!(format_panic_payload(&payload), "panic message");

        let payload: Box<dyn std::any::Any + Send> = Box::new("owned panic".to_string());
        assert_eq!(format_panic_payload(&payload), "owned panic");
    }

    #[test]
    fn test_condition_message_substitutes_args() {
        let c = Condition::new(ErrorId::ArgType, ["append", "series", "integer!"]);
        assert_eq!(
            c.message(),
            "append does not allow integer! for its series argument"
        );
        assert_eq!(c.category(), Category::TypeCheck);
        assert_eq!(
            c.to_string(),
            "type-check error: append does not allow integer! for its series argument"
        );
    }

    #[test]
    fn test_inaccessible_node_maps_to_expired_frame() {
        let c: Condition = NodeError::Inaccessible(ren_core::NodeId::from_raw(1).unwrap()).into();
        assert_eq!(c.id, ErrorId::ExpiredFrame);
        assert_eq!(c.category(), Category::Access);
    }
}
