//! C-callable surface
//!
//! One interpreter per thread, started with `ren_startup` and torn down with
//! `ren_shutdown`. Values cross the boundary as nonzero `u64` handles; `0`
//! means failure, with the message waiting in the last-error slot
//! (`ren_take_error`). Panics are caught here and never unwind into C.
//!
//! Handles returned by these functions are not owned by any call, so they
//! live until `ren_release`.

use crate::api::ValueHandle;
use crate::config::RuntimeConfig;
use crate::error::{format_panic_payload, set_runtime_error};
use crate::interp::Interpreter;
use ren_core::Cell;
use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

thread_local! {
    static INTERP: RefCell<Option<Interpreter>> = const { RefCell::new(None) };
}

/// Run `f` against this thread's interpreter, turning errors and panics
/// into `fallback` plus a last-error message.
fn with_interp<T>(fallback: T, f: impl FnOnce(&mut Interpreter) -> Result<T, String>) -> T {
    let result = catch_unwind(AssertUnwindSafe(|| {
        INTERP.with(|cell| match cell.borrow_mut().as_mut() {
            Some(it) => f(it),
            None => Err("runtime not started".to_string()),
        })
    }));
    match result {
        Ok(Ok(value)) => value,
        Ok(Err(msg)) => {
            set_runtime_error(msg);
            fallback
        }
        Err(payload) => {
            set_runtime_error(format!("panic: {}", format_panic_payload(&payload)));
            fallback
        }
    }
}

fn hold(it: &mut Interpreter, cell: Cell) -> u64 {
    let handle = it.alloc_value(cell);
    it.keep(handle);
    handle.to_raw()
}

fn lookup(it: &Interpreter, raw: u64) -> Result<Cell, String> {
    ValueHandle::from_raw(raw)
        .and_then(|h| it.value(h))
        .ok_or_else(|| format!("invalid handle {raw}"))
}

/// Start this thread's interpreter, reading configuration from `REN_CONFIG`.
/// Starting twice is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn ren_startup() -> bool {
    let result = catch_unwind(|| {
        if INTERP.with(|cell| cell.borrow().is_some()) {
            return Ok(());
        }
        let config = RuntimeConfig::from_env()?;
        let it = Interpreter::new(config).map_err(|e| e.to_string())?;
        INTERP.with(|cell| *cell.borrow_mut() = Some(it));
        Ok::<(), String>(())
    });
    match result {
        Ok(Ok(())) => true,
        Ok(Err(msg)) => {
            set_runtime_error(msg);
            false
        }
        Err(payload) => {
            set_runtime_error(format!("panic: {}", format_panic_payload(&payload)));
            false
        }
    }
}

/// Shut down this thread's interpreter. Returns the number of handles that
/// were never released, or -1 if nothing was running.
#[unsafe(no_mangle)]
pub extern "C" fn ren_shutdown() -> i64 {
    let Some(it) = INTERP.with(|cell| cell.borrow_mut().take()) else {
        return -1;
    };
    match catch_unwind(AssertUnwindSafe(|| it.shutdown())) {
        Ok(report) => report.leaked_roots as i64,
        Err(payload) => {
            set_runtime_error(format!("panic: {}", format_panic_payload(&payload)));
            -1
        }
    }
}

/// Evaluate UTF-8 source text.
///
/// # Safety
/// `source` must be null or a valid null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ren_eval_text(source: *const c_char) -> u64 {
    if source.is_null() {
        set_runtime_error("ren_eval_text: null source");
        return 0;
    }
    let text = match unsafe { CStr::from_ptr(source) }.to_str() {
        Ok(s) => s.to_owned(),
        Err(_) => {
            set_runtime_error("ren_eval_text: source is not UTF-8");
            return 0;
        }
    };
    with_interp(0, |it| {
        let value = it.eval_text(&text).map_err(|e| e.to_string())?;
        Ok(hold(it, value))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn ren_make_integer(n: i64) -> u64 {
    with_interp(0, |it| Ok(hold(it, Cell::integer(n))))
}

/// Integer a handle holds. Sets the last error and returns 0 when it holds
/// something else.
#[unsafe(no_mangle)]
pub extern "C" fn ren_integer_of(handle: u64) -> i64 {
    with_interp(0, |it| {
        let cell = lookup(it, handle)?;
        cell.as_integer()
            .ok_or_else(|| format!("handle {handle} holds {}", cell.kind()))
    })
}

/// Call the action a handle holds with the given argument handles.
///
/// # Safety
/// `args` must point to `count` handles, or be null when `count` is 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ren_call(action: u64, args: *const u64, count: usize) -> u64 {
    let raw_args: Vec<u64> = if count == 0 || args.is_null() {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(args, count) }.to_vec()
    };
    with_interp(0, |it| {
        let action = lookup(it, action)?;
        let args = raw_args
            .iter()
            .map(|raw| lookup(it, *raw))
            .collect::<Result<Vec<_>, _>>()?;
        let result = it.call_with(action, args);
        let value = it.finish(result).map_err(|e| e.to_string())?;
        Ok(hold(it, value))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn ren_release(handle: u64) -> bool {
    with_interp(false, |it| {
        let handle = ValueHandle::from_raw(handle).ok_or("null handle")?;
        Ok(it.release(handle))
    })
}

/// Run a collection now. Returns the number of nodes swept, or -1 when the
/// collector is disabled or nothing is running.
#[unsafe(no_mangle)]
pub extern "C" fn ren_recycle() -> i64 {
    with_interp(-1, |it| Ok(it.recycle().map_or(-1, |r| r.swept as i64)))
}

/// Source text for a handle's value. Free with `ren_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn ren_mold(handle: u64) -> *mut c_char {
    with_interp(ptr::null_mut(), |it| {
        let cell = lookup(it, handle)?;
        let text = it.mold(&cell).replace('\0', "?");
        CString::new(text)
            .map(CString::into_raw)
            .map_err(|e| e.to_string())
    })
}

/// Free a string returned by `ren_mold`.
///
/// # Safety
/// `s` must be null or a pointer from `ren_mold` not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ren_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::take_runtime_error;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_eval_and_mold_through_handles() {
        assert!(ren_startup());
        let src = CString::new("add 1 2").unwrap();
        let handle = unsafe { ren_eval_text(src.as_ptr()) };
        assert_ne!(handle, 0);
        assert_eq!(ren_integer_of(handle), 3);

        let molded = ren_mold(handle);
        let text = unsafe { CStr::from_ptr(molded) }.to_str().unwrap().to_owned();
        unsafe { ren_free_string(molded) };
        assert_eq!(text, "3");

        assert!(ren_release(handle));
        assert_eq!(ren_shutdown(), 0);
    }

    #[test]
    #[serial]
    fn test_errors_land_in_error_slot() {
        assert!(ren_startup());
        let src = CString::new("add 1").unwrap();
        assert_eq!(unsafe { ren_eval_text(src.as_ptr()) }, 0);
        let msg = take_runtime_error().unwrap();
        assert!(msg.contains("add"), "{msg}");
        assert_eq!(ren_shutdown(), 0);
    }

    #[test]
    #[serial]
    fn test_call_action_handle() {
        assert!(ren_startup());
        let src = CString::new(":multiply").unwrap();
        let action = unsafe { ren_eval_text(src.as_ptr()) };
        let args = [ren_make_integer(6), ren_make_integer(7)];
        let result = unsafe { ren_call(action, args.as_ptr(), args.len()) };
        assert_eq!(ren_integer_of(result), 42);
        for h in [action, args[0], args[1], result] {
            ren_release(h);
        }
        assert_eq!(ren_shutdown(), 0);
    }

    #[test]
    #[serial]
    fn test_not_started() {
        let _ = ren_shutdown();
        assert_eq!(ren_make_integer(1), 0);
        assert!(take_runtime_error().unwrap().contains("not started"));
        assert_eq!(ren_shutdown(), -1);
    }
}
