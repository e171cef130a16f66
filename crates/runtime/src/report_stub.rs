//! Stub module for report operations when the "diagnostics" feature is disabled.
//!
//! No-op symbols so hosts link the same way regardless of feature flags.

/// No-op at-exit report when diagnostics is disabled
///
/// # Safety
/// Always safe to call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ren_report() {}

/// Report nothing.
pub fn emit_report() {}

/// Nothing to time without a report.
pub fn mark_start() {}
