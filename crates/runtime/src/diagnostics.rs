//! Runtime diagnostics for production debugging
//!
//! Provides a SIGQUIT (kill -3) handler that dumps heap and collector
//! statistics to stderr without stopping the process.
//!
//! ## Usage
//!
//! ```bash
//! kill -3 <pid>
//! ```
//!
//! ## Signal Safety
//!
//! The dump does I/O, which is not async-signal-safe. A dedicated thread
//! waits on signal-hook's iterator and does the printing outside of signal
//! context. Heaps are thread-local, so the dump reads the cross-thread
//! statistics registry rather than any heap directly.

use ren_core::heap_registry;
use std::sync::Once;
use std::sync::atomic::Ordering;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Install the SIGQUIT handler. Idempotent.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(all(unix, feature = "diagnostics"))]
        {
            use signal_hook::consts::SIGQUIT;
            use signal_hook::iterator::Signals;

            let mut signals = match Signals::new([SIGQUIT]) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "could not register SIGQUIT handler");
                    return;
                }
            };

            let spawned = std::thread::Builder::new()
                .name("ren-diagnostics".to_string())
                .spawn(move || {
                    for sig in signals.forever() {
                        if sig == SIGQUIT {
                            dump_diagnostics();
                        }
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "could not start diagnostics thread");
            }
        }
    });
}

/// Render the diagnostics dump.
pub fn diagnostics_text() -> String {
    let registry = heap_registry();
    let stats = registry.aggregate_stats();

    let mut out = String::new();
    out.push_str("\n=== Ren Runtime Diagnostics ===\n");
    out.push_str(&format!("Timestamp: {:?}\n", std::time::SystemTime::now()));

    out.push_str("\n[Heaps]\n");
    out.push_str(&format!("  Tracked threads: {}\n", stats.active_threads));
    out.push_str(&format!("  Registry slots:  {}\n", registry.capacity()));
    if stats.overflow_count > 0 {
        out.push_str(&format!(
            "  WARNING: {} threads exceeded registry capacity (not tracked)\n",
            registry.overflow_count.load(Ordering::Relaxed)
        ));
    }

    out.push_str("\n[Nodes]\n");
    out.push_str(&format!("  Live:        {}\n", stats.live_nodes));
    out.push_str(&format!("  Peak:        {} (high-water mark)\n", stats.peak_nodes));
    out.push_str(&format!("  Allocations: {} (total)\n", stats.allocations));

    out.push_str("\n[Collector]\n");
    out.push_str(&format!("  Cycles:      {}\n", stats.gc_cycles));
    out.push_str(&format!("  Swept:       {} (total)\n", stats.nodes_swept));
    if stats.leaked_handles > 0 {
        out.push_str(&format!(
            "  WARNING: {} API handles were still live at shutdown\n",
            stats.leaked_handles
        ));
    }

    out.push_str("\n=== End Diagnostics ===\n\n");
    out
}

/// Dump diagnostics to stderr. Called from the SIGQUIT thread or directly.
pub fn dump_diagnostics() {
    use std::io::Write;
    let _ = std::io::stderr().lock().write_all(diagnostics_text().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Interpreter, RuntimeConfig};

    #[test]
    fn test_dump_diagnostics_runs() {
        dump_diagnostics();
    }

    #[test]
    fn test_install_signal_handler_idempotent() {
        install_signal_handler();
        install_signal_handler();
    }

    #[test]
    fn test_text_counts_this_thread() {
        let it = Interpreter::new(RuntimeConfig::default()).unwrap();
        let text = diagnostics_text();
        assert!(text.contains("[Nodes]"));
        assert!(heap_registry().aggregate_stats().active_threads >= 1);
        it.shutdown();
    }
}
