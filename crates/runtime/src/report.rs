//! At-exit report for hosts of the runtime
//!
//! Dumps heap and collector KPIs at shutdown, controlled by `REN_REPORT`:
//! - Unset or `0` → no report, zero cost
//! - `1` → human-readable to stderr
//! - `json` → JSON to stderr
//! - `json:/path` → JSON to file
//!
//! ## Feature Flag
//!
//! This module requires the `diagnostics` feature (enabled by default).
//! When disabled, `report_stub.rs` provides no-op symbols.

#![cfg(feature = "diagnostics")]

use ren_core::heap_registry;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

pub const REPORT_ENV: &str = "REN_REPORT";

// =============================================================================
// Report Configuration (parsed from REN_REPORT)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Interpret a `REN_REPORT` value. `None` means no report.
    pub fn parse(val: &str) -> Option<Self> {
        match val {
            "" | "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                tracing::warn!(value = val, "{REPORT_ENV} not recognized, ignoring");
                None
            }
        }
    }

    pub fn from_env() -> Option<Self> {
        let val = std::env::var(REPORT_ENV).ok()?;
        Self::parse(&val)
    }
}

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Remember when the first interpreter started, for the wall-clock figure.
pub fn mark_start() {
    STARTED.get_or_init(Instant::now);
}

// =============================================================================
// Report Data
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportData {
    pub wall_clock_ms: u64,
    pub heap_threads: usize,
    pub gc_cycles: u64,
    pub nodes_swept: u64,
    pub live_nodes: u64,
    pub peak_nodes: u64,
    pub allocations: u64,
    pub leaked_handles: u64,
}

pub fn collect_report_data() -> ReportData {
    let stats = heap_registry().aggregate_stats();
    ReportData {
        wall_clock_ms: STARTED
            .get()
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0),
        heap_threads: stats.active_threads,
        gc_cycles: stats.gc_cycles,
        nodes_swept: stats.nodes_swept,
        live_nodes: stats.live_nodes,
        peak_nodes: stats.peak_nodes,
        allocations: stats.allocations,
        leaked_handles: stats.leaked_handles,
    }
}

// =============================================================================
// Formatting
// =============================================================================

fn format_human(data: &ReportData) -> String {
    let mut out = String::new();
    out.push_str("=== REN REPORT ===\n");
    out.push_str(&format!("Wall clock:     {} ms\n", data.wall_clock_ms));
    out.push_str(&format!("Heap threads:   {}\n", data.heap_threads));
    out.push_str(&format!("GC cycles:      {}\n", data.gc_cycles));
    out.push_str(&format!("Nodes swept:    {}\n", data.nodes_swept));
    out.push_str(&format!("Nodes live:     {}\n", data.live_nodes));
    out.push_str(&format!("Nodes peak:     {}\n", data.peak_nodes));
    out.push_str(&format!("Allocations:    {}\n", data.allocations));
    out.push_str(&format!("Leaked handles: {}\n", data.leaked_handles));
    out.push_str("==================\n");
    out
}

#[cfg(feature = "report-json")]
fn format_json(data: &ReportData) -> String {
    let obj = serde_json::json!({
        "wall_clock_ms": data.wall_clock_ms,
        "heap_threads": data.heap_threads,
        "gc_cycles": data.gc_cycles,
        "nodes_swept": data.nodes_swept,
        "live_nodes": data.live_nodes,
        "peak_nodes": data.peak_nodes,
        "allocations": data.allocations,
        "leaked_handles": data.leaked_handles,
    });
    serde_json::to_string(&obj).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(not(feature = "report-json"))]
fn format_json(data: &ReportData) -> String {
    tracing::warn!("{REPORT_ENV}=json requires the 'report-json' feature, using human format");
    format_human(data)
}

pub fn render(config: &ReportConfig, data: &ReportData) -> String {
    match config.format {
        ReportFormat::Human => format_human(data),
        ReportFormat::Json => format_json(data),
    }
}

// =============================================================================
// Emit
// =============================================================================

/// Write the report `config` asks for.
pub fn write_report(config: &ReportConfig) {
    let output = render(config, &collect_report_data());
    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            if let Err(e) = std::fs::write(path, output.as_bytes()) {
                tracing::warn!(path = %path, error = %e, "could not write report");
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}

/// Emit the report if `REN_REPORT` asks for one.
pub fn emit_report() {
    if let Some(config) = ReportConfig::from_env() {
        write_report(&config);
    }
}

/// At-exit report for C hosts.
///
/// # Safety
/// Safe to call from any context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ren_report() {
    emit_report();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn sample() -> ReportData {
        ReportData {
            wall_clock_ms: 42,
            heap_threads: 2,
            gc_cycles: 7,
            nodes_swept: 1000,
            live_nodes: 12,
            peak_nodes: 2048,
            allocations: 5000,
            leaked_handles: 1,
        }
    }

    #[test]
    fn test_config_parse_variants() {
        assert_eq!(ReportConfig::parse(""), None);
        assert_eq!(ReportConfig::parse("0"), None);
        assert_eq!(ReportConfig::parse("bogus"), None);
        assert_eq!(
            ReportConfig::parse("1"),
            Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            })
        );
        assert_eq!(
            ReportConfig::parse("json").map(|c| c.format),
            Some(ReportFormat::Json)
        );
        assert_eq!(
            ReportConfig::parse("json:/tmp/report.json").map(|c| c.destination),
            Some(ReportDestination::File("/tmp/report.json".to_string()))
        );
    }

    #[test]
    fn test_format_human() {
        let output = format_human(&sample());
        assert!(output.contains("REN REPORT"));
        assert!(output.contains("42 ms"));
        assert!(output.contains("GC cycles:      7"));
        assert!(output.contains("Nodes peak:     2048"));
    }

    #[cfg(feature = "report-json")]
    #[test]
    fn test_format_json() {
        let output = format_json(&sample());
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["gc_cycles"], 7);
        assert_eq!(parsed["leaked_handles"], 1);
    }

    #[cfg(feature = "report-json")]
    #[test]
    #[serial]
    fn test_emit_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        // SAFETY: serialized with every other test that touches the environment.
        unsafe { std::env::set_var(REPORT_ENV, format!("json:{}", path.display())) };
        emit_report();
        unsafe { std::env::remove_var(REPORT_ENV) };
        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert!(parsed.get("allocations").is_some());
    }

    #[test]
    #[serial]
    fn test_emit_report_noop_when_unset() {
        unsafe { std::env::remove_var(REPORT_ENV) };
        assert!(ReportConfig::from_env().is_none());
        emit_report();
    }
}
