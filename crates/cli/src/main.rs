//! Ren CLI
//!
//! Evaluate expressions or script files with the Ren runtime, and exercise
//! the collector and symbol table from the command line.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use ren_core::{Cell, GcReport, Subclass};
use ren_runtime::{Interpreter, RuntimeConfig};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;

/// Stack for the evaluation thread. Deep user recursion is bounded by
/// `eval.max_depth`, not by this.
const EVAL_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(ClapParser)]
#[command(name = "ren")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ren - evaluate Ren source with the Ren runtime", long_about = None)]
struct Cli {
    /// Runtime configuration file (TOML). Defaults to $REN_CONFIG.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression and print the result
    Eval {
        /// Source text
        source: String,
    },

    /// Evaluate a script file
    Run {
        /// Input source file
        input: PathBuf,
    },

    /// Build a deeply nested structure and collect it
    Stress {
        /// Nesting depth
        #[arg(long, default_value_t = 200_000)]
        depth: usize,
    },

    /// Intern many spellings and their case variants, then show symbol
    /// table figures
    Symbols {
        /// Number of distinct spellings
        #[arg(long, default_value_t = 100_000)]
        count: usize,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell } = cli.command {
        run_completions(shell);
        return;
    }

    ren_runtime::diagnostics::install_signal_handler();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let worker = thread::Builder::new()
        .name("ren-eval".to_string())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || run_command(cli.command, config));
    let result = match worker {
        Ok(handle) => handle
            .join()
            .unwrap_or_else(|_| Err("evaluation thread panicked".to_string())),
        Err(e) => Err(format!("cannot start evaluation thread: {}", e)),
    };

    ren_runtime::report::emit_report();

    match result {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "ren", &mut io::stdout());
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, String> {
    match path {
        Some(path) => RuntimeConfig::from_file(path),
        None => RuntimeConfig::from_env(),
    }
}

/// Run one subcommand, returning the lines to print.
fn run_command(command: Commands, config: RuntimeConfig) -> Result<Vec<String>, String> {
    match command {
        Commands::Eval { source } => run_source(config, &source),
        Commands::Run { input } => {
            let source = std::fs::read_to_string(&input)
                .map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;
            run_source(config, &source)
        }
        Commands::Stress { depth } => run_stress(config, depth),
        Commands::Symbols { count } => run_symbols(config, count),
        Commands::Completions { .. } => Ok(Vec::new()),
    }
}

/// Printed output followed by the molded result, if there is one.
fn run_source(config: RuntimeConfig, source: &str) -> Result<Vec<String>, String> {
    let mut it = Interpreter::new(config).map_err(|e| e.to_string())?;
    let result = it.eval_text(source);
    let mut lines = it.take_output();
    let outcome = match result {
        Ok(value) => {
            if !value.is_void() {
                lines.push(it.mold(&value));
            }
            Ok(lines)
        }
        Err(e) => Err(e.to_string()),
    };
    let report = it.shutdown();
    if report.leaked_roots > 0 {
        tracing::warn!(leaked = report.leaked_roots, "handles leaked");
    }
    outcome
}

fn gc_line(label: &str, report: &GcReport) -> String {
    format!(
        "{}: marked {} swept {} mark stack peak {} live {}",
        label, report.marked, report.swept, report.mark_stack_peak, report.live_after
    )
}

fn run_stress(config: RuntimeConfig, depth: usize) -> Result<Vec<String>, String> {
    let mut it = Interpreter::new(config).map_err(|e| e.to_string())?;
    let heap = &mut it.heap;
    let mut lines = Vec::new();
    let baseline = heap.recycle().ok_or("collector is disabled")?;
    lines.push(gc_line("baseline", &baseline));

    let mut inner = heap.make_managed_array(Subclass::Array, Vec::new());
    for level in 1..depth {
        inner = heap.make_managed_array(
            Subclass::Array,
            vec![Cell::integer(level as i64), Cell::block(inner)],
        );
    }
    heap.push_guard_node(inner);

    let held = heap.recycle().ok_or("collector is disabled")?;
    lines.push(gc_line("held", &held));
    heap.drop_guard();
    let released = heap.recycle().ok_or("collector is disabled")?;
    lines.push(gc_line("released", &released));

    it.shutdown();
    Ok(lines)
}

fn run_symbols(config: RuntimeConfig, count: usize) -> Result<Vec<String>, String> {
    let mut it = Interpreter::new(config).map_err(|e| e.to_string())?;
    let mut words = Vec::with_capacity(count * 2);
    for i in 0..count {
        let spelling = format!("sym-{}", i);
        words.push(Cell::word(it.heap.intern(&spelling)));
        words.push(Cell::word(it.heap.intern(&spelling.to_uppercase())));
    }
    let block = it.heap.make_managed_array(Subclass::Array, words);
    it.heap.push_guard_node(block);
    it.heap.recycle();

    let stats = it.heap.symbol_stats();
    let lines = vec![format!(
        "canons {} slots {} tombstones {} expansions {} pinned {}",
        stats.canons, stats.slots, stats.tombstones, stats.expansions, stats.pinned
    )];
    it.heap.drop_guard();
    it.shutdown();
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_global_config() {
        let cli = Cli::try_parse_from(["ren", "eval", "1 + 2", "--config", "ren.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ren.toml")));
        assert!(matches!(cli.command, Commands::Eval { .. }));
    }

    #[test]
    fn test_eval_prints_output_then_result() {
        let lines = run_source(RuntimeConfig::default(), "print \"hi\" 1 + 2").unwrap();
        assert_eq!(lines, vec!["hi".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_void_result_prints_nothing() {
        let lines = run_source(RuntimeConfig::default(), "comment [nothing]").unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_eval_error_is_reported() {
        let err = run_source(RuntimeConfig::default(), "add 1").unwrap_err();
        assert!(err.contains("add"), "{err}");
    }

    #[test]
    fn test_config_file_is_used() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[eval]\nmax_depth = 8").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.eval.max_depth, 8);
        let err = run_source(config, "f: func [] [f]  f").unwrap_err();
        assert!(err.contains("stack overflow"), "{err}");
    }

    #[test]
    fn test_run_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "x: 20\nx + 22").unwrap();
        let lines = run_command(
            Commands::Run {
                input: file.path().to_path_buf(),
            },
            RuntimeConfig::default(),
        )
        .unwrap();
        assert_eq!(lines, vec!["42".to_string()]);
    }

    #[test]
    fn test_stress_sweeps_everything_it_built() {
        let lines = run_stress(RuntimeConfig::default(), 1000).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("swept 0 "), "{}", lines[1]);
        assert!(lines[2].contains("swept 1000 "), "{}", lines[2]);
    }

    #[test]
    fn test_symbols_counts_canons() {
        let lines = run_symbols(RuntimeConfig::default(), 500).unwrap();
        let canons: usize = lines[0]
            .split_whitespace()
            .nth(1)
            .and_then(|n| n.parse().ok())
            .unwrap();
        assert!(canons >= 500, "{}", lines[0]);
    }
}
