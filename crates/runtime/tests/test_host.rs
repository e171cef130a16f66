//! Embedding: configuration, handles and collection from the host side

use ren_runtime::{Cell, Interpreter, Part, RuntimeConfig, CONFIG_ENV};
use serial_test::serial;
use std::io::Write;

#[test]
fn test_invalid_config_refused() {
    let mut config = RuntimeConfig::default();
    config.eval.max_depth = 0;
    let err = Interpreter::new(config).err().unwrap();
    assert!(err.message().contains("max_depth"), "{err}");
}

#[test]
#[serial]
fn test_interpreter_from_env_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[eval]\nmax_depth = 16\n\n[gc]\nballast = 1024").unwrap();

    // SAFETY: serialized with the other environment tests.
    unsafe { std::env::set_var(CONFIG_ENV, file.path()) };
    let config = RuntimeConfig::from_env();
    unsafe { std::env::remove_var(CONFIG_ENV) };

    let mut it = Interpreter::new(config.unwrap()).unwrap();
    assert_eq!(it.config().eval.max_depth, 16);
    let err = it.eval_text("f: func [] [f]  f").unwrap_err();
    assert_eq!(err.id, ren_runtime::ErrorId::StackOverflow);
    it.shutdown();
}

#[test]
fn test_small_ballast_collects_during_evaluation() {
    let config = RuntimeConfig::from_toml("[gc]\nballast = 256").unwrap();
    let mut it = Interpreter::new(config).unwrap();
    it.eval_text("keep: [1 2 3]").unwrap();
    for _ in 0..200 {
        it.eval_text("reduce [append [] 1 append [] 2]").unwrap();
    }
    assert!(it.heap.gc_stats().cycles > 0);
    assert_eq!(it.eval_text("keep").map(|v| it.mold(&v)).unwrap(), "[1 2 3]");
    it.shutdown();
}

#[test]
fn test_recycle_frees_garbage_only() {
    let mut it = Interpreter::new(RuntimeConfig::default()).unwrap();
    let kept = it.eval_text("[a b c]").unwrap();
    let handle = it.alloc_value(kept);
    it.eval_text("reduce [[1] [2] [3]]").unwrap();

    let doomed = it.sweeplist();
    assert!(!doomed.is_empty());
    let (node, _) = kept.series_at().unwrap();
    assert!(!doomed.contains(&node));

    let report = it.recycle().unwrap();
    assert_eq!(report.swept, doomed.len());
    assert_eq!(it.mold(&it.value(handle).unwrap()), "[a b c]");
    it.release(handle);
    assert_eq!(it.shutdown().leaked_roots, 0);
}

#[test]
fn test_eval_parts_with_text_only() {
    let mut it = Interpreter::new(RuntimeConfig::default()).unwrap();
    let result = it
        .eval_parts(&[Part::Text("multiply"), Part::Value(Cell::integer(4)), Part::Text("5")])
        .unwrap();
    assert_eq!(result.as_integer(), Some(20));
    it.shutdown();
}

#[test]
fn test_shutdown_reports_leaked_handles() {
    let mut it = Interpreter::new(RuntimeConfig::default()).unwrap();
    let a = it.alloc_value(Cell::integer(1));
    let _b = it.alloc_value(Cell::integer(2));
    it.keep(a);
    let report = it.shutdown();
    assert_eq!(report.leaked_roots, 2);
}
