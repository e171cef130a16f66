//! ADAPT, SPECIALIZE, CHAIN, ENCLOSE and HIJACK

use ren_runtime::{ErrorId, Interpreter, RuntimeConfig};

fn interp() -> Interpreter {
    Interpreter::new(RuntimeConfig::default()).unwrap()
}

fn eval_int(it: &mut Interpreter, source: &str) -> i64 {
    let value = it.eval_text(source).unwrap();
    value
        .as_integer()
        .unwrap_or_else(|| panic!("{source} gave {}", it.mold(&value)))
}

fn eval_mold(it: &mut Interpreter, source: &str) -> String {
    let value = it.eval_text(source).unwrap();
    it.mold(&value)
}

#[test]
fn test_adapt_runs_prelude_first() {
    let mut it = interp();
    it.eval_text("tenfold: adapt :add [value1: value1 * 10]").unwrap();
    assert_eq!(eval_int(&mut it, "tenfold 1 2"), 12);
    assert_eq!(eval_mold(&mut it, "parameters-of :tenfold"), "[value1 value2]");
}

#[test]
fn test_adapt_of_func_keeps_return() {
    let mut it = interp();
    it.eval_text("f: func [x] [if x = 0 [return 100] x]").unwrap();
    it.eval_text("g: adapt :f [x: x - 1]").unwrap();
    assert_eq!(eval_int(&mut it, "g 1"), 100);
    assert_eq!(eval_int(&mut it, "g 5"), 4);
}

#[test]
fn test_adapt_prelude_can_fail() {
    let mut it = interp();
    it.eval_text("guarded: adapt :add [if value1 = 0 [fail \"zero\"]]").unwrap();
    let err = it.eval_text("guarded 0 1").unwrap_err();
    assert_eq!(err.id, ErrorId::UserFail);
    assert_eq!(eval_int(&mut it, "guarded 1 1"), 2);
}

#[test]
fn test_specialize_hides_arguments() {
    let mut it = interp();
    it.eval_text("add10: specialize :add [value2: 10]").unwrap();
    assert_eq!(eval_int(&mut it, "add10 5"), 15);
    assert_eq!(eval_mold(&mut it, "parameters-of :add10"), "[value1]");
}

#[test]
fn test_specialize_typechecks_def() {
    let mut it = interp();
    let err = it.eval_text("specialize :add [value2: \"x\"]").unwrap_err();
    assert_eq!(err.id, ErrorId::ArgType);
}

#[test]
fn test_specialize_refinement_argument() {
    let mut it = interp();
    it.eval_text("thrice: specialize :append [dup: true count: 3]").unwrap();
    assert_eq!(eval_mold(&mut it, "thrice [] 0"), "[0 0 0]");
    assert_eq!(eval_mold(&mut it, "parameters-of :thrice"), "[series value /only]");
}

#[test]
fn test_specialize_path_refinements() {
    let mut it = interp();
    it.eval_text("dup2: specialize 'append/dup [count: 2]").unwrap();
    assert_eq!(eval_mold(&mut it, "dup2 [] 7"), "[7 7]");

    it.eval_text("only-dup: specialize 'append/only/dup []").unwrap();
    assert_eq!(eval_mold(&mut it, "only-dup [] [1] 2"), "[[1] [1]]");
}

#[test]
fn test_specialize_of_specialization() {
    let mut it = interp();
    it.eval_text("f: func [a b c] [a * 100 + (b * 10) + c]").unwrap();
    it.eval_text("g: specialize :f [b: 2]  h: specialize :g [c: 3]").unwrap();
    assert_eq!(eval_int(&mut it, "h 1"), 123);
}

#[test]
fn test_chain_pipes_results() {
    let mut it = interp();
    it.eval_text("double: func [x] [x * 2]  add-double: chain [:add :double]").unwrap();
    assert_eq!(eval_int(&mut it, "add-double 1 2"), 6);
    assert_eq!(eval_int(&mut it, "3 + add-double 1 1"), 7);
}

#[test]
fn test_chain_rejects_empty_pipeline() {
    let mut it = interp();
    assert_eq!(it.eval_text("chain []").unwrap_err().id, ErrorId::InvalidArg);
}

#[test]
fn test_enclose_gets_frame() {
    let mut it = interp();
    it.eval_text("e: enclose :add func [f] [f/value1: f/value1 + 100 do f]").unwrap();
    assert_eq!(eval_int(&mut it, "e 1 2"), 103);
}

#[test]
fn test_enclose_can_skip_inner() {
    let mut it = interp();
    it.eval_text("blocked: enclose :add func [f] [0]").unwrap();
    assert_eq!(eval_int(&mut it, "blocked 1 2"), 0);
}

#[test]
fn test_hijack_redirects_existing_references() {
    let mut it = interp();
    it.eval_text("foo: func [x] [x + 1]  alias: :foo").unwrap();
    it.eval_text("old: hijack 'foo func [x] [x * 10]").unwrap();
    assert_eq!(eval_int(&mut it, "foo 2"), 20);
    assert_eq!(eval_int(&mut it, "alias 2"), 20);
    assert_eq!(eval_int(&mut it, "old 2"), 3);
}

#[test]
fn test_hijack_back_restores() {
    let mut it = interp();
    it.eval_text("foo: func [x] [x + 1]").unwrap();
    it.eval_text("old: hijack 'foo func [x] [x * 10]").unwrap();
    it.eval_text("hijack 'foo :old").unwrap();
    assert_eq!(eval_int(&mut it, "foo 2"), 3);
}

#[test]
fn test_hijack_matches_arguments_by_name() {
    let mut it = interp();
    it.eval_text("sub: func [a b] [a - b]").unwrap();
    it.eval_text("hijack 'sub func [b a] [b - a]").unwrap();
    assert_eq!(eval_int(&mut it, "sub 10 3"), -7);
}
