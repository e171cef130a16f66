//! Evaluator behavior seen through source text
//!
//! Each test boots a fresh interpreter, so library words set by one test
//! never leak into another.

use ren_runtime::config::EvalConfig;
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

fn eval_err(it: &mut Interpreter, source: &str) -> ErrorId {
    match it.eval_text(source) {
        Ok(v) => panic!("{source} should fail, gave {}", it.mold(&v)),
        Err(e) => e.id,
    }
}

#[test]
fn test_enfix_runs_left_to_right() {
    let mut it = interp();
    assert_eq!(eval_int(&mut it, "1 + 2 * 3"), 9);
    assert_eq!(eval_int(&mut it, "add 1 2 * 3"), 7);
    assert_eq!(eval_int(&mut it, "(1 + 2) * (3 + 4)"), 21);
}

#[test]
fn test_set_and_get_words() {
    let mut it = interp();
    assert_eq!(eval_int(&mut it, "x: 10 x + 5"), 15);
    assert_eq!(eval_int(&mut it, "y: x: 3 x * y"), 9);
    assert_eq!(eval_mold(&mut it, ":x"), "3");
}

#[test]
fn test_empty_source_is_void() {
    let mut it = interp();
    assert!(it.eval_text("").unwrap().is_void());
    assert!(it.eval_text("()").unwrap().is_void());
    assert!(it.eval_text("do []").unwrap().is_void());
}

#[test]
fn test_invisibles_leave_result_alone() {
    let mut it = interp();
    assert_eq!(eval_int(&mut it, "1 + 2 comment [ignored]"), 3);
    assert_eq!(eval_int(&mut it, "10 elide print \"side\""), 10);
    assert_eq!(it.take_output(), vec!["side".to_string()]);
    assert!(it.eval_text("do [comment \"only\"]").unwrap().is_void());
}

#[test]
fn test_unset_word_has_no_value() {
    let mut it = interp();
    assert_eq!(eval_err(&mut it, "never-assigned"), ErrorId::NoValue);
}

#[test]
fn test_set_word_needs_a_value() {
    let mut it = interp();
    assert_eq!(eval_err(&mut it, "x:"), ErrorId::NoArg);
    assert_eq!(eval_err(&mut it, "x: | 1"), ErrorId::NoArg);
}

#[test]
fn test_missing_argument() {
    let mut it = interp();
    let err = it.eval_text("add 1").unwrap_err();
    assert_eq!(err.id, ErrorId::NoArg);
    assert!(err.to_string().contains("add"), "{err}");
}

#[test]
fn test_argument_type_error() {
    let mut it = interp();
    let err = it.eval_text("add 1 \"two\"").unwrap_err();
    assert_eq!(err.id, ErrorId::ArgType);
    assert!(err.message().contains("text!"), "{}", err.message());
}

#[test]
fn test_quote_levels() {
    let mut it = interp();
    assert_eq!(eval_mold(&mut it, "'a"), "a");
    assert_eq!(eval_mold(&mut it, "''a"), "'a");
    assert_eq!(eval_mold(&mut it, "quote [1 2]"), "[1 2]");
}

#[test]
fn test_conditionals() {
    let mut it = interp();
    assert_eq!(eval_int(&mut it, "either 1 = 2 [10] [20]"), 20);
    assert_eq!(eval_int(&mut it, "if 1 = 1 [30]"), 30);
    assert!(it.eval_text("if false [1]").unwrap().is_void());
    assert!(it.eval_text("not blank").unwrap().is_truthy());
}

#[test]
fn test_print_forms_blocks() {
    let mut it = interp();
    it.eval_text("print [\"sum:\" 1 + 1]  print \"done\"").unwrap();
    assert_eq!(it.take_output(), vec!["sum: 2".to_string(), "done".to_string()]);
    assert!(it.take_output().is_empty());
}

#[test]
fn test_reduce_and_series() {
    let mut it = interp();
    assert_eq!(eval_mold(&mut it, "reduce [1 + 1 2 * 3]"), "[2 6]");
    assert_eq!(eval_mold(&mut it, "append [1] [2 3]"), "[1 2 3]");
    assert_eq!(eval_mold(&mut it, "append/only [1] [2 3]"), "[1 [2 3]]");
    assert_eq!(eval_mold(&mut it, "append/dup [] 0 3"), "[0 0 0]");
    assert_eq!(eval_int(&mut it, "length-of [a b c]"), 3);
    assert_eq!(eval_int(&mut it, "b: [4 5] take b"), 4);
    assert_eq!(eval_mold(&mut it, "b"), "[5]");
}

#[test]
fn test_type_checkers() {
    let mut it = interp();
    assert!(it.eval_text("integer? 1").unwrap().is_truthy());
    assert!(!it.eval_text("integer? \"1\"").unwrap().is_truthy());
    assert!(it.eval_text("any-word? 'a").unwrap().is_truthy());
    assert!(it.eval_text("any-number? 1.5").unwrap().is_truthy());
}

#[test]
fn test_typeset_algebra() {
    let mut it = interp();
    assert_eq!(
        eval_mold(&mut it, "union make-typeset [integer!] make-typeset [text!]"),
        "make typeset! [integer! text!]"
    );
    assert_eq!(
        eval_mold(&mut it, "intersect any-number! make-typeset [decimal! text!]"),
        "make typeset! [decimal!]"
    );
    assert_eq!(
        eval_mold(&mut it, "difference any-number! make-typeset [integer!]"),
        "make typeset! [decimal!]"
    );
    assert!(
        it.eval_text("equal? any-value! complement complement any-value!")
            .unwrap()
            .is_truthy()
    );
}

#[test]
fn test_typeset_spec_errors() {
    let mut it = interp();
    assert_eq!(eval_err(&mut it, "make-typeset [no-such-type]"), ErrorId::InvalidTypesetItem);
    assert_eq!(eval_err(&mut it, "func [a [bogus!]] []"), ErrorId::InvalidTypesetItem);
    assert_eq!(eval_err(&mut it, "func [a [<skip> integer!]] []"), ErrorId::SkipNotHardQuote);
    assert_eq!(eval_err(&mut it, "func ['a [<skip> word!]] []"), ErrorId::SkipNotHardQuote);
    assert!(it.eval_text("func [:a [<skip> integer!]] [a]").is_ok());
}

#[test]
fn test_quoted_word_parameter_type() {
    let mut it = interp();
    it.eval_text("f: func [w ['word!]] [w]").unwrap();
    assert_eq!(eval_mold(&mut it, "f ''a"), "'a");
    assert_eq!(eval_err(&mut it, "f '''a"), ErrorId::ArgType);
    assert_eq!(eval_err(&mut it, "f 1"), ErrorId::ArgType);
}

#[test]
fn test_trap_makes_error_object() {
    let mut it = interp();
    it.eval_text("e: trap [fail \"boom\"]").unwrap();
    assert_eq!(eval_mold(&mut it, "e/id"), "user-fail");
    assert_eq!(eval_mold(&mut it, "e/message"), "\"boom\"");
    assert!(it.eval_text("trap [1 + 1]").unwrap().is_void());
}

#[test]
fn test_return_outside_action() {
    let mut it = interp();
    assert_eq!(eval_err(&mut it, "return 1"), ErrorId::ReturnOutsideAction);
}

#[test]
fn test_variadic_take_reads_caller() {
    let mut it = interp();
    it.eval_text("both: func [args [<...> integer!]] [a: take args b: take args a * b]")
        .unwrap();
    assert_eq!(eval_int(&mut it, "both 6 7"), 42);
    assert_eq!(eval_err(&mut it, "both 6 \"x\""), ErrorId::ArgType);
}

#[test]
fn test_frame_gone_after_call() {
    let mut it = interp();
    it.eval_text("f: func [x] [binding-of 'x]  ctx: f 10").unwrap();
    assert_eq!(eval_err(&mut it, "ctx/x"), ErrorId::ExpiredFrame);

    it.eval_text("g: func [x] ['x]  w: g 10").unwrap();
    assert_eq!(eval_err(&mut it, "binding-of w"), ErrorId::ExpiredFrame);
}

#[test]
fn test_live_frame_is_a_context() {
    let mut it = interp();
    it.eval_text("f: func [x] [ctx: binding-of 'x  ctx/x: x + 1  x]").unwrap();
    assert_eq!(eval_int(&mut it, "f 1"), 2);
}

#[test]
fn test_stack_overflow_is_an_error() {
    let config = RuntimeConfig {
        eval: EvalConfig {
            max_depth: 32,
            ..EvalConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let mut it = Interpreter::new(config).unwrap();
    assert_eq!(eval_err(&mut it, "f: func [] [f]  f"), ErrorId::StackOverflow);
    assert_eq!(eval_int(&mut it, "1 + 1"), 2);
}

#[test]
fn test_recycle_native() {
    let mut it = interp();
    it.eval_text("loop-body: [append [] 1]  do loop-body  do loop-body").unwrap();
    assert!(eval_int(&mut it, "recycle") >= 0);
    it.eval_text("recycle/off").unwrap();
    assert_eq!(eval_int(&mut it, "recycle"), 0);
    it.eval_text("recycle/on").unwrap();
}

#[test]
fn test_objects() {
    let mut it = interp();
    it.eval_text("o: object [a: 1 b: a + 1]").unwrap();
    assert_eq!(eval_int(&mut it, "o/b"), 2);
    assert_eq!(eval_int(&mut it, "o/a: 5 o/a"), 5);
}
