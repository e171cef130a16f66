//! Making and calling actions: specs, refinements, returns and frames

use ren_runtime::{Cell, ErrorId, Interpreter, Kind, Outcome, RuntimeConfig};

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
fn test_func_definitional_return() {
    let mut it = interp();
    it.eval_text("f: func [x] [if x = 0 [return 10] 20]").unwrap();
    assert_eq!(eval_int(&mut it, "f 0"), 10);
    assert_eq!(eval_int(&mut it, "f 5"), 20);
}

#[test]
fn test_nested_return_exits_inner_only() {
    let mut it = interp();
    it.eval_text("outer: func [] [inner: func [] [return 1] inner 2]").unwrap();
    assert_eq!(eval_int(&mut it, "outer"), 2);
}

#[test]
fn test_proc_leave() {
    let mut it = interp();
    it.eval_text("p: proc [x] [if x = 1 [leave] print \"ran\"]").unwrap();
    assert!(it.eval_text("p 1").unwrap().is_void());
    assert!(it.take_output().is_empty());
    assert!(it.eval_text("p 2").unwrap().is_void());
    assert_eq!(it.take_output(), vec!["ran".to_string()]);
}

#[test]
fn test_return_slot_moves_last() {
    let mut it = interp();
    it.eval_text("f: func [a b return: [integer!] c] [a + b + c]").unwrap();
    assert_eq!(eval_mold(&mut it, "parameters-of :f"), "[a b c]");
    assert_eq!(eval_int(&mut it, "f 1 2 3"), 6);
}

#[test]
fn test_local_return_cancels_definitional_return() {
    let mut it = interp();
    it.eval_text("f: func [x <local> return] [x + 1]").unwrap();
    assert_eq!(eval_int(&mut it, "f 1"), 2);
    assert_eq!(eval_mold(&mut it, "parameters-of :f"), "[x]");
}

#[test]
fn test_with_return_cancels_definitional_return() {
    let mut it = interp();
    it.eval_text("f: func [x <with> return] [x + 1]  g: func [x <with> return] [return x]")
        .unwrap();
    assert_eq!(eval_int(&mut it, "f 1"), 2);
    assert_eq!(eval_mold(&mut it, "parameters-of :f"), "[x]");
    assert_eq!(eval_err(&mut it, "g 1"), ErrorId::ReturnOutsideAction);
}

#[test]
fn test_parameter_classes_listed() {
    let mut it = interp();
    it.eval_text("f: func [a :b 'c #d /e] []").unwrap();
    assert_eq!(eval_mold(&mut it, "parameters-of :f"), "[a :b 'c #d /e]");
}

#[test]
fn test_meta_only_when_documented() {
    let mut it = interp();
    it.eval_text("plain: func [a] [a]  doc: func [\"Echo\" a \"the value\"] [a]").unwrap();
    assert!(it.eval_text("meta-of :plain").unwrap().is_void());
    let meta = eval_mold(&mut it, "meta-of :doc");
    assert!(meta.contains("\"Echo\""), "{meta}");
    assert!(meta.contains("\"the value\""), "{meta}");
}

#[test]
fn test_meta_keeps_return_type() {
    let mut it = interp();
    it.eval_text("typed: func [a return: [integer!]] [a]  m: meta-of :typed").unwrap();
    assert_eq!(eval_mold(&mut it, "m/return-type"), "[integer!]");
}

#[test]
fn test_duplicate_parameters_rejected() {
    let mut it = interp();
    assert_eq!(eval_err(&mut it, "func [a a] []"), ErrorId::DupVars);
    assert_eq!(eval_err(&mut it, "func [a /A] []"), ErrorId::DupVars);
}

#[test]
fn test_malformed_specs_rejected() {
    let mut it = interp();
    assert_eq!(eval_err(&mut it, "func [a [integer!] [text!]] []"), ErrorId::BadFuncDef);
    assert_eq!(eval_err(&mut it, "func [a [] [integer!]] [a]"), ErrorId::BadFuncDef);
    assert_eq!(eval_err(&mut it, "func [/r [integer!]] []"), ErrorId::BadFuncDef);
    assert_eq!(eval_err(&mut it, "func [[integer!]] []"), ErrorId::BadFuncDef);
    assert_eq!(
        eval_err(&mut it, "func [/r x [<opt> integer!]] []"),
        ErrorId::RefinementArgOpt
    );
}

#[test]
fn test_locals_start_void() {
    let mut it = interp();
    it.eval_text("f: func [a <local> tmp] [:tmp]").unwrap();
    assert!(it.eval_text("f 1").unwrap().is_void());
    assert_eq!(eval_mold(&mut it, "parameters-of :f"), "[a]");
}

#[test]
fn test_argument_typecheck() {
    let mut it = interp();
    it.eval_text("f: func [x [integer!]] [x]").unwrap();
    let err = it.eval_text("f \"a\"").unwrap_err();
    assert_eq!(err.id, ErrorId::ArgType);
    assert!(err.message().starts_with("f "), "{}", err.message());
}

#[test]
fn test_bad_return_type_is_trappable() {
    let mut it = interp();
    it.eval_text("f: func [return: [integer!] x] [return x]").unwrap();
    assert_eq!(eval_int(&mut it, "f 1"), 1);
    it.eval_text("e: trap [f \"a\"]").unwrap();
    assert_eq!(eval_mold(&mut it, "e/id"), "bad-return-type");
    assert_eq!(eval_mold(&mut it, "e/type"), "type-check");
}

#[test]
fn test_invisible_func() {
    let mut it = interp();
    it.eval_text("note: func [return: [] x] [print x]").unwrap();
    assert_eq!(eval_int(&mut it, "1 + 1 note \"hi\""), 2);
    assert_eq!(it.take_output(), vec!["hi".to_string()]);
}

#[test]
fn test_refinements() {
    let mut it = interp();
    it.eval_text("f: func [a /twice /plus n] [if twice [a: a * 2] if plus [a: a + n] a]")
        .unwrap();
    assert_eq!(eval_int(&mut it, "f 5"), 5);
    assert_eq!(eval_int(&mut it, "f/twice 5"), 10);
    assert_eq!(eval_int(&mut it, "f/plus 5 1"), 6);
    assert_eq!(eval_int(&mut it, "f/plus/twice 5 1"), 11);
    assert_eq!(eval_err(&mut it, "f/bogus 5"), ErrorId::BadRefine);
}

#[test]
fn test_unused_refinement_args_are_void() {
    let mut it = interp();
    it.eval_text("f: func [/plus n] [:n]").unwrap();
    assert!(it.eval_text("f").unwrap().is_void());
}

#[test]
fn test_hard_quoted_parameter() {
    let mut it = interp();
    it.eval_text("f: func [:w] [w]").unwrap();
    assert_eq!(eval_mold(&mut it, "f some-word"), "some-word");
    assert_eq!(eval_mold(&mut it, "f (1 + 2)"), "(1 + 2)");
}

#[test]
fn test_soft_quoted_parameter_evaluates_groups() {
    let mut it = interp();
    it.eval_text("f: func ['w] [w]").unwrap();
    assert_eq!(eval_mold(&mut it, "f some-word"), "some-word");
    assert_eq!(eval_int(&mut it, "f (1 + 2)"), 3);
}

#[test]
fn test_enfix_user_action() {
    let mut it = interp();
    it.eval_text("plus: enfix :add").unwrap();
    assert_eq!(eval_int(&mut it, "1 plus 2"), 3);
    assert_eq!(eval_int(&mut it, "add 1 2"), 3);
}

#[test]
fn test_make_frame_and_do() {
    let mut it = interp();
    it.eval_text("f: make-frame :subtract  f/value1: 10  f/value2: 4").unwrap();
    assert_eq!(eval_int(&mut it, "do f"), 6);
}

#[test]
fn test_make_frame_from_host() {
    let mut it = interp();
    let add = it.lib_value("add").unwrap();
    let frame = it.make_frame(&add).unwrap();
    assert_eq!(frame.kind(), Kind::Frame);
    assert_eq!(it.make_frame(&Cell::integer(1)).unwrap_err().id, ErrorId::NotAction);
}

#[test]
fn test_apply() {
    let mut it = interp();
    assert_eq!(eval_int(&mut it, "apply :add [1 2]"), 3);
    assert_eq!(eval_mold(&mut it, "apply 'append/only [[1] [2]]"), "[1 [2]]");
}

#[test]
fn test_call_with_from_host() {
    let mut it = interp();
    let multiply = it.lib_value("multiply").unwrap();
    let out = it
        .call_with(multiply, vec![Cell::integer(6), Cell::integer(7)])
        .unwrap();
    match out {
        Outcome::Value(v) => assert_eq!(v.as_integer(), Some(42)),
        Outcome::Invisible => panic!("multiply is not invisible"),
    }
}

#[test]
fn test_noop_call_allocates_nothing() {
    let mut it = interp();
    it.eval_text("noop: func [] []").unwrap();
    let noop = it.lib_value("noop").unwrap();
    it.call_with(noop, Vec::new()).unwrap();

    let before = it.heap.allocations();
    for _ in 0..100 {
        it.call_with(noop, Vec::new()).unwrap();
    }
    assert_eq!(it.heap.allocations(), before);
}
