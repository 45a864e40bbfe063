// File: tests/interpreter_tests.rs
//
// End-to-end tests driving the public `loxc` entry points exactly as the
// CLI and REPL do: compile+run a whole program, inspect captured stdout
// and the resulting InterpretResult.

use loxc::errors::InterpretResult;
use loxc::vm::Vm;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

#[derive(Clone)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_source(source: &str) -> (InterpretResult, String) {
    let buf = Rc::new(RefCell::new(Vec::new()));
    let mut vm = Vm::with_output(Box::new(SharedBuf(buf.clone())));
    let result = vm.interpret(source);
    let output = String::from_utf8(buf.borrow().clone()).unwrap();
    (result, output)
}

fn assert_ok_prints(source: &str, expected: &str) {
    let (result, output) = run_source(source);
    assert!(matches!(result, InterpretResult::Ok), "expected Ok, got {:?}", result);
    assert_eq!(output, expected);
}

#[test]
fn arithmetic_precedence() {
    assert_ok_prints("print 1 + 2 * 3;", "7\n");
}

#[test]
fn string_concatenation() {
    assert_ok_prints(r#"var a = "foo"; var b = "bar"; print a + b;"#, "foobar\n");
}

#[test]
fn closure_over_local_variable() {
    assert_ok_prints(
        "fun mk(x) { fun get() { return x; } return get; } var g = mk(42); print g();",
        "42\n",
    );
}

#[test]
fn class_method_call() {
    assert_ok_prints(r#"class A { greet() { print "hi"; } } A().greet();"#, "hi\n");
}

#[test]
fn single_inheritance_with_super_init() {
    assert_ok_prints(
        "class A { init(n) { this.n = n; } } \
         class B < A { init(n) { super.init(n); } show() { print this.n; } } \
         B(7).show();",
        "7\n",
    );
}

#[test]
fn while_loop_accumulation() {
    assert_ok_prints(
        "var i = 0; var s = 0; while (i < 5) { s = s + i; i = i + 1; } print s;",
        "10\n",
    );
}

#[test]
fn repeated_closure_increment_shares_state() {
    assert_ok_prints(
        "fun c() { var a = 1; fun inc() { a = a + 1; return a; } return inc; } \
         var f = c(); print f(); print f(); print f();",
        "2\n3\n4\n",
    );
}

#[test]
fn undefined_variable_is_runtime_error() {
    let (result, _) = run_source("print a;");
    match result {
        InterpretResult::RuntimeError(ref err) => {
            assert!(err.message.contains("Undefined variable 'a'."));
        }
        ref other => panic!("expected RuntimeError, got {:?}", other),
    }
    assert_eq!(result_exit_code(&result), 70);
}

#[test]
fn undefined_variable_suggests_close_global_name() {
    let (result, _) = run_source("var count = 1; print coutn;");
    match result {
        InterpretResult::RuntimeError(err) => {
            assert!(err.message.contains("Undefined variable 'coutn'."));
            assert!(err.message.contains("Did you mean 'count'?"));
        }
        other => panic!("expected RuntimeError, got {:?}", other),
    }
}

#[test]
fn global_self_reference_in_initializer_is_allowed() {
    let (result, _) = run_source("var a = a; print a;");
    assert!(matches!(result, InterpretResult::Ok));
}

#[test]
fn local_self_reference_in_initializer_is_compile_error() {
    let (result, _) = run_source("{ var a = a; }");
    assert!(matches!(result, InterpretResult::CompileError(_)));
}

#[test]
fn clock_returns_nonnegative_number() {
    assert_ok_prints("print clock() >= 0;", "true\n");
}

fn result_exit_code(result: &InterpretResult) -> i32 {
    result.exit_code()
}

#[test]
fn exit_codes_match_spec() {
    let (ok, _) = run_source("print 1;");
    assert_eq!(result_exit_code(&ok), 0);

    let (compile_err, _) = run_source("print ;");
    assert_eq!(result_exit_code(&compile_err), 65);

    let (runtime_err, _) = run_source("1 + \"a\";");
    assert_eq!(result_exit_code(&runtime_err), 70);
}

#[test]
fn two_hundred_fifty_five_parameters_is_allowed() {
    let params: Vec<String> = (0..255).map(|i| format!("p{}", i)).collect();
    let args: Vec<String> = (0..255).map(|i| i.to_string()).collect();
    let source =
        format!("fun f({}) {{ return p0; }} print f({});", params.join(", "), args.join(", "));
    let (result, output) = run_source(&source);
    assert!(matches!(result, InterpretResult::Ok), "expected Ok, got {:?}", result);
    assert_eq!(output, "0\n");
}

#[test]
fn two_hundred_fifty_six_parameters_is_compile_error() {
    let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
    let source = format!("fun f({}) {{ return p0; }}", params.join(", "));
    let (result, _) = run_source(&source);
    assert!(matches!(result, InterpretResult::CompileError(_)));
}

#[test]
fn deep_recursion_past_call_depth_is_runtime_stack_overflow() {
    let source = "fun rec(n) { return rec(n + 1); } rec(0);";
    let (result, _) = run_source(source);
    match result {
        InterpretResult::RuntimeError(err) => {
            assert!(err.message.contains("Stack overflow"));
        }
        other => panic!("expected RuntimeError, got {:?}", other),
    }
}

#[test]
fn adding_number_and_string_is_runtime_error() {
    let (result, _) = run_source(r#"print 1 + "a";"#);
    assert!(matches!(result, InterpretResult::RuntimeError(_)));
}

#[test]
fn division_by_zero_yields_infinity_not_an_error() {
    assert_ok_prints("print 1 / 0;", "inf\n");
}

#[test]
fn for_loop_desugars_correctly() {
    assert_ok_prints(
        "var sum = 0; for (var i = 0; i < 4; i = i + 1) { sum = sum + i; } print sum;",
        "6\n",
    );
}

#[test]
fn logical_and_or_short_circuit() {
    // If the right-hand side were evaluated despite short-circuiting, this
    // would raise a runtime type error instead of printing.
    assert_ok_prints(
        r#"print false and (1 + "x" == 1); print true or (1 + "x" == 1);"#,
        "false\ntrue\n",
    );
}

#[test]
fn multiple_compile_errors_are_all_reported() {
    let (result, _) = run_source("print ; print ;");
    match result {
        InterpretResult::CompileError(errors) => {
            assert!(errors.len() >= 2, "expected multiple errors, got {:?}", errors);
        }
        other => panic!("expected CompileError, got {:?}", other),
    }
}

#[test]
fn repl_runs_each_line_as_independent_program() {
    let buf = Rc::new(RefCell::new(Vec::new()));
    let mut vm = Vm::with_output(Box::new(SharedBuf(buf.clone())));
    let first = vm.interpret("print 1;");
    assert!(matches!(first, InterpretResult::Ok));
    let second = vm.interpret("print undefinedThing;");
    assert!(matches!(second, InterpretResult::RuntimeError(_)));
    let third = vm.interpret("print 2;");
    assert!(matches!(third, InterpretResult::Ok));
    let output = String::from_utf8(buf.borrow().clone()).unwrap();
    assert_eq!(output, "1\n2\n");
}
