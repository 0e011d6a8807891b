use std::sync::Arc;

use super::test_helpers::{DOG, TestWorld, call, method, no_jit, runtime_with};
use crate::exception::{Exception, ExceptionKind, Location};
use crate::value::{ObjectRef, Symbol, Value};

fn at(method: &str, ip: usize) -> Location {
    Location {
        method: Symbol::new(method),
        ip,
    }
}

#[test]
fn test_rescue_catches_and_exposes_the_exception() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let source = "
          setup_unwind @rescue 1
          push_literal 0
          raise_exc
        rescue:
          push_current_exception
          clear_exception
          ret
    ";
    let code = Arc::new(method("rescuer", source, vec![Value::string("boom")]));
    let Ok(Value::Exception(exception)) = call(&runtime, &code, Value::Nil, vec![]) else {
        panic!("expected the rescued exception as the return value");
    };
    assert_eq!(exception.kind(), &ExceptionKind::RuntimeError);
    assert_eq!(exception.message(), "boom");
    assert_eq!(exception.locations(), Some(&[at("rescuer", 5)][..]));
}

#[test]
fn test_ensure_runs_then_reraises() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let receiver = ObjectRef::new(DOG);
    let source = "
          setup_unwind @ensure 2
          push_literal 0
          raise_exc
        ensure:
          push_int 1
          set_ivar 1
          pop
          reraise
          push_nil
          ret
    ";
    let code = Arc::new(method(
        "ensurer",
        source,
        vec![Value::string("boom"), Value::symbol("@ran")],
    ));

    let err = call(&runtime, &code, Value::Object(receiver.clone()), vec![]).unwrap_err();
    assert_eq!(err.kind(), &ExceptionKind::RuntimeError);
    // The original raise site survives the reraise.
    assert_eq!(err.locations(), Some(&[at("ensurer", 5)][..]));
    assert_eq!(receiver.ivar(&Symbol::new("@ran")), Value::Integer(1));
}

#[test]
fn test_unwind_removes_the_handler() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let source = "
          setup_unwind @rescue 1
          unwind 1
          push_literal 0
          raise_exc
        rescue:
          push_int 0
          ret
    ";
    let code = Arc::new(method("guarded", source, vec![Value::string("late")]));
    let err = call(&runtime, &code, Value::Nil, vec![]).unwrap_err();
    assert_eq!(err.message(), "late");
    assert_eq!(err.locations(), Some(&[at("guarded", 7)][..]));
}

#[test]
fn test_innermost_handler_wins() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let source = "
          setup_unwind @outer 1
          setup_unwind @inner 3
          push_literal 0
          raise_exc
        inner:
          push_int 1
          ret
        outer:
          push_int 2
          ret
    ";
    let code = Arc::new(method("nested", source, vec![Value::string("boom")]));
    assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Integer(1)));
}

#[test]
fn test_handler_restores_the_working_stack() {
    let world = TestWorld::new();
    let failing = Arc::new(method(
        "fail",
        "push_literal 0\nraise_exc",
        vec![Value::string("callee failed")],
    ));
    world.define_method(DOG, "fail", &failing);
    let runtime = runtime_with(&world, no_jit());
    let source = "
          push_int 7
          setup_unwind @rescue 1
          push_self
          send_method 0
          ret
        rescue:
          clear_exception
          push_int 1
          add
          ret
    ";
    let code = Arc::new(method("caller", source, vec![Value::symbol("fail")]));
    assert_eq!(
        call(&runtime, &code, super::test_helpers::object(DOG), vec![]),
        Ok(Value::Integer(8))
    );
}

#[test]
fn test_raise_keeps_locations_it_already_has() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let mut preset = Exception::new(ExceptionKind::Custom(Symbol::new("MyError")), "elsewhere");
    preset.set_locations(vec![at("origin", 42)]);
    let code = Arc::new(method(
        "rethrow",
        "push_literal 0\nraise_exc",
        vec![Value::Exception(Arc::new(preset))],
    ));

    let err = call(&runtime, &code, Value::Nil, vec![]).unwrap_err();
    assert_eq!(err.kind().name(), "MyError");
    assert_eq!(err.locations(), Some(&[at("origin", 42)][..]));
}

#[test]
fn test_raise_rejects_other_values() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let code = Arc::new(method("bad_raise", "push_int 3\nraise_exc", vec![]));
    let err = call(&runtime, &code, Value::Nil, vec![]).unwrap_err();
    assert_eq!(err.kind(), &ExceptionKind::TypeError);
    assert_eq!(
        err.message(),
        "raise_exc: expected an exception or a string, got Integer"
    );
}

#[test]
fn test_reraise_without_exception_continues() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let code = Arc::new(method(
        "quiet",
        "reraise\npush_current_exception\nret",
        vec![],
    ));
    assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Nil));
}
