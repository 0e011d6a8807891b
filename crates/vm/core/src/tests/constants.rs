use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::test_helpers::{TestWorld, call, method, no_jit, runtime_with};
use crate::exception::ExceptionKind;
use crate::value::{ModuleId, Value};

const OUTER: ModuleId = ModuleId(200);

#[test]
fn test_push_const_is_cached_until_a_definition() {
    let world = TestWorld::new();
    world.set_constant(ModuleId::ROOT, "LIMIT", Value::Integer(10));
    let runtime = runtime_with(&world, no_jit());
    let read = Arc::new(method("read", "push_const 0\nret", vec![Value::symbol("LIMIT")]));

    assert_eq!(call(&runtime, &read, Value::Nil, vec![]), Ok(Value::Integer(10)));
    assert_eq!(call(&runtime, &read, Value::Nil, vec![]), Ok(Value::Integer(10)));
    assert_eq!(world.constant_lookups.load(Ordering::Relaxed), 1);

    let program = read.machine_code().unwrap().program().unwrap();
    let entry = program.constant_cache(0).unwrap().entry().unwrap();
    assert_eq!(entry.module(), ModuleId::ROOT);
    assert_eq!(entry.under(), None);

    let redefine = Arc::new(method(
        "redefine",
        "push_int 20\nset_const 0\nret",
        vec![Value::symbol("LIMIT")],
    ));
    assert_eq!(call(&runtime, &redefine, Value::Nil, vec![]), Ok(Value::Integer(20)));
    assert_eq!(call(&runtime, &read, Value::Nil, vec![]), Ok(Value::Integer(20)));
    assert_eq!(world.constant_lookups.load(Ordering::Relaxed), 2);
}

#[test]
fn test_lexical_module_shadows_root() {
    let world = TestWorld::new();
    world.set_constant(ModuleId::ROOT, "NAME", Value::string("root"));
    world.set_constant(OUTER, "NAME", Value::string("outer"));
    let runtime = runtime_with(&world, no_jit());
    let read = Arc::new(
        method("read", "push_const 0\nret", vec![Value::symbol("NAME")])
            .with_lexical_module(OUTER),
    );
    assert_eq!(call(&runtime, &read, Value::Nil, vec![]), Ok(Value::string("outer")));
}

#[test]
fn test_scoped_constants() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let define = Arc::new(method(
        "define",
        "push_literal 0\npush_int 9\nset_const_at 1\nret",
        vec![Value::Module(OUTER), Value::symbol("Inner")],
    ));
    assert_eq!(call(&runtime, &define, Value::Nil, vec![]), Ok(Value::Integer(9)));

    let find = Arc::new(method(
        "find",
        "push_literal 0\nfind_const 1\nret",
        vec![Value::Module(OUTER), Value::symbol("Inner")],
    ));
    assert_eq!(call(&runtime, &find, Value::Nil, vec![]), Ok(Value::Integer(9)));
    let program = find.machine_code().unwrap().program().unwrap();
    let entry = program.constant_cache(2).unwrap().entry().unwrap();
    assert_eq!(entry.under(), Some(OUTER));

    // Not defined at the root.
    let read = Arc::new(method("read", "push_const 0\nret", vec![Value::symbol("Inner")]));
    let err = call(&runtime, &read, Value::Nil, vec![]).unwrap_err();
    assert_eq!(err.kind(), &ExceptionKind::NameError);
}

#[test]
fn test_find_const_needs_a_module() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let find = Arc::new(method(
        "find",
        "push_int 1\nfind_const 0\nret",
        vec![Value::symbol("Inner")],
    ));
    let err = call(&runtime, &find, Value::Nil, vec![]).unwrap_err();
    assert_eq!(err.kind(), &ExceptionKind::TypeError);
    assert_eq!(err.message(), "find_const: expected a module, got Integer");
}

#[test]
fn test_missing_constant_is_a_name_error() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let read = Arc::new(method("read", "push_const 0\nret", vec![Value::symbol("Missing")]));
    let err = call(&runtime, &read, Value::Nil, vec![]).unwrap_err();
    assert_eq!(err.kind(), &ExceptionKind::NameError);
    assert_eq!(err.message(), "uninitialized constant Missing");
    let program = read.machine_code().unwrap().program().unwrap();
    assert!(program.constant_cache(0).unwrap().is_empty());
}
