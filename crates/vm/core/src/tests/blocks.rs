use std::sync::Arc;

use super::test_helpers::{DOG, TestWorld, call, method, no_jit, object, runtime_with};
use crate::exception::ExceptionKind;
use crate::machine_code::CompiledCode;
use crate::value::Value;

/// `each_twice` yields 10 and then 20 to its block.
fn each_twice(world: &TestWorld) {
    let body = Arc::new(method(
        "each_twice",
        "push_int 10\nyield_stack 1\npop\npush_int 20\nyield_stack 1\nret",
        vec![],
    ));
    world.define_method(DOG, "each_twice", &body);
}

/// Block adding its argument to local 0 of the enclosing method.
fn accumulate() -> Arc<CompiledCode> {
    Arc::new(
        method(
            "block in sum",
            "
              r_load_local 0 0
              r_load_local_depth 1 0 1
              n_iadd 1 1 0
              r_store_local_depth 1 0 1
              r_ret 1
            ",
            vec![],
        )
        .with_registers(2)
        .with_required_args(1),
    )
}

#[test]
fn test_block_updates_the_enclosing_scope() {
    let world = TestWorld::new();
    each_twice(&world);
    let runtime = runtime_with(&world, no_jit());
    let source = "
          r_load_0 0
          r_store_local 0 0
          push_self
          create_block 0
          send_stack_with_block 1 0
          pop
          r_load_local 0 0
          r_ret 0
    ";
    let sum = Arc::new(
        method(
            "sum",
            source,
            vec![Value::Code(accumulate()), Value::symbol("each_twice")],
        )
        .with_registers(1)
        .with_locals(1),
    );
    assert_eq!(call(&runtime, &sum, object(DOG), vec![]), Ok(Value::Integer(30)));
}

#[test]
fn test_block_result_is_the_yield_value() {
    let world = TestWorld::new();
    each_twice(&world);
    let runtime = runtime_with(&world, no_jit());
    let doubled = Arc::new(
        method(
            "block in doubled",
            "r_load_local 0 0\nn_iadd 0 0 0\nr_ret 0",
            vec![],
        )
        .with_registers(1)
        .with_required_args(1),
    );
    let code = Arc::new(method(
        "doubled",
        "push_self\ncreate_block 0\nsend_stack_with_block 1 0\nret",
        vec![Value::Code(doubled), Value::symbol("each_twice")],
    ));
    assert_eq!(call(&runtime, &code, object(DOG), vec![]), Ok(Value::Integer(40)));
}

#[test]
fn test_yield_without_a_block() {
    let world = TestWorld::new();
    each_twice(&world);
    let runtime = runtime_with(&world, no_jit());
    let code = Arc::new(method(
        "no_block",
        "push_self\npush_nil\nsend_stack_with_block 0 0\nret",
        vec![Value::symbol("each_twice")],
    ));
    let err = call(&runtime, &code, object(DOG), vec![]).unwrap_err();
    assert_eq!(err.kind(), &ExceptionKind::LocalJumpError);
    assert_eq!(err.message(), "no block given (yield)");
}

#[test]
fn test_create_block_flushes_the_scope() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let inner = Arc::new(method("block in keep", "push_nil\nret", vec![]));
    let code = Arc::new(method(
        "keep",
        "create_block 0\nret",
        vec![Value::Code(inner)],
    ));
    let Ok(Value::Block(env)) = call(&runtime, &code, Value::Nil, vec![]) else {
        panic!("expected a block");
    };
    assert!(env.scope.is_on_heap());
    assert_eq!(env.code.name().as_str(), "block in keep");
}
