//! Compile triggers, backends and the method-update bracket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::test_helpers::{DOG, TestWorld, call, method, no_jit, object, runtime_with};
use crate::config::VmConfig;
use crate::errors::VMError;
use crate::frame::{CallFrame, Invocation};
use crate::interpreter::Interpreter;
use crate::jit::dispatch::{CompilerBackend, try_native_dispatch};
use crate::jit::request::CompileRequest;
use crate::jit::types::{CompileOutcome, JitError, NativeCode};
use crate::linker;
use crate::resolver::{NativeArgs, NativeFn};
use crate::state::State;
use crate::value::{ClassId, Value};

/// Backend whose compiled code returns a fixed integer.
struct ConstantBackend(i64);

impl CompilerBackend for ConstantBackend {
    fn compile(&self, request: &CompileRequest) -> Result<NativeCode, JitError> {
        let value = self.0;
        let entry: NativeFn = Arc::new(
            move |_state: &mut State, _args: NativeArgs<'_>| -> Result<Value, VMError> {
                Ok(Value::Integer(value))
            },
        );
        Ok(NativeCode::new(entry, request))
    }
}

struct FailingBackend;

impl CompilerBackend for FailingBackend {
    fn compile(&self, _request: &CompileRequest) -> Result<NativeCode, JitError> {
        Err(JitError::CompilationFailed("unsupported instruction".to_string()))
    }
}

/// Records what it was asked to compile and refuses everything.
#[derive(Default)]
struct RecordingBackend {
    seen: Mutex<Vec<(String, bool, bool)>>,
}

impl CompilerBackend for RecordingBackend {
    fn compile(&self, request: &CompileRequest) -> Result<NativeCode, JitError> {
        self.seen.lock().unwrap().push((
            request.method().name().to_string(),
            request.is_block(),
            request.block_env().is_some(),
        ));
        Err(JitError::CompilationFailed("recording only".to_string()))
    }
}

fn jit_config(threshold: u64, sync: bool) -> VmConfig {
    let mut config = VmConfig::default();
    config.jit.compilation_threshold = threshold;
    config.jit.sync = sync;
    config
}

fn one() -> Arc<crate::machine_code::CompiledCode> {
    Arc::new(method("one", "push_int 1\nret", vec![]))
}

#[test]
fn test_threshold_requests_exactly_once() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, jit_config(3, false));
    let code = one();
    for _ in 0..5 {
        assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Integer(1)));
    }

    let metrics = runtime.jit().metrics.snapshot();
    assert_eq!(metrics.requests, 1);
    assert_eq!(metrics.abandoned, 1);
    assert_eq!(metrics.compilations, 0);
    assert_eq!(code.machine_code().unwrap().hits(), 5);
}

#[test]
fn test_calls_below_threshold_request_nothing() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, jit_config(3, false));
    let code = one();
    for _ in 0..2 {
        assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Integer(1)));
    }

    let metrics = runtime.jit().metrics.snapshot();
    assert_eq!(metrics.requests, 0);
    assert_eq!(metrics.abandoned, 0);
    assert_eq!(code.machine_code().unwrap().hits(), 2);
}

#[test]
fn test_disabled_compiler_counts_nothing() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let code = one();
    for _ in 0..20 {
        call(&runtime, &code, Value::Nil, vec![]).unwrap();
    }
    assert_eq!(code.machine_code().unwrap().hits(), 0);
    assert_eq!(runtime.jit().metrics.snapshot().requests, 0);
}

#[test]
fn test_sync_request_reports_its_outcome() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, jit_config(2, true));
    let machine_code = one().internalize().unwrap();
    let jit = runtime.jit();
    assert_eq!(jit.on_invocation(&machine_code, ClassId::NIL, None, false), None);
    assert_eq!(
        jit.on_invocation(&machine_code, ClassId::NIL, None, false),
        Some(CompileOutcome::Abandoned)
    );
    assert_eq!(jit.on_invocation(&machine_code, ClassId::NIL, None, false), None);
}

#[test]
fn test_compiled_code_replaces_interpretation() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, jit_config(2, false));
    runtime.jit().register_backend(Arc::new(ConstantBackend(99)));
    let code = one();

    assert_eq!(call(&runtime, &code, object(DOG), vec![]), Ok(Value::Integer(1)));
    // The second call crosses the threshold and compiles before running.
    assert_eq!(call(&runtime, &code, object(DOG), vec![]), Ok(Value::Integer(99)));
    assert_eq!(call(&runtime, &code, object(DOG), vec![]), Ok(Value::Integer(99)));

    let machine_code = code.machine_code().unwrap();
    let native = try_native_dispatch(&machine_code).unwrap();
    assert_eq!(native.method(), machine_code.id());
    assert_eq!(native.specialized_for(), Some(DOG));
    assert_eq!(native.compiled_at_hits(), 2);
    assert_eq!(machine_code.version(), 1);

    let metrics = runtime.jit().metrics.snapshot();
    assert_eq!(metrics.compilations, 1);
    assert_eq!(metrics.installs, 1);
    assert_eq!(metrics.native_executions, 2);
}

#[test]
fn test_failed_compilation_keeps_interpreting() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, jit_config(1, false));
    runtime.jit().register_backend(Arc::new(FailingBackend));
    let code = one();

    assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Integer(1)));
    assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Integer(1)));
    assert!(code.machine_code().unwrap().native().is_none());
    let metrics = runtime.jit().metrics.snapshot();
    assert_eq!(metrics.compilation_failures, 1);
    assert_eq!(metrics.installs, 0);
}

#[test]
fn test_block_requests_carry_their_environment() {
    let world = TestWorld::new();
    let yielder = Arc::new(method("yielder", "push_int 1\nyield_stack 1\nret", vec![]));
    world.define_method(DOG, "yielder", &yielder);
    let runtime = runtime_with(&world, jit_config(1, false));
    let backend = Arc::new(RecordingBackend::default());
    runtime.jit().register_backend(Arc::clone(&backend) as Arc<dyn CompilerBackend>);

    let block = Arc::new(method("block in run", "push_nil\nret", vec![]).with_required_args(1));
    let code = Arc::new(method(
        "run",
        "push_self\ncreate_block 0\nsend_stack_with_block 1 0\nret",
        vec![Value::Code(block), Value::symbol("yielder")],
    ));
    assert_eq!(call(&runtime, &code, object(DOG), vec![]), Ok(Value::Nil));

    let seen = backend.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("run".to_string(), false, false),
            ("yielder".to_string(), false, false),
            ("block in run".to_string(), true, true),
        ]
    );
}

#[test]
fn test_compiler_thread_with_waiting_callers() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, jit_config(1, true));
    let jit = Arc::clone(runtime.jit());
    jit.register_backend(Arc::new(ConstantBackend(7)));
    jit.start_compiler_thread().unwrap();
    assert!(jit.has_compiler_thread());

    // The first call waits for its own compilation and runs the result.
    let code = one();
    assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Integer(7)));

    jit.shutdown_compiler_thread();
    assert!(!jit.has_compiler_thread());
    assert_eq!(jit.metrics.snapshot().compilations, 1);
}

#[test]
fn test_background_compilation_installs_later() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, jit_config(1, false));
    let jit = Arc::clone(runtime.jit());
    jit.register_backend(Arc::new(ConstantBackend(7)));
    jit.start_compiler_thread().unwrap();

    let code = one();
    call(&runtime, &code, Value::Nil, vec![]).unwrap();
    let machine_code = code.machine_code().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while machine_code.native().is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Integer(7)));
    jit.shutdown_compiler_thread();
}

#[test]
fn test_running_frames_keep_their_program_version() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let code = one();
    let machine_code = code.internalize().unwrap();
    let mut state = State::new(Arc::clone(&runtime));
    let mut frame =
        CallFrame::for_method(&machine_code, Invocation::new(Value::Nil, vec![])).unwrap();

    let replacement = method("one", "push_int 2\nret", vec![]);
    let program = linker::link(&replacement, machine_code.id()).unwrap();
    let jit = runtime.jit();
    let mut update = jit.start_method_update();
    update.replace_program(&machine_code, program);
    assert_eq!(jit.end_method_update(update), 1);
    assert_eq!(machine_code.version(), 1);

    assert_eq!(Interpreter::run(&mut state, &mut frame).unwrap(), Value::Integer(1));
    assert_eq!(call(&runtime, &code, Value::Nil, vec![]), Ok(Value::Integer(2)));
}

#[test]
fn test_dropped_bracket_publishes_nothing() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let code = one();
    let machine_code = code.internalize().unwrap();
    let before = machine_code.program().unwrap();

    let replacement = method("one", "push_int 2\nret", vec![]);
    let mut update = runtime.jit().start_method_update();
    update.replace_program(
        &machine_code,
        linker::link(&replacement, machine_code.id()).unwrap(),
    );
    assert_eq!(update.len(), 1);
    drop(update);

    assert_eq!(machine_code.version(), 0);
    assert!(Arc::ptr_eq(&before, &machine_code.program().unwrap()));
    assert_eq!(runtime.jit().metrics.snapshot().installs, 0);
}

#[test]
fn test_brackets_are_exclusive() {
    let world = TestWorld::new();
    let runtime = runtime_with(&world, no_jit());
    let entered = Arc::new(AtomicBool::new(false));

    let first = runtime.jit().start_method_update();
    let other = {
        let runtime = Arc::clone(&runtime);
        let entered = Arc::clone(&entered);
        thread::spawn(move || {
            let update = runtime.jit().start_method_update();
            entered.store(true, Ordering::SeqCst);
            runtime.jit().end_method_update(update)
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!entered.load(Ordering::SeqCst));

    runtime.jit().end_method_update(first);
    assert_eq!(other.join().unwrap(), 0);
    assert!(entered.load(Ordering::SeqCst));
}
