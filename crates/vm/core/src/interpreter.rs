//! The threaded dispatcher.
//!
//! [`Interpreter::execute`] is the one place where failures of any kind
//! become language exceptions. Handlers return `Result<OpcodeResult,
//! VMError>`; the boundary maps each error category to an exception,
//! attaches locations, records it on the [`State`] and reports the frame
//! as unfinished. [`Interpreter::run`] then either resumes the frame at an
//! unwind handler or propagates the exception to the caller.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::call_site::{CallSite, MethodMissingReason};
use crate::errors::{InternalError, OpcodeResult, VMError};
use crate::exception::{Exception, ExceptionKind, Location};
use crate::frame::{CallFrame, Invocation};
use crate::jit::types::JitMetrics;
use crate::machine_code::{CompiledCode, MachineCode};
use crate::opcodes::OPCODE_TABLE;
use crate::resolver::{Executable, LookupFlags, Method, NativeArgs};
use crate::scope::BlockEnvironment;
use crate::state::State;
use crate::value::{ModuleId, Symbol, Value};

/// Message used for native failures that carry no printable payload.
pub const UNKNOWN_NATIVE_FAILURE: &str = "unknown native failure";

/// Native stack that must remain before entering another activation.
const STACK_RED_ZONE: usize = 256 * 1024;
/// Size of each segment allocated once the red zone is reached.
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

/// Namespace of the dispatch loop and the instruction handlers.
#[derive(Debug, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    /// Execute `frame` from its current ip.
    ///
    /// Returns the frame's return value, or `None` with an exception
    /// pending on `state`.
    pub fn execute(state: &mut State, frame: &mut CallFrame) -> Option<Value> {
        let depth = state.depth();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| Self::dispatch(state, frame)));

        let exception = match outcome {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(VMError::Type(err))) => {
                let mut exception = Exception::make_type_error(&err);
                exception.set_locations(Location::from_call_stack(state, frame));
                frame.scope.flush_to_heap();
                exception
            }
            Ok(Err(VMError::Raise(exception))) => {
                let mut exception = *exception;
                if !exception.has_locations() {
                    exception.set_locations(Location::from_call_stack(state, frame));
                }
                exception
            }
            Ok(Err(VMError::Internal(err))) => {
                tracing::warn!(method = %frame.name(), ip = frame.op_ip, error = %err, "interpreter error");
                let mut exception = Exception::make_interpreter_error(err.to_string());
                exception.set_locations(Location::from_call_stack(state, frame));
                frame.scope.flush_to_heap();
                exception
            }
            Err(payload) => {
                // Callers that were executing when the panic started never
                // popped their locations.
                state.truncate_call_stack(depth);
                let message = panic_message(payload.as_ref());
                tracing::error!(method = %frame.name(), ip = frame.op_ip, %message, "native failure");
                let mut exception = Exception::make_interpreter_error(message);
                exception.set_locations(Location::from_call_stack(state, frame));
                frame.scope.flush_to_heap();
                exception
            }
        };

        state.raise_exception(exception);
        None
    }

    fn dispatch(state: &mut State, frame: &mut CallFrame) -> Result<Value, VMError> {
        loop {
            let opcode = frame.opcode_at(frame.ip)?;
            frame.op_ip = frame.ip;
            frame.ip = frame.ip.saturating_add(opcode.width());

            #[cfg(feature = "perf_opcode_timings")]
            let opcode_time_start = std::time::Instant::now();

            #[allow(clippy::indexing_slicing)]
            let op_result = OPCODE_TABLE[usize::from(opcode)].call(state, frame);

            #[cfg(feature = "perf_opcode_timings")]
            crate::timings::record(opcode, opcode_time_start.elapsed());

            match op_result? {
                OpcodeResult::Continue => {}
                OpcodeResult::Return(value) => return Ok(value),
            }
        }
    }

    /// Execute `frame` to completion, resuming at unwind handlers while
    /// any are registered.
    pub fn run(state: &mut State, frame: &mut CallFrame) -> Result<Value, VMError> {
        #[cfg(feature = "perf_opcode_timings")]
        crate::timings::record_activation();

        loop {
            if let Some(value) = Self::execute(state, frame) {
                return Ok(value);
            }
            let exception = state.take_exception().ok_or(InternalError::NoValue)?;
            match frame.pop_handler() {
                Some(entry) => {
                    tracing::trace!(
                        method = %frame.name(),
                        handler = entry.site.handler(),
                        kind = ?entry.site.kind(),
                        %exception,
                        "resuming at unwind handler"
                    );
                    frame.resume_at_handler(entry, Arc::new(exception));
                }
                None => return Err(VMError::Raise(Box::new(exception))),
            }
        }
    }

    /// Enter a method.
    ///
    /// Counts the invocation for the compiler, runs installed native code
    /// when there is some, and interprets the method otherwise.
    pub fn invoke(
        state: &mut State,
        method: &Arc<MachineCode>,
        invocation: Invocation,
    ) -> Result<Value, VMError> {
        let jit = Arc::clone(state.runtime().jit());
        jit.on_invocation(method, invocation.receiver.class_id(), None, false);

        if let Some(native) = method.native() {
            JitMetrics::bump(&jit.metrics.native_executions);
            return native.invoke(
                state,
                NativeArgs {
                    receiver: &invocation.receiver,
                    args: &invocation.args,
                    block: invocation.block.as_ref(),
                },
            );
        }

        if invocation.args.len() != method.required_args() {
            return Err(VMError::raise(
                ExceptionKind::ArgumentError,
                format!(
                    "wrong number of arguments (given {}, expected {})",
                    invocation.args.len(),
                    method.required_args()
                ),
            ));
        }
        Self::check_depth(state)?;

        let mut frame = CallFrame::for_method(method, invocation)?;
        Self::run_nested(state, &mut frame)
    }

    /// Run a block with `args`.
    pub fn call_block(
        state: &mut State,
        env: &Arc<BlockEnvironment>,
        args: Vec<Value>,
    ) -> Result<Value, VMError> {
        let method = env.code.internalize()?;
        let jit = Arc::clone(state.runtime().jit());
        jit.on_invocation(&method, env.self_value.class_id(), Some(env), true);

        if let Some(native) = method.native() {
            JitMetrics::bump(&jit.metrics.native_executions);
            return native.invoke(
                state,
                NativeArgs {
                    receiver: &env.self_value,
                    args: &args,
                    block: None,
                },
            );
        }
        Self::check_depth(state)?;

        let mut frame = CallFrame::for_block(&method, env, args)?;
        Self::run_nested(state, &mut frame)
    }

    /// Call `code` as a method of `receiver` from outside any frame.
    pub fn call(
        state: &mut State,
        code: &Arc<CompiledCode>,
        receiver: Value,
        args: Vec<Value>,
    ) -> Result<Value, Exception> {
        code.internalize()
            .map_err(VMError::from)
            .and_then(|method| Self::invoke(state, &method, Invocation::new(receiver, args)))
            .map_err(|err| Self::into_exception(state, err))
    }

    /// Convert an error that never crossed a frame boundary.
    fn into_exception(state: &State, err: VMError) -> Exception {
        let mut exception = match err {
            VMError::Type(err) => Exception::make_type_error(&err),
            VMError::Raise(exception) => *exception,
            VMError::Internal(err) => Exception::make_interpreter_error(err.to_string()),
        };
        if !exception.has_locations() {
            exception.set_locations(state.call_stack().iter().rev().cloned().collect());
        }
        exception
    }

    /// Every activation re-enters the dispatch loop on the native stack, so
    /// nested runs move to a fresh segment when the current one runs low.
    /// The depth limit then bounds recursion instead of the thread's stack.
    fn run_nested(state: &mut State, frame: &mut CallFrame) -> Result<Value, VMError> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || Self::run(state, frame))
    }

    fn check_depth(state: &State) -> Result<(), InternalError> {
        let limit = state.runtime().config().interpreter.max_call_depth;
        if state.depth() >= limit {
            return Err(InternalError::CallDepthExceeded(limit));
        }
        Ok(())
    }

    /// Send `site`'s message to `receiver`.
    pub(crate) fn send(
        state: &mut State,
        frame: &CallFrame,
        site: &CallSite,
        receiver: Value,
        args: Vec<Value>,
        block: Option<Value>,
    ) -> Result<Value, VMError> {
        let cache = site.lookup(receiver.class_id(), state.runtime().methods(), frame.module);
        match cache.callable() {
            Some(method) => Self::call_method(
                state,
                frame,
                method,
                cache.stored_module(),
                receiver,
                args,
                block,
            ),
            None => Self::method_missing(
                state,
                frame,
                site.name(),
                cache.method_missing(),
                receiver,
                args,
                block,
            ),
        }
    }

    /// Call `method` with the caller's location recorded for backtraces.
    pub(crate) fn call_method(
        state: &mut State,
        frame: &CallFrame,
        method: &Method,
        module: Option<ModuleId>,
        receiver: Value,
        args: Vec<Value>,
        block: Option<Value>,
    ) -> Result<Value, VMError> {
        state.push_caller(frame.location());
        let result = match &method.executable {
            Executable::Compiled(code) => code.internalize().map_err(VMError::from).and_then(
                |machine_code| {
                    Self::invoke(
                        state,
                        &machine_code,
                        Invocation {
                            receiver,
                            args,
                            block,
                            module,
                        },
                    )
                },
            ),
            Executable::Native(native) => native(
                state,
                NativeArgs {
                    receiver: &receiver,
                    args: &args,
                    block: block.as_ref(),
                },
            ),
        };
        state.pop_caller();
        result
    }

    /// Fallback for a send that found nothing callable: `method_missing`
    /// with the name prepended, or `NoMethodError`.
    fn method_missing(
        state: &mut State,
        frame: &CallFrame,
        name: &Symbol,
        reason: MethodMissingReason,
        receiver: Value,
        args: Vec<Value>,
        block: Option<Value>,
    ) -> Result<Value, VMError> {
        let flags = LookupFlags {
            allow_private: true,
            ..Default::default()
        };
        let fallback = state.runtime().methods().resolve(
            receiver.class_id(),
            &Symbol::new("method_missing"),
            flags,
        );
        match fallback {
            Some(found) => {
                let mut forwarded = Vec::with_capacity(args.len().saturating_add(1));
                forwarded.push(Value::Symbol(name.clone()));
                forwarded.extend(args);
                Self::call_method(
                    state,
                    frame,
                    &found.method,
                    Some(found.module),
                    receiver,
                    forwarded,
                    block,
                )
            }
            None => Err(VMError::raise(
                ExceptionKind::NoMethodError,
                reason.message(name, &receiver),
            )),
        }
    }

    /// Run a block from inside `frame`.
    pub(crate) fn yield_to(
        state: &mut State,
        frame: &CallFrame,
        env: &Arc<BlockEnvironment>,
        args: Vec<Value>,
    ) -> Result<Value, VMError> {
        state.push_caller(frame.location());
        let result = Self::call_block(state, env, args);
        state.pop_caller();
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        UNKNOWN_NATIVE_FAILURE.to_string()
    }
}
