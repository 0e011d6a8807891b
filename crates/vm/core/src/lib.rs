//! # Strand VM
//!
//! The execution core of a bytecode virtual machine for a dynamically
//! typed object language.
//!
//! ## Overview
//!
//! Compiled methods arrive as opcode streams plus literal tables. The
//! [`linker`] rewrites each stream once into a directly executable
//! [`program::LinkedProgram`], resolving symbolic operands and attaching
//! per-instruction side tables: [`call_site::CallSite`]s for dispatch,
//! [`constant_cache::ConstantCache`]s for constant reads and
//! [`unwind_site::UnwindSite`]s for exception handlers.
//!
//! ## Architecture
//!
//! ```text
//! CompiledCode ──internalize──▶ MachineCode ──link──▶ LinkedProgram
//!                                    │                    │
//!                                    │               OPCODE_TABLE
//!                                    ▼                    ▼
//!                              JitState ◀── on_invocation ── Interpreter
//!                                    │                    │
//!                              CompilerThread        CallFrame / State
//! ```
//!
//! ## Key Components
//!
//! - [`interpreter::Interpreter`]: dispatch loop and exception boundary
//! - [`frame::CallFrame`]: operand stack, registers and unwind stack
//! - [`state::State`]: per-thread call stack and pending exception
//! - [`jit::dispatch::JitState`]: invocation counting and compile requests
//! - [`config::VmConfig`]: tunables loaded from TOML
//!
//! ## Usage
//!
//! ```ignore
//! let runtime = Runtime::new(VmConfig::default(), methods, constants);
//! let mut state = State::new(runtime);
//! let value = Interpreter::call(&mut state, &code, Value::Nil, vec![])?;
//! ```

pub mod assembler;
pub mod call_site;
pub mod config;
pub mod constant_cache;
pub mod diagnostics;
pub mod errors;
pub mod exception;
pub mod frame;
pub mod interpreter;
pub mod jit;
pub mod linker;
pub mod machine_code;
pub mod opcode_handlers;
pub mod opcodes;
pub mod program;
pub mod resolver;
pub mod scope;
pub mod state;
pub mod unwind_site;
pub mod value;
#[cfg(feature = "perf_opcode_timings")]
pub mod timings;

#[cfg(test)]
mod tests;
