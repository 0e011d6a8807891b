//! Compile-trigger infrastructure.
//!
//! Invocation counting, request construction, the background compiler
//! thread with its waiters, and the method-update bracket that installs
//! finished native code. Code generation itself sits behind
//! [`dispatch::CompilerBackend`] so the interpreter carries no code
//! generator of its own.

pub mod analyzer;
pub mod compiler_thread;
pub mod dispatch;
pub mod request;
pub mod types;
pub mod update;
