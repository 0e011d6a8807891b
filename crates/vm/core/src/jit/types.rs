//! JIT compilation types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::request::CompileRequest;
use crate::errors::VMError;
use crate::resolver::{NativeArgs, NativeFn};
use crate::state::State;
use crate::value::{ClassId, MethodId, Value};

/// Configuration for the JIT compilation tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// When false, invocations are never counted and nothing is compiled.
    pub enabled: bool,
    /// Number of invocations before a method becomes a compilation
    /// candidate. The request fires exactly when the count reaches it.
    pub compilation_threshold: u64,
    /// Block the invoking thread until the compile request is resolved.
    pub sync: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compilation_threshold: 10,
            sync: false,
        }
    }
}

/// Errors that can occur during compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitError {
    #[error("compilation failed: {0}")]
    CompilationFailed(String),
    #[error("no compiler backend registered")]
    NoBackend,
    #[error("failed to spawn compiler thread: {0}")]
    ThreadSpawn(String),
}

/// How a compile request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileOutcome {
    Compiled,
    Failed,
    /// The request was dropped before any backend handled it.
    Abandoned,
}

/// Native code produced by a backend for one method.
pub struct NativeCode {
    entry: NativeFn,
    method: MethodId,
    specialized_for: Option<ClassId>,
    compiled_at_hits: u64,
}

impl NativeCode {
    pub fn new(entry: NativeFn, request: &CompileRequest) -> Self {
        Self {
            entry,
            method: request.method().id(),
            specialized_for: request.receiver_class(),
            compiled_at_hits: request.hits(),
        }
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Receiver type the request was made for.
    pub fn specialized_for(&self) -> Option<ClassId> {
        self.specialized_for
    }

    pub fn compiled_at_hits(&self) -> u64 {
        self.compiled_at_hits
    }

    pub fn invoke(&self, state: &mut State, args: NativeArgs<'_>) -> Result<Value, VMError> {
        (self.entry)(state, args)
    }
}

impl fmt::Debug for NativeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCode")
            .field("method", &self.method)
            .field("specialized_for", &self.specialized_for)
            .field("compiled_at_hits", &self.compiled_at_hits)
            .finish_non_exhaustive()
    }
}

/// Atomic metrics for compilation and native execution events.
#[derive(Debug)]
pub struct JitMetrics {
    /// Requests created when a method crossed the threshold.
    pub requests: AtomicU64,
    /// Successful compilations.
    pub compilations: AtomicU64,
    /// Backend failures.
    pub compilation_failures: AtomicU64,
    /// Requests resolved without reaching a backend.
    pub abandoned: AtomicU64,
    /// Invocations served by native code.
    pub native_executions: AtomicU64,
    /// Changes published through method-update brackets.
    pub installs: AtomicU64,
}

impl JitMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
            compilation_failures: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            native_executions: AtomicU64::new(0),
            installs: AtomicU64::new(0),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all counters to zero.
    ///
    /// Used by `JitState::reset_for_testing()` to prevent state leakage
    /// between `#[serial]` tests. Not available in production builds.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.compilations.store(0, Ordering::Relaxed);
        self.compilation_failures.store(0, Ordering::Relaxed);
        self.abandoned.store(0, Ordering::Relaxed);
        self.native_executions.store(0, Ordering::Relaxed);
        self.installs.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> JitMetricsSnapshot {
        JitMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            compilation_failures: self.compilation_failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            native_executions: self.native_executions.load(Ordering::Relaxed),
            installs: self.installs.load(Ordering::Relaxed),
        }
    }
}

impl Default for JitMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitMetricsSnapshot {
    pub requests: u64,
    pub compilations: u64,
    pub compilation_failures: u64,
    pub abandoned: u64,
    pub native_executions: u64,
    pub installs: u64,
}
