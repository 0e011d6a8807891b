//! JIT dispatch logic.
//!
//! Provides the JIT state shared by every thread of a runtime: invocation
//! counting against the compilation threshold, the compile-request queue,
//! the `CompilerBackend` trait, and the method-update bracket used to
//! publish compiled code.

use std::sync::{Arc, Mutex, RwLock};

use super::compiler_thread::CompilerThread;
use super::request::{CompileRequest, Waiter};
use super::types::{CompileOutcome, JitConfig, JitError, JitMetrics, NativeCode};
use super::update::MethodUpdate;
use crate::machine_code::MachineCode;
use crate::scope::BlockEnvironment;
use crate::value::ClassId;

/// Trait for compilation backends.
///
/// The execution core defines this interface; a code generator provides
/// the implementation. The backend only produces code. Installing it is
/// done by [`JitState`] inside a method-update bracket.
pub trait CompilerBackend: Send + Sync {
    fn compile(&self, request: &CompileRequest) -> Result<NativeCode, JitError>;
}

/// JIT state shared by every thread of a runtime.
pub struct JitState {
    /// JIT configuration.
    pub config: JitConfig,
    /// Atomic metrics for monitoring JIT activity.
    pub metrics: JitMetrics,
    /// Registered compilation backend.
    backend: RwLock<Option<Arc<dyn CompilerBackend>>>,
    /// Background compilation thread.
    compiler_thread: RwLock<Option<CompilerThread>>,
    /// Serializes method-update brackets.
    update_lock: Mutex<()>,
}

impl JitState {
    /// Create a new JIT state with default configuration.
    pub fn new() -> Self {
        Self::with_config(JitConfig::default())
    }

    /// Create a new JIT state with a specific configuration.
    pub fn with_config(config: JitConfig) -> Self {
        Self {
            config,
            metrics: JitMetrics::new(),
            backend: RwLock::new(None),
            compiler_thread: RwLock::new(None),
            update_lock: Mutex::new(()),
        }
    }

    /// Reset all mutable state for test isolation.
    ///
    /// Stops the compiler thread, forgets the backend and zeroes the
    /// metrics. Does not reset `config`. Not available in production builds.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset_for_testing(&self) {
        self.metrics.reset();
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        {
            *self.backend.write().unwrap() = None;
        }
        self.shutdown_compiler_thread();
    }

    /// Register a compilation backend.
    ///
    /// Without a registered backend every request is abandoned.
    pub fn register_backend(&self, backend: Arc<dyn CompilerBackend>) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut guard = self.backend.write().unwrap();
        *guard = Some(backend);
    }

    /// Get a reference to the registered backend (if any).
    pub fn backend(&self) -> Option<Arc<dyn CompilerBackend>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.backend.read().unwrap();
        guard.clone()
    }

    /// Register the background compiler thread.
    ///
    /// Without a registered thread, requests are compiled synchronously on
    /// the requesting thread.
    pub fn register_compiler_thread(&self, thread: CompilerThread) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut guard = self.compiler_thread.write().unwrap();
        *guard = Some(thread);
    }

    /// Start a compiler thread that compiles through this state.
    ///
    /// The thread holds a weak reference; requests arriving after the
    /// state is gone are abandoned.
    pub fn start_compiler_thread(self: &Arc<Self>) -> Result<(), JitError> {
        let jit = Arc::downgrade(self);
        let thread = CompilerThread::start(move |request| {
            if let Some(jit) = jit.upgrade() {
                jit.compile(request);
            }
        })?;
        self.register_compiler_thread(thread);
        tracing::info!("compiler thread started");
        Ok(())
    }

    /// Stop the compiler thread, abandoning queued requests.
    pub fn shutdown_compiler_thread(&self) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let thread = self.compiler_thread.write().unwrap().take();
        if let Some(thread) = thread {
            thread.shutdown();
            tracing::info!("compiler thread stopped");
        }
    }

    pub fn has_compiler_thread(&self) -> bool {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.compiler_thread.read().unwrap();
        guard.is_some()
    }

    /// Count one invocation of `method` and request compilation when the
    /// count reaches the threshold.
    ///
    /// Returns the outcome when the request was made synchronously.
    pub fn on_invocation(
        &self,
        method: &Arc<MachineCode>,
        receiver_class: ClassId,
        block_env: Option<&Arc<BlockEnvironment>>,
        is_block: bool,
    ) -> Option<CompileOutcome> {
        if !self.config.enabled {
            return None;
        }
        let hits = method.record_hit();
        if hits != self.config.compilation_threshold {
            return None;
        }

        tracing::info!(
            method = %method.name(),
            hits,
            is_block,
            sync = self.config.sync,
            "method crossed the compilation threshold"
        );
        let request = CompileRequest::create(
            Arc::clone(method),
            Some(receiver_class),
            hits,
            block_env.cloned(),
            is_block,
        );
        if self.config.sync {
            Some(self.compile_soon(request))
        } else {
            self.request(request);
            None
        }
    }

    /// Enqueue a request without waiting for it.
    ///
    /// Returns `false` if the compiler thread is gone, in which case the
    /// request has been abandoned.
    pub fn request(&self, request: CompileRequest) -> bool {
        JitMetrics::bump(&self.metrics.requests);
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.compiler_thread.read().unwrap();
        match guard.as_ref() {
            Some(thread) => {
                let sent = thread.send(request);
                if !sent {
                    JitMetrics::bump(&self.metrics.abandoned);
                }
                sent
            }
            None => {
                drop(guard);
                self.compile(request);
                true
            }
        }
    }

    /// Enqueue a request and block until it is resolved.
    pub fn compile_soon(&self, mut request: CompileRequest) -> CompileOutcome {
        let waiter = Arc::new(Waiter::new());
        request.set_waiter(Arc::clone(&waiter));
        self.request(request);
        waiter.wait()
    }

    /// Compile `request` on the calling thread and install the result.
    pub fn compile(&self, request: CompileRequest) -> CompileOutcome {
        let Some(backend) = self.backend() else {
            JitMetrics::bump(&self.metrics.abandoned);
            tracing::debug!(method = %request.method().name(), "no compiler backend registered");
            request.complete(CompileOutcome::Abandoned);
            return CompileOutcome::Abandoned;
        };

        match backend.compile(&request) {
            Ok(native) => {
                let mut update = self.start_method_update();
                update.install_native(request.method(), native);
                self.end_method_update(update);
                JitMetrics::bump(&self.metrics.compilations);
                tracing::info!(
                    method = %request.method().name(),
                    hits = request.hits(),
                    "installed native code"
                );
                request.complete(CompileOutcome::Compiled);
                CompileOutcome::Compiled
            }
            Err(err) => {
                JitMetrics::bump(&self.metrics.compilation_failures);
                tracing::warn!(method = %request.method().name(), error = %err, "compilation failed");
                request.complete(CompileOutcome::Failed);
                CompileOutcome::Failed
            }
        }
    }

    /// Open a method-update bracket. Blocks while another bracket is open.
    pub fn start_method_update(&self) -> MethodUpdate<'_> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let guard = self.update_lock.lock().unwrap();
        MethodUpdate::begin(guard)
    }

    /// Publish the bracket's staged changes and close it. Returns the
    /// number of changes published.
    pub fn end_method_update(&self, update: MethodUpdate<'_>) -> usize {
        let count = update.commit();
        for _ in 0..count {
            JitMetrics::bump(&self.metrics.installs);
        }
        tracing::debug!(count, "method update published");
        count
    }
}

impl Default for JitState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitState")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .field("has_backend", &self.backend().is_some())
            .field("has_compiler_thread", &self.has_compiler_thread())
            .finish()
    }
}

/// Native code installed for `method`, if any.
///
/// Returns `None` when the method has not been compiled (caller should
/// fall through to the interpreter).
pub fn try_native_dispatch(method: &MachineCode) -> Option<Arc<NativeCode>> {
    method.native()
}
