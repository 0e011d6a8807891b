//! Per-thread interpreter state and the runtime it shares with other
//! threads.

use std::sync::Arc;

use crate::config::VmConfig;
use crate::exception::{Exception, Location};
use crate::jit::dispatch::JitState;
use crate::resolver::{ConstantResolver, MethodResolver};

/// Everything shared by the interpreter threads of one program.
pub struct Runtime {
    config: VmConfig,
    jit: Arc<JitState>,
    methods: Arc<dyn MethodResolver>,
    constants: Arc<dyn ConstantResolver>,
}

impl Runtime {
    pub fn new(
        config: VmConfig,
        methods: Arc<dyn MethodResolver>,
        constants: Arc<dyn ConstantResolver>,
    ) -> Arc<Self> {
        let jit = Arc::new(JitState::with_config(config.jit.clone()));
        Arc::new(Self {
            config,
            jit,
            methods,
            constants,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn jit(&self) -> &Arc<JitState> {
        &self.jit
    }

    pub fn methods(&self) -> &dyn MethodResolver {
        self.methods.as_ref()
    }

    pub fn constants(&self) -> &dyn ConstantResolver {
        self.constants.as_ref()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("jit", &self.jit)
            .finish_non_exhaustive()
    }
}

/// State of one interpreter thread.
#[derive(Debug)]
pub struct State {
    runtime: Arc<Runtime>,
    /// Locations of the suspended callers, outermost first.
    call_stack: Vec<Location>,
    pending_exception: Option<Exception>,
}

impl State {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            call_stack: Vec::new(),
            pending_exception: None,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Record `exception` as pending. A later raise replaces an earlier
    /// one that was never taken.
    pub fn raise_exception(&mut self, exception: Exception) {
        if let Some(previous) = &self.pending_exception {
            tracing::trace!(%previous, "pending exception replaced");
        }
        self.pending_exception = Some(exception);
    }

    pub fn take_exception(&mut self) -> Option<Exception> {
        self.pending_exception.take()
    }

    pub fn pending_exception(&self) -> Option<&Exception> {
        self.pending_exception.as_ref()
    }

    /// Number of suspended callers.
    pub fn depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn push_caller(&mut self, location: Location) {
        self.call_stack.push(location);
    }

    pub fn pop_caller(&mut self) -> Option<Location> {
        self.call_stack.pop()
    }

    pub fn call_stack(&self) -> &[Location] {
        &self.call_stack
    }

    pub(crate) fn truncate_call_stack(&mut self, depth: usize) {
        self.call_stack.truncate(depth);
    }
}
