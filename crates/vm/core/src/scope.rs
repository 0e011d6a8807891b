//! Local-variable scopes and the block environments that capture them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::InternalError;
use crate::machine_code::CompiledCode;
use crate::value::{ModuleId, Symbol, Value};

/// Locals of one activation.
///
/// A scope starts out owned by its frame. Flushing it to the heap marks it
/// as outliving the frame: blocks and backtraces may still read it after
/// the frame is gone.
#[derive(Debug)]
pub struct VariableScope {
    method: Symbol,
    self_value: Value,
    locals: Mutex<Vec<Value>>,
    parent: Option<Arc<VariableScope>>,
    on_heap: AtomicBool,
}

impl VariableScope {
    pub fn new(
        method: Symbol,
        self_value: Value,
        local_count: usize,
        parent: Option<Arc<VariableScope>>,
    ) -> Self {
        Self {
            method,
            self_value,
            locals: Mutex::new(vec![Value::Nil; local_count]),
            parent,
            on_heap: AtomicBool::new(false),
        }
    }

    pub fn method(&self) -> &Symbol {
        &self.method
    }

    pub fn self_value(&self) -> &Value {
        &self.self_value
    }

    pub fn parent(&self) -> Option<&Arc<VariableScope>> {
        self.parent.as_ref()
    }

    /// The scope `depth` levels up the parent chain.
    pub fn ancestor(&self, depth: usize) -> Option<&VariableScope> {
        let mut scope = self;
        for _ in 0..depth {
            scope = scope.parent.as_deref()?;
        }
        Some(scope)
    }

    pub fn local(&self, index: usize) -> Result<Value, InternalError> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let locals = self.locals.lock().unwrap();
        locals
            .get(index)
            .cloned()
            .ok_or(InternalError::LocalOutOfRange { index, depth: 0 })
    }

    pub fn set_local(&self, index: usize, value: Value) -> Result<(), InternalError> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut locals = self.locals.lock().unwrap();
        let slot = locals
            .get_mut(index)
            .ok_or(InternalError::LocalOutOfRange { index, depth: 0 })?;
        *slot = value;
        Ok(())
    }

    pub fn local_at_depth(&self, index: usize, depth: usize) -> Result<Value, InternalError> {
        self.ancestor(depth)
            .ok_or(InternalError::LocalOutOfRange { index, depth })?
            .local(index)
            .map_err(|_| InternalError::LocalOutOfRange { index, depth })
    }

    pub fn set_local_at_depth(
        &self,
        index: usize,
        depth: usize,
        value: Value,
    ) -> Result<(), InternalError> {
        self.ancestor(depth)
            .ok_or(InternalError::LocalOutOfRange { index, depth })?
            .set_local(index, value)
            .map_err(|_| InternalError::LocalOutOfRange { index, depth })
    }

    /// Snapshot of the locals.
    pub fn locals(&self) -> Vec<Value> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let locals = self.locals.lock().unwrap();
        locals.clone()
    }

    /// Mark the scope as outliving its frame. Idempotent.
    pub fn flush_to_heap(&self) {
        self.on_heap.store(true, Ordering::Release);
    }

    pub fn is_on_heap(&self) -> bool {
        self.on_heap.load(Ordering::Acquire)
    }
}

/// A block closed over the scope that created it.
#[derive(Debug)]
pub struct BlockEnvironment {
    pub code: Arc<CompiledCode>,
    pub scope: Arc<VariableScope>,
    pub self_value: Value,
    pub module: Option<ModuleId>,
}
