//! Method bodies before and after linking.
//!
//! [`CompiledCode`] is what a compiler emits: a raw instruction stream, a
//! literal pool and the frame layout. [`MachineCode`] is its runtime
//! counterpart. It owns the published [`LinkedProgram`], the optional
//! native entry installed by the JIT, and the invocation counter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::errors::{InternalError, LinkError};
use crate::jit::types::NativeCode;
use crate::linker;
use crate::program::LinkedProgram;
use crate::value::{MethodId, ModuleId, Symbol, Value};

pub struct CompiledCode {
    name: Symbol,
    iseq: Vec<i64>,
    literals: Arc<[Value]>,
    stack_size: usize,
    registers: usize,
    local_count: usize,
    required_args: usize,
    lexical_module: ModuleId,
    machine_code: Mutex<Option<Arc<MachineCode>>>,
}

impl CompiledCode {
    /// A method body with a working stack as deep as the stream is long,
    /// no registers and no locals.
    pub fn new(name: impl Into<Symbol>, iseq: Vec<i64>, literals: Vec<Value>) -> Self {
        let stack_size = iseq.len().max(1);
        Self {
            name: name.into(),
            iseq,
            literals: literals.into(),
            stack_size,
            registers: 0,
            local_count: 0,
            required_args: 0,
            lexical_module: ModuleId::ROOT,
            machine_code: Mutex::new(None),
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_registers(mut self, registers: usize) -> Self {
        self.registers = registers;
        self
    }

    pub fn with_locals(mut self, local_count: usize) -> Self {
        self.local_count = local_count.max(self.required_args);
        self
    }

    /// Arguments bind to the first locals, so this also raises the local
    /// count when needed.
    pub fn with_required_args(mut self, required_args: usize) -> Self {
        self.required_args = required_args;
        self.local_count = self.local_count.max(required_args);
        self
    }

    pub fn with_lexical_module(mut self, module: ModuleId) -> Self {
        self.lexical_module = module;
        self
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn iseq(&self) -> &[i64] {
        &self.iseq
    }

    pub fn literals(&self) -> &[Value] {
        &self.literals
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn registers(&self) -> usize {
        self.registers
    }

    pub fn local_count(&self) -> usize {
        self.local_count
    }

    pub fn required_args(&self) -> usize {
        self.required_args
    }

    pub fn lexical_module(&self) -> ModuleId {
        self.lexical_module
    }

    /// The runtime form of this method, linking it on first use.
    ///
    /// Concurrent callers serialize on the slot, so the method is linked
    /// exactly once.
    pub fn internalize(&self) -> Result<Arc<MachineCode>, LinkError> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut slot = self.machine_code.lock().unwrap();
        if let Some(machine_code) = slot.as_ref() {
            return Ok(Arc::clone(machine_code));
        }
        let machine_code = Arc::new(MachineCode::new(self));
        linker::prepare(self, &machine_code)?;
        *slot = Some(Arc::clone(&machine_code));
        Ok(machine_code)
    }

    /// The runtime form, if this method has been internalized.
    pub fn machine_code(&self) -> Option<Arc<MachineCode>> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let slot = self.machine_code.lock().unwrap();
        slot.clone()
    }
}

impl fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCode")
            .field("name", &self.name)
            .field("words", &self.iseq.len())
            .field("literals", &self.literals.len())
            .field("stack_size", &self.stack_size)
            .field("registers", &self.registers)
            .finish_non_exhaustive()
    }
}

/// Runtime form of a method.
///
/// The frame layout is copied from the [`CompiledCode`] so that frames
/// never reach back into it.
pub struct MachineCode {
    id: MethodId,
    name: Symbol,
    stack_size: usize,
    registers: usize,
    local_count: usize,
    required_args: usize,
    lexical_module: ModuleId,
    program: RwLock<Option<Arc<LinkedProgram>>>,
    native: RwLock<Option<Arc<NativeCode>>>,
    hits: AtomicU64,
    version: AtomicU64,
}

impl MachineCode {
    pub fn new(code: &CompiledCode) -> Self {
        Self {
            id: MethodId::next(),
            name: code.name.clone(),
            stack_size: code.stack_size,
            registers: code.registers,
            local_count: code.local_count,
            required_args: code.required_args,
            lexical_module: code.lexical_module,
            program: RwLock::new(None),
            native: RwLock::new(None),
            hits: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    /// Method identity; also the id carried by tagged nils.
    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn registers(&self) -> usize {
        self.registers
    }

    pub fn local_count(&self) -> usize {
        self.local_count
    }

    pub fn required_args(&self) -> usize {
        self.required_args
    }

    pub fn lexical_module(&self) -> ModuleId {
        self.lexical_module
    }

    /// The currently published program.
    pub fn program(&self) -> Result<Arc<LinkedProgram>, InternalError> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.program.read().unwrap();
        guard
            .clone()
            .ok_or_else(|| InternalError::NotLinked(self.name.clone()))
    }

    pub fn is_linked(&self) -> bool {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.program.read().unwrap();
        guard.is_some()
    }

    /// Publish the first program. Fails if one is already published.
    pub(crate) fn publish_initial(&self, program: Arc<LinkedProgram>) -> Result<(), LinkError> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut guard = self.program.write().unwrap();
        if guard.is_some() {
            return Err(LinkError::AlreadyLinked(self.name.clone()));
        }
        *guard = Some(program);
        Ok(())
    }

    /// Swap in a new program version. Frames already running keep the
    /// version they started with.
    pub(crate) fn replace_program(&self, program: Arc<LinkedProgram>) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut guard = self.program.write().unwrap();
        *guard = Some(program);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn native(&self) -> Option<Arc<NativeCode>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.native.read().unwrap();
        guard.clone()
    }

    pub(crate) fn install_native(&self, native: Arc<NativeCode>) {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut guard = self.native.write().unwrap();
        *guard = Some(native);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Count one invocation and return the new total.
    pub fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of program or native installations published so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MachineCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineCode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("hits", &self.hits())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
