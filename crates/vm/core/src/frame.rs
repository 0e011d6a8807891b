//! Activation records.
//!
//! A frame owns one value array laid out as `[working stack | registers]`.
//! Register operands were offset past the working stack at link time, so a
//! register index addresses the array directly.

use std::sync::Arc;

use crate::call_site::CallSite;
use crate::constant_cache::ConstantCache;
use crate::errors::InternalError;
use crate::exception::{Exception, Location};
use crate::machine_code::MachineCode;
use crate::opcodes::Opcode;
use crate::program::{LinkedProgram, Word};
use crate::scope::{BlockEnvironment, VariableScope};
use crate::unwind_site::{UnwindEntry, UnwindSite};
use crate::value::{ModuleId, Symbol, Value};

/// Receiver, arguments and block of a method invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub receiver: Value,
    pub args: Vec<Value>,
    pub block: Option<Value>,
    /// Module the method was found in.
    pub module: Option<ModuleId>,
}

impl Invocation {
    pub fn new(receiver: Value, args: Vec<Value>) -> Self {
        Self {
            receiver,
            args,
            block: None,
            module: None,
        }
    }

    pub fn with_block(mut self, block: Option<Value>) -> Self {
        self.block = block;
        self
    }

    pub fn with_module(mut self, module: Option<ModuleId>) -> Self {
        self.module = module;
        self
    }
}

#[derive(Debug)]
pub struct CallFrame {
    pub machine_code: Arc<MachineCode>,
    /// Program version this frame started on. Kept for the whole
    /// activation even if the method is relinked meanwhile.
    pub program: Arc<LinkedProgram>,
    /// Offset of the next instruction.
    pub ip: usize,
    /// Offset of the instruction being executed.
    pub op_ip: usize,
    stk: Vec<Value>,
    sp: usize,
    stack_size: usize,
    pub self_value: Value,
    pub scope: Arc<VariableScope>,
    pub module: Option<ModuleId>,
    pub lexical_module: ModuleId,
    pub args: Vec<Value>,
    pub block: Option<Value>,
    unwinds: Vec<UnwindEntry>,
    /// Exception being handled by the active rescue or ensure handler.
    pub current_exception: Option<Arc<Exception>>,
}

impl CallFrame {
    fn with_layout(
        machine_code: &Arc<MachineCode>,
        scope: Arc<VariableScope>,
        self_value: Value,
        args: Vec<Value>,
    ) -> Result<Self, InternalError> {
        let program = machine_code.program()?;
        let stack_size = machine_code.stack_size();
        let slots = stack_size.saturating_add(machine_code.registers());
        Ok(Self {
            machine_code: Arc::clone(machine_code),
            program,
            ip: 0,
            op_ip: 0,
            stk: vec![Value::Nil; slots],
            sp: 0,
            stack_size,
            self_value,
            scope,
            module: None,
            lexical_module: machine_code.lexical_module(),
            args,
            block: None,
            unwinds: Vec::new(),
            current_exception: None,
        })
    }

    /// Frame for a method body. Arguments are copied into the first locals.
    pub fn for_method(
        machine_code: &Arc<MachineCode>,
        invocation: Invocation,
    ) -> Result<Self, InternalError> {
        let scope = Arc::new(VariableScope::new(
            machine_code.name().clone(),
            invocation.receiver.clone(),
            machine_code.local_count(),
            None,
        ));
        for (index, arg) in invocation.args.iter().enumerate() {
            scope.set_local(index, arg.clone())?;
        }
        let mut frame = Self::with_layout(
            machine_code,
            scope,
            invocation.receiver,
            invocation.args,
        )?;
        frame.module = invocation.module;
        frame.block = invocation.block;
        Ok(frame)
    }

    /// Frame for a block body. The block's scope is chained to the scope
    /// it closed over. Missing arguments are nil, extra ones dropped.
    pub fn for_block(
        machine_code: &Arc<MachineCode>,
        env: &Arc<BlockEnvironment>,
        mut args: Vec<Value>,
    ) -> Result<Self, InternalError> {
        args.resize(machine_code.required_args(), Value::Nil);
        let scope = Arc::new(VariableScope::new(
            machine_code.name().clone(),
            env.self_value.clone(),
            machine_code.local_count(),
            Some(Arc::clone(&env.scope)),
        ));
        for (index, arg) in args.iter().enumerate() {
            scope.set_local(index, arg.clone())?;
        }
        let mut frame = Self::with_layout(machine_code, scope, env.self_value.clone(), args)?;
        frame.module = env.module;
        Ok(frame)
    }

    pub fn name(&self) -> &Symbol {
        self.machine_code.name()
    }

    pub fn location(&self) -> Location {
        Location {
            method: self.machine_code.name().clone(),
            ip: self.op_ip,
        }
    }

    pub fn opcode_at(&self, ip: usize) -> Result<Opcode, InternalError> {
        match self.program.word(ip) {
            Some(Word::Op(opcode)) => Ok(*opcode),
            Some(_) => Err(InternalError::InvalidOpcode(ip)),
            None => Err(InternalError::IpOutOfBounds(ip)),
        }
    }

    pub fn jump(&mut self, target: usize) {
        self.ip = target;
    }

    /// Operand word `offset` positions after the current opcode.
    pub fn word(&self, offset: usize) -> Result<&Word, InternalError> {
        let at = self.op_ip.saturating_add(offset);
        self.program.word(at).ok_or(InternalError::IpOutOfBounds(at))
    }

    pub fn imm(&self, offset: usize) -> Result<i64, InternalError> {
        self.word(offset)?
            .as_imm()
            .ok_or(InternalError::MalformedOperand {
                ip: self.op_ip,
                expected: "an immediate",
            })
    }

    /// Immediate operand used as an index, count or jump target.
    pub fn index(&self, offset: usize) -> Result<usize, InternalError> {
        usize::try_from(self.imm(offset)?).map_err(|_| InternalError::MalformedOperand {
            ip: self.op_ip,
            expected: "a non-negative immediate",
        })
    }

    pub fn reference(&self, offset: usize) -> Result<Value, InternalError> {
        self.word(offset)?
            .as_ref_value()
            .cloned()
            .ok_or(InternalError::MalformedOperand {
                ip: self.op_ip,
                expected: "a resolved reference",
            })
    }

    pub fn symbol(&self, offset: usize) -> Result<Symbol, InternalError> {
        match self.word(offset)?.as_ref_value() {
            Some(Value::Symbol(symbol)) => Ok(symbol.clone()),
            _ => Err(InternalError::MalformedOperand {
                ip: self.op_ip,
                expected: "a symbol",
            }),
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), InternalError> {
        if self.sp >= self.stack_size {
            return Err(InternalError::StackOverflow(self.stack_size));
        }
        let slot = self
            .stk
            .get_mut(self.sp)
            .ok_or(InternalError::StackOverflow(self.stack_size))?;
        *slot = value;
        self.sp = self.sp.saturating_add(1);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, InternalError> {
        let top = self.sp.checked_sub(1).ok_or(InternalError::StackUnderflow)?;
        let slot = self.stk.get_mut(top).ok_or(InternalError::StackUnderflow)?;
        self.sp = top;
        Ok(std::mem::replace(slot, Value::Nil))
    }

    /// Pop two values. Returns `[left, right]` where `right` was on top.
    pub fn pop_pair(&mut self) -> Result<[Value; 2], InternalError> {
        let right = self.pop()?;
        let left = self.pop()?;
        Ok([left, right])
    }

    /// Pop `n` values, returned in push order.
    pub fn pop_many(&mut self, n: usize) -> Result<Vec<Value>, InternalError> {
        let base = self.sp.checked_sub(n).ok_or(InternalError::StackUnderflow)?;
        let values = self
            .stk
            .get_mut(base..self.sp)
            .ok_or(InternalError::StackUnderflow)?
            .iter_mut()
            .map(std::mem::take)
            .collect();
        self.sp = base;
        Ok(values)
    }

    pub fn top(&self) -> Result<&Value, InternalError> {
        let top = self.sp.checked_sub(1).ok_or(InternalError::StackUnderflow)?;
        self.stk.get(top).ok_or(InternalError::StackUnderflow)
    }

    pub fn stack_depth(&self) -> usize {
        self.sp
    }

    /// Live portion of the working stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        self.stk.get(..self.sp).unwrap_or_default()
    }

    pub fn register(&self, index: usize) -> Result<&Value, InternalError> {
        if index < self.stack_size {
            return Err(InternalError::RegisterOutOfRange(index));
        }
        self.stk
            .get(index)
            .ok_or(InternalError::RegisterOutOfRange(index))
    }

    pub fn set_register(&mut self, index: usize, value: Value) -> Result<(), InternalError> {
        if index < self.stack_size {
            return Err(InternalError::RegisterOutOfRange(index));
        }
        let slot = self
            .stk
            .get_mut(index)
            .ok_or(InternalError::RegisterOutOfRange(index))?;
        *slot = value;
        Ok(())
    }

    pub fn call_site(&self) -> Result<Arc<CallSite>, InternalError> {
        self.program
            .call_site(self.op_ip)
            .cloned()
            .ok_or(InternalError::MissingCallSite(self.op_ip))
    }

    pub fn constant_cache(&self) -> Result<Arc<ConstantCache>, InternalError> {
        self.program
            .constant_cache(self.op_ip)
            .cloned()
            .ok_or(InternalError::MissingConstantCache(self.op_ip))
    }

    pub fn unwind_site(&self) -> Result<UnwindSite, InternalError> {
        self.program
            .unwind_site(self.op_ip)
            .ok_or(InternalError::MissingUnwindSite(self.op_ip))
    }

    pub fn push_unwind(&mut self, site: UnwindSite) {
        self.unwinds.push(UnwindEntry {
            site,
            stack_depth: self.sp,
        });
    }

    /// Drop the `count` innermost unwind entries.
    pub fn pop_unwind(&mut self, count: usize) {
        let keep = self.unwinds.len().saturating_sub(count);
        self.unwinds.truncate(keep);
    }

    pub fn unwind_depth(&self) -> usize {
        self.unwinds.len()
    }

    /// Pop entries until one that handles exceptions is found.
    pub fn pop_handler(&mut self) -> Option<UnwindEntry> {
        while let Some(entry) = self.unwinds.pop() {
            if entry.site.kind().handles_exceptions() {
                return Some(entry);
            }
        }
        None
    }

    /// Resume at `entry`'s handler with `exception` as the current
    /// exception.
    pub fn resume_at_handler(&mut self, entry: UnwindEntry, exception: Arc<Exception>) {
        while self.sp > entry.stack_depth {
            if self.pop().is_err() {
                break;
            }
        }
        self.ip = entry.site.handler();
        self.current_exception = Some(exception);
    }
}
