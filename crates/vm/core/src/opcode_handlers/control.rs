use crate::{
    errors::{InternalError, OpcodeResult, VMError},
    frame::CallFrame,
    interpreter::Interpreter,
    state::State,
};

// Control Flow and Diagnostics (7)
// Opcodes: GOTO, GOTO_IF_TRUE, GOTO_IF_FALSE, RET, B_IF, M_COUNTER, M_LOG

impl Interpreter {
    // GOTO target
    #[inline]
    pub fn op_goto(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let target = frame.index(1)?;
        frame.jump(target);
        Ok(OpcodeResult::Continue)
    }

    // GOTO_IF_TRUE target, pops the condition
    #[inline]
    pub fn op_goto_if_true(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let target = frame.index(1)?;
        if frame.pop()?.is_truthy() {
            frame.jump(target);
        }
        Ok(OpcodeResult::Continue)
    }

    // GOTO_IF_FALSE target, pops the condition
    #[inline]
    pub fn op_goto_if_false(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let target = frame.index(1)?;
        if !frame.pop()?.is_truthy() {
            frame.jump(target);
        }
        Ok(OpcodeResult::Continue)
    }

    // RET: return the top of the stack
    #[inline]
    pub fn op_ret(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let value = frame.pop()?;
        Ok(OpcodeResult::Return(value))
    }

    // B_IF reg, target
    pub fn op_b_if(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let condition = frame.register(frame.index(1)?)?.is_truthy();
        let target = frame.index(2)?;
        if condition {
            frame.jump(target);
        }
        Ok(OpcodeResult::Continue)
    }

    // M_COUNTER
    pub fn op_m_counter(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let counter = frame
            .program
            .measurement(frame.op_ip)
            .ok_or(InternalError::MissingMeasurement(frame.op_ip))?;
        counter.increment();
        Ok(OpcodeResult::Continue)
    }

    // M_LOG reg
    pub fn op_m_log(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        let value = frame.register(register)?;
        tracing::debug!(
            method = %frame.name(),
            ip = frame.op_ip,
            register,
            %value,
            "m_log"
        );
        Ok(OpcodeResult::Continue)
    }
}
