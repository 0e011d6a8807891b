use crate::{
    errors::{OpcodeResult, VMError},
    frame::CallFrame,
    interpreter::Interpreter,
    state::State,
    value::Value,
};

// Register Operations (17)
// Opcodes: R_LOAD_LOCAL, R_STORE_LOCAL, R_LOAD_LOCAL_DEPTH, R_STORE_LOCAL_DEPTH, R_LOAD_STACK,
// R_STORE_STACK, R_LOAD_SELF, R_LOAD_NEG1, R_LOAD_0, R_LOAD_1, R_LOAD_2, R_LOAD_FALSE,
// R_LOAD_TRUE, R_LOAD_NIL, R_LOAD_LITERAL, R_RET, R_COPY

impl Interpreter {
    // R_LOAD_LOCAL reg, index
    pub fn op_r_load_local(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        let value = frame.scope.local(frame.index(2)?)?;
        frame.set_register(register, value)?;
        Ok(OpcodeResult::Continue)
    }

    // R_STORE_LOCAL reg, index
    pub fn op_r_store_local(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let value = frame.register(frame.index(1)?)?.clone();
        frame.scope.set_local(frame.index(2)?, value)?;
        Ok(OpcodeResult::Continue)
    }

    // R_LOAD_LOCAL_DEPTH reg, index, depth
    pub fn op_r_load_local_depth(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        let value = frame
            .scope
            .local_at_depth(frame.index(2)?, frame.index(3)?)?;
        frame.set_register(register, value)?;
        Ok(OpcodeResult::Continue)
    }

    // R_STORE_LOCAL_DEPTH reg, index, depth
    pub fn op_r_store_local_depth(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let value = frame.register(frame.index(1)?)?.clone();
        frame
            .scope
            .set_local_at_depth(frame.index(2)?, frame.index(3)?, value)?;
        Ok(OpcodeResult::Continue)
    }

    // R_LOAD_STACK reg: moves the top of the stack into reg
    pub fn op_r_load_stack(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        let value = frame.pop()?;
        frame.set_register(register, value)?;
        Ok(OpcodeResult::Continue)
    }

    // R_STORE_STACK reg: pushes reg
    pub fn op_r_store_stack(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let value = frame.register(frame.index(1)?)?.clone();
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_r_load_self(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        let receiver = frame.self_value.clone();
        frame.set_register(register, receiver)?;
        Ok(OpcodeResult::Continue)
    }

    // Generic R_LOAD_<N> operation for the small integer constants.
    #[inline]
    pub fn op_r_load_int<const N: i64>(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        frame.set_register(register, Value::Integer(N))?;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_r_load_false(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        frame.set_register(register, Value::False)?;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_r_load_true(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        frame.set_register(register, Value::True)?;
        Ok(OpcodeResult::Continue)
    }

    // R_LOAD_NIL reg, tag (the tag was resolved to a tagged nil at link time)
    pub fn op_r_load_nil(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        let nil = frame.reference(2)?;
        frame.set_register(register, nil)?;
        Ok(OpcodeResult::Continue)
    }

    // R_LOAD_LITERAL reg, literal
    pub fn op_r_load_literal(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let register = frame.index(1)?;
        let literal = frame.reference(2)?;
        frame.set_register(register, literal)?;
        Ok(OpcodeResult::Continue)
    }

    // R_RET reg
    pub fn op_r_ret(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let value = frame.register(frame.index(1)?)?.clone();
        Ok(OpcodeResult::Return(value))
    }

    // R_COPY dst, src
    pub fn op_r_copy(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let dst = frame.index(1)?;
        let value = frame.register(frame.index(2)?)?.clone();
        frame.set_register(dst, value)?;
        Ok(OpcodeResult::Continue)
    }
}
