use std::sync::Arc;

use crate::{
    errors::{InternalError, OpcodeResult, TypeError, VMError},
    frame::CallFrame,
    interpreter::Interpreter,
    scope::BlockEnvironment,
    state::State,
    value::Value,
};

// Stack Operations (16)
// Opcodes: NOOP, PUSH_NIL, PUSH_TRUE, PUSH_FALSE, PUSH_SELF, PUSH_INT, PUSH_TAGGED_NIL,
// PUSH_LITERAL, PUSH_MEMO, POP, DUP_TOP, SWAP, MAKE_ARRAY, CREATE_BLOCK, PUSH_IVAR, SET_IVAR

impl Interpreter {
    // NOOP operation, also used for ALLOW_PRIVATE which only matters at link time
    #[inline]
    pub fn op_noop(_state: &mut State, _frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_push_nil(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        frame.push(Value::Nil)?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_push_true(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        frame.push(Value::True)?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_push_false(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        frame.push(Value::False)?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_push_self(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let receiver = frame.self_value.clone();
        frame.push(receiver)?;
        Ok(OpcodeResult::Continue)
    }

    // PUSH_INT, PUSH_TAGGED_NIL, PUSH_LITERAL and PUSH_MEMO all push an
    // operand the linker already resolved to a value.
    #[inline]
    pub fn op_push_int(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let value = frame.reference(1)?;
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_push_tagged_nil(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let value = frame.reference(1)?;
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_push_literal(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let value = frame.reference(1)?;
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_push_memo(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let value = frame.reference(1)?;
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_pop(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        frame.pop()?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_dup_top(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let top = frame.top()?.clone();
        frame.push(top)?;
        Ok(OpcodeResult::Continue)
    }

    #[inline]
    pub fn op_swap(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let [below, top] = frame.pop_pair()?;
        frame.push(top)?;
        frame.push(below)?;
        Ok(OpcodeResult::Continue)
    }

    // MAKE_ARRAY count
    pub fn op_make_array(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let count = frame.index(1)?;
        let items = frame.pop_many(count)?;
        frame.push(Value::Array(items.into()))?;
        Ok(OpcodeResult::Continue)
    }

    // CREATE_BLOCK code
    pub fn op_create_block(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let Value::Code(code) = frame.reference(1)? else {
            return Err(InternalError::MalformedOperand {
                ip: frame.op_ip,
                expected: "compiled code",
            }
            .into());
        };
        // The block may outlive this frame.
        frame.scope.flush_to_heap();
        let env = BlockEnvironment {
            code,
            scope: Arc::clone(&frame.scope),
            self_value: frame.self_value.clone(),
            module: frame.module,
        };
        frame.push(Value::Block(Arc::new(env)))?;
        Ok(OpcodeResult::Continue)
    }

    // PUSH_IVAR name
    pub fn op_push_ivar(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let name = frame.symbol(1)?;
        let value = match &frame.self_value {
            Value::Object(object) => object.ivar(&name),
            _ => Value::Nil,
        };
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    // SET_IVAR name, leaves the value on the stack
    pub fn op_set_ivar(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let name = frame.symbol(1)?;
        let value = frame.top()?.clone();
        match &frame.self_value {
            Value::Object(object) => object.set_ivar(name, value),
            other => return Err(TypeError::new("set_ivar", "an object", other).into()),
        }
        Ok(OpcodeResult::Continue)
    }
}
