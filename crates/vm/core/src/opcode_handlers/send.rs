use crate::{
    errors::{OpcodeResult, VMError},
    exception::ExceptionKind,
    frame::CallFrame,
    interpreter::Interpreter,
    state::State,
    value::Value,
};

// Dispatch Operations (12)
// Opcodes: SEND_METHOD, SEND_STACK, SEND_STACK_WITH_BLOCK, SEND_STACK_WITH_SPLAT, SEND_VCALL,
// SEND_SUPER_STACK_WITH_BLOCK, SEND_SUPER_STACK_WITH_SPLAT, ZSUPER, OBJECT_TO_S,
// CHECK_SERIAL, CHECK_SERIAL_PRIVATE, B_IF_SERIAL, YIELD_STACK
//
// Every dispatch instruction carries its message name as the first operand
// and owns the call site the linker installed at its ip.

impl Interpreter {
    // SEND_METHOD name: receiver on the stack, no arguments
    pub fn op_send_method(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let receiver = frame.pop()?;
        let result = Self::send(state, frame, &site, receiver, Vec::new(), None)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // SEND_STACK name, argc: receiver, args...
    pub fn op_send_stack(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let args = frame.pop_many(frame.index(2)?)?;
        let receiver = frame.pop()?;
        let result = Self::send(state, frame, &site, receiver, args, None)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // SEND_STACK_WITH_BLOCK name, argc: receiver, args..., block
    pub fn op_send_stack_with_block(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let block = block_argument(frame.pop()?);
        let args = frame.pop_many(frame.index(2)?)?;
        let receiver = frame.pop()?;
        let result = Self::send(state, frame, &site, receiver, args, block)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // SEND_STACK_WITH_SPLAT name, argc: receiver, args..., splat, block
    pub fn op_send_stack_with_splat(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let block = block_argument(frame.pop()?);
        let splat = frame.pop()?;
        let mut args = frame.pop_many(frame.index(2)?)?;
        splat_into(&mut args, splat);
        let receiver = frame.pop()?;
        let result = Self::send(state, frame, &site, receiver, args, block)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // SEND_VCALL name: implicit self, no arguments
    pub fn op_send_vcall(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let receiver = frame.self_value.clone();
        let result = Self::send(state, frame, &site, receiver, Vec::new(), None)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // SEND_SUPER_STACK_WITH_BLOCK name, argc: args..., block
    pub fn op_send_super_stack_with_block(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let block = block_argument(frame.pop()?);
        let args = frame.pop_many(frame.index(2)?)?;
        let receiver = frame.self_value.clone();
        let result = Self::send(state, frame, &site, receiver, args, block)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // SEND_SUPER_STACK_WITH_SPLAT name, argc: args..., splat, block
    pub fn op_send_super_stack_with_splat(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let block = block_argument(frame.pop()?);
        let splat = frame.pop()?;
        let mut args = frame.pop_many(frame.index(2)?)?;
        splat_into(&mut args, splat);
        let receiver = frame.self_value.clone();
        let result = Self::send(state, frame, &site, receiver, args, block)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // ZSUPER name: block on the stack, the current method's own arguments.
    // A nil block passes on the block the current method received.
    pub fn op_zsuper(state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let block = block_argument(frame.pop()?).or_else(|| frame.block.clone());
        let args = frame.args.clone();
        let receiver = frame.self_value.clone();
        let result = Self::send(state, frame, &site, receiver, args, block)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // OBJECT_TO_S name: strings pass through, anything else is sent the
    // message; a receiver without it is rendered directly.
    pub fn op_object_to_s(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let value = frame.pop()?;
        if matches!(value, Value::String(_)) {
            frame.push(value)?;
            return Ok(OpcodeResult::Continue);
        }

        let cache = site.lookup(value.class_id(), state.runtime().methods(), frame.module);
        let result = match cache.callable() {
            Some(method) => Self::call_method(
                state,
                frame,
                method,
                cache.stored_module(),
                value,
                Vec::new(),
                None,
            )?,
            None => Value::string(&value.to_string()),
        };
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }

    // CHECK_SERIAL name, serial and CHECK_SERIAL_PRIVATE name, serial:
    // pops the receiver, pushes whether its method is still that definition.
    pub fn op_check_serial(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let serial = u64::try_from(frame.imm(2)?).ok();
        let receiver = frame.pop()?;
        let cache = site.lookup(receiver.class_id(), state.runtime().methods(), frame.module);
        let matches = cache
            .callable()
            .is_some_and(|method| Some(method.serial) == serial);
        frame.push(Value::from_bool(matches))?;
        Ok(OpcodeResult::Continue)
    }

    // B_IF_SERIAL name, reg, target: branches when the receiver in reg still
    // resolves to the original definition (serial 0).
    pub fn op_b_if_serial(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.call_site()?;
        let receiver_class = frame.register(frame.index(2)?)?.class_id();
        let target = frame.index(3)?;
        let cache = site.lookup(receiver_class, state.runtime().methods(), frame.module);
        if cache.callable().is_some_and(|method| method.serial == 0) {
            frame.jump(target);
        }
        Ok(OpcodeResult::Continue)
    }

    // YIELD_STACK argc: runs the block the current method received
    pub fn op_yield_stack(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let args = frame.pop_many(frame.index(1)?)?;
        let Some(Value::Block(env)) = frame.block.clone() else {
            return Err(VMError::raise(
                ExceptionKind::LocalJumpError,
                "no block given (yield)",
            ));
        };
        let result = Self::yield_to(state, frame, &env, args)?;
        frame.push(result)?;
        Ok(OpcodeResult::Continue)
    }
}

fn block_argument(value: Value) -> Option<Value> {
    if value.is_nil() { None } else { Some(value) }
}

/// Append a splatted value: arrays contribute their elements, nil nothing,
/// anything else itself.
fn splat_into(args: &mut Vec<Value>, splat: Value) {
    match splat {
        Value::Array(items) => args.extend(items.iter().cloned()),
        value if value.is_nil() => {}
        value => args.push(value),
    }
}
