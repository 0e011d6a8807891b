use crate::{
    errors::{OpcodeResult, TypeError, VMError},
    exception::ExceptionKind,
    frame::CallFrame,
    interpreter::Interpreter,
    state::State,
    value::{Symbol, Value},
};

// Constant Operations (4)
// Opcodes: PUSH_CONST, FIND_CONST, SET_CONST, SET_CONST_AT

impl Interpreter {
    // PUSH_CONST name: lexical lookup through the instruction's cache
    pub fn op_push_const(state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let cache = frame.constant_cache()?;
        let constants = state.runtime().constants();
        // Read the serial before looking up so a concurrent definition
        // leaves a stale entry rather than a wrong one.
        let serial = constants.serial();
        if let Some(value) = cache.retrieve(serial, None) {
            frame.push(value)?;
            return Ok(OpcodeResult::Continue);
        }

        let name = frame.symbol(1)?;
        let Some((value, module)) = constants.lookup(frame.lexical_module, &name) else {
            return Err(uninitialized(&name));
        };
        cache.update(value.clone(), module, None, serial);
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    // FIND_CONST name: scoped lookup under the module popped from the stack
    pub fn op_find_const(state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let cache = frame.constant_cache()?;
        let under = match frame.pop()? {
            Value::Module(module) => module,
            other => return Err(TypeError::new("find_const", "a module", &other).into()),
        };
        let constants = state.runtime().constants();
        let serial = constants.serial();
        if let Some(value) = cache.retrieve(serial, Some(under)) {
            frame.push(value)?;
            return Ok(OpcodeResult::Continue);
        }

        let name = frame.symbol(1)?;
        let Some(value) = constants.lookup_under(under, &name) else {
            return Err(uninitialized(&name));
        };
        cache.update(value.clone(), under, Some(under), serial);
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    // SET_CONST name: defines the top of the stack in the lexical module
    pub fn op_set_const(state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let name = frame.symbol(1)?;
        let value = frame.top()?.clone();
        tracing::debug!(%name, module = frame.lexical_module.0, "defining constant");
        state
            .runtime()
            .constants()
            .define(frame.lexical_module, name, value);
        Ok(OpcodeResult::Continue)
    }

    // SET_CONST_AT name: pops value and module, pushes the value back
    pub fn op_set_const_at(
        state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let name = frame.symbol(1)?;
        let [under, value] = frame.pop_pair()?;
        let Value::Module(module) = under else {
            return Err(TypeError::new("set_const_at", "a module", &under).into());
        };
        tracing::debug!(%name, module = module.0, "defining constant");
        state.runtime().constants().define(module, name, value.clone());
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }
}

fn uninitialized(name: &Symbol) -> VMError {
    VMError::raise(
        ExceptionKind::NameError,
        format!("uninitialized constant {name}"),
    )
}
