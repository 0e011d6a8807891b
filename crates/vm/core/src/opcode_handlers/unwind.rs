use crate::{
    errors::{OpcodeResult, TypeError, VMError},
    exception::{Exception, ExceptionKind},
    frame::CallFrame,
    interpreter::Interpreter,
    state::State,
    value::Value,
};

// Unwinding Operations (6)
// Opcodes: SETUP_UNWIND, UNWIND, RAISE_EXC, RERAISE, PUSH_CURRENT_EXCEPTION, CLEAR_EXCEPTION

impl Interpreter {
    // SETUP_UNWIND handler, kind
    pub fn op_setup_unwind(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let site = frame.unwind_site()?;
        frame.push_unwind(site);
        Ok(OpcodeResult::Continue)
    }

    // UNWIND count
    pub fn op_unwind(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let count = frame.index(1)?;
        frame.pop_unwind(count);
        Ok(OpcodeResult::Continue)
    }

    // RAISE_EXC: raises the popped exception. A string raises a RuntimeError.
    pub fn op_raise_exc(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let exception = match frame.pop()? {
            Value::Exception(exception) => Exception::clone(&exception),
            Value::String(message) => Exception::new(ExceptionKind::RuntimeError, &*message),
            other => {
                return Err(TypeError::new("raise_exc", "an exception or a string", &other).into());
            }
        };
        Err(exception.into())
    }

    // RERAISE: raises the exception being handled, if any
    pub fn op_reraise(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        match &frame.current_exception {
            Some(exception) => Err(Exception::clone(exception).into()),
            None => Ok(OpcodeResult::Continue),
        }
    }

    pub fn op_push_current_exception(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let value = frame
            .current_exception
            .clone()
            .map_or(Value::Nil, Value::Exception);
        frame.push(value)?;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_clear_exception(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        frame.current_exception = None;
        Ok(OpcodeResult::Continue)
    }
}
