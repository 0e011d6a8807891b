use crate::{
    errors::{OpcodeResult, TypeError, VMError},
    frame::CallFrame,
    interpreter::Interpreter,
    opcode_handlers::arithmetic::{as_f64, float_register, int_register},
    state::State,
    value::Value,
};

// Comparison Operations (9)
// Stack opcodes: LESS_THAN, EQUAL
// Register opcodes: N_IEQ, N_INE, N_ILT, N_ILE, N_IGT, N_IGE, N_DLT

impl Interpreter {
    // LESS_THAN operation
    #[inline]
    pub fn op_less_than(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        let [left, right] = frame.pop_pair()?;
        let less = match (&left, &right) {
            (Value::Integer(a), Value::Integer(b)) => a < b,
            _ => match (as_f64(&left), as_f64(&right)) {
                (Some(a), Some(b)) => a < b,
                (None, _) => {
                    return Err(TypeError::new("less_than", "Integer or Float", &left).into());
                }
                (_, None) => {
                    return Err(TypeError::new("less_than", "Integer or Float", &right).into());
                }
            },
        };
        frame.push(Value::from_bool(less))?;
        Ok(OpcodeResult::Continue)
    }

    // EQUAL operation: numbers compare by value across Integer and Float,
    // everything else by language-level equality.
    #[inline]
    pub fn op_equal(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let [left, right] = frame.pop_pair()?;
        let equal = match (&left, &right) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                as_f64(&left) == as_f64(&right)
            }
            _ => left.eql(&right),
        };
        frame.push(Value::from_bool(equal))?;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_n_ieq(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        compare_int(frame, "n_ieq", |a, b| a == b)
    }

    pub fn op_n_ine(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        compare_int(frame, "n_ine", |a, b| a != b)
    }

    pub fn op_n_ilt(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        compare_int(frame, "n_ilt", |a, b| a < b)
    }

    pub fn op_n_ile(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        compare_int(frame, "n_ile", |a, b| a <= b)
    }

    pub fn op_n_igt(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        compare_int(frame, "n_igt", |a, b| a > b)
    }

    pub fn op_n_ige(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        compare_int(frame, "n_ige", |a, b| a >= b)
    }

    // N_DLT dst, a, b
    pub fn op_n_dlt(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let dst = frame.index(1)?;
        let a = float_register(frame, 2, "n_dlt")?;
        let b = float_register(frame, 3, "n_dlt")?;
        frame.set_register(dst, Value::from_bool(a < b))?;
        Ok(OpcodeResult::Continue)
    }
}

// dst, a, b
fn compare_int(
    frame: &mut CallFrame,
    operation: &'static str,
    cmp: fn(i64, i64) -> bool,
) -> Result<OpcodeResult, VMError> {
    let dst = frame.index(1)?;
    let a = int_register(frame, 2, operation)?;
    let b = int_register(frame, 3, operation)?;
    frame.set_register(dst, Value::from_bool(cmp(a, b)))?;
    Ok(OpcodeResult::Continue)
}
