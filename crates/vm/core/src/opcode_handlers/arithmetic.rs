use crate::{
    errors::{InternalError, OpcodeResult, TypeError, VMError},
    exception::ExceptionKind,
    frame::CallFrame,
    interpreter::Interpreter,
    state::State,
    value::Value,
};

// Arithmetic Operations (17)
// Stack opcodes: ADD, SUB, MUL
// Register opcodes: N_INEG, N_IINC, N_IDEC, N_INOT, N_IADD, N_ISUB, N_IMUL, N_IDIV, N_IMOD,
// N_DADD, N_DSUB, N_DMUL, N_DDIV, N_DNEG

impl Interpreter {
    // ADD operation
    #[inline]
    pub fn op_add(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let [augend, addend] = frame.pop_pair()?;
        let sum = numeric("add", &augend, &addend, i64::checked_add, |a, b| a + b)?;
        frame.push(sum)?;
        Ok(OpcodeResult::Continue)
    }

    // SUB operation
    #[inline]
    pub fn op_sub(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let [minuend, subtrahend] = frame.pop_pair()?;
        let difference = numeric("sub", &minuend, &subtrahend, i64::checked_sub, |a, b| a - b)?;
        frame.push(difference)?;
        Ok(OpcodeResult::Continue)
    }

    // MUL operation
    #[inline]
    pub fn op_mul(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let [multiplicand, multiplier] = frame.pop_pair()?;
        let product = numeric("mul", &multiplicand, &multiplier, i64::checked_mul, |a, b| {
            a * b
        })?;
        frame.push(product)?;
        Ok(OpcodeResult::Continue)
    }

    // N_INEG dst, src
    pub fn op_n_ineg(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        unary_int(frame, "n_ineg", i64::checked_neg)
    }

    // N_IINC dst, src
    pub fn op_n_iinc(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        unary_int(frame, "n_iinc", |a| a.checked_add(1))
    }

    // N_IDEC dst, src
    pub fn op_n_idec(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        unary_int(frame, "n_idec", |a| a.checked_sub(1))
    }

    // N_INOT dst, src (bitwise complement)
    pub fn op_n_inot(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        unary_int(frame, "n_inot", |a| Some(!a))
    }

    // N_IADD dst, a, b
    pub fn op_n_iadd(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        binary_int(frame, "n_iadd", i64::checked_add)
    }

    // N_ISUB dst, a, b
    pub fn op_n_isub(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        binary_int(frame, "n_isub", i64::checked_sub)
    }

    // N_IMUL dst, a, b
    pub fn op_n_imul(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        binary_int(frame, "n_imul", i64::checked_mul)
    }

    // N_IDIV dst, a, b (rounds toward negative infinity)
    pub fn op_n_idiv(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        check_divisor(frame, "n_idiv")?;
        binary_int(frame, "n_idiv", floor_div)
    }

    // N_IMOD dst, a, b (result takes the sign of the divisor)
    pub fn op_n_imod(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        check_divisor(frame, "n_imod")?;
        binary_int(frame, "n_imod", floor_mod)
    }

    // N_DADD dst, a, b
    pub fn op_n_dadd(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let (dst, a, b) = float_operands(frame, "n_dadd")?;
        frame.set_register(dst, Value::Float(a + b))?;
        Ok(OpcodeResult::Continue)
    }

    // N_DSUB dst, a, b
    pub fn op_n_dsub(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let (dst, a, b) = float_operands(frame, "n_dsub")?;
        frame.set_register(dst, Value::Float(a - b))?;
        Ok(OpcodeResult::Continue)
    }

    // N_DMUL dst, a, b
    pub fn op_n_dmul(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let (dst, a, b) = float_operands(frame, "n_dmul")?;
        frame.set_register(dst, Value::Float(a * b))?;
        Ok(OpcodeResult::Continue)
    }

    // N_DDIV dst, a, b (IEEE semantics, dividing by zero is not an error)
    pub fn op_n_ddiv(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let (dst, a, b) = float_operands(frame, "n_ddiv")?;
        frame.set_register(dst, Value::Float(a / b))?;
        Ok(OpcodeResult::Continue)
    }

    // N_DNEG dst, src
    pub fn op_n_dneg(_state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        let dst = frame.index(1)?;
        let value = float_register(frame, 2, "n_dneg")?;
        frame.set_register(dst, Value::Float(-value))?;
        Ok(OpcodeResult::Continue)
    }
}

/// Apply a stack arithmetic operation. Two integers stay integral; any
/// float operand promotes the other one.
pub(crate) fn numeric(
    operation: &'static str,
    left: &Value,
    right: &Value,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Result<Value, VMError> {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        return int(*a, *b)
            .map(Value::Integer)
            .ok_or_else(|| InternalError::IntegerOverflow.into());
    }
    match (as_f64(left), as_f64(right)) {
        (Some(a), Some(b)) => Ok(Value::Float(float(a, b))),
        (None, _) => Err(TypeError::new(operation, "Integer or Float", left).into()),
        (_, None) => Err(TypeError::new(operation, "Integer or Float", right).into()),
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(int_to_f64(*i)),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

#[expect(clippy::as_conversions, reason = "Integer operands are promoted to Float")]
fn int_to_f64(value: i64) -> f64 {
    value as f64
}

/// Integer held by the register named at operand `offset`.
pub(crate) fn int_register(
    frame: &CallFrame,
    offset: usize,
    operation: &'static str,
) -> Result<i64, VMError> {
    let value = frame.register(frame.index(offset)?)?;
    value
        .as_integer()
        .ok_or_else(|| TypeError::new(operation, "Integer", value).into())
}

/// Float held by the register named at operand `offset`.
pub(crate) fn float_register(
    frame: &CallFrame,
    offset: usize,
    operation: &'static str,
) -> Result<f64, VMError> {
    let value = frame.register(frame.index(offset)?)?;
    value
        .as_float()
        .ok_or_else(|| TypeError::new(operation, "Float", value).into())
}

fn float_operands(
    frame: &CallFrame,
    operation: &'static str,
) -> Result<(usize, f64, f64), VMError> {
    let dst = frame.index(1)?;
    let a = float_register(frame, 2, operation)?;
    let b = float_register(frame, 3, operation)?;
    Ok((dst, a, b))
}

fn unary_int(
    frame: &mut CallFrame,
    operation: &'static str,
    op: impl Fn(i64) -> Option<i64>,
) -> Result<OpcodeResult, VMError> {
    let dst = frame.index(1)?;
    let value = int_register(frame, 2, operation)?;
    let result = op(value).ok_or(InternalError::IntegerOverflow)?;
    frame.set_register(dst, Value::Integer(result))?;
    Ok(OpcodeResult::Continue)
}

fn binary_int(
    frame: &mut CallFrame,
    operation: &'static str,
    op: fn(i64, i64) -> Option<i64>,
) -> Result<OpcodeResult, VMError> {
    let dst = frame.index(1)?;
    let a = int_register(frame, 2, operation)?;
    let b = int_register(frame, 3, operation)?;
    let result = op(a, b).ok_or(InternalError::IntegerOverflow)?;
    frame.set_register(dst, Value::Integer(result))?;
    Ok(OpcodeResult::Continue)
}

fn check_divisor(frame: &CallFrame, operation: &'static str) -> Result<(), VMError> {
    if int_register(frame, 3, operation)? == 0 {
        return Err(VMError::raise(ExceptionKind::ZeroDivisionError, "divided by 0"));
    }
    Ok(())
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    let remainder = a.checked_rem(b)?;
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let remainder = a.checked_rem(b)?;
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        remainder.checked_add(b)
    } else {
        Some(remainder)
    }
}
