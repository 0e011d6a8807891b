use thiserror::Error;

use crate::exception::{Exception, ExceptionKind};
use crate::opcodes::Opcode;
use crate::value::{Symbol, Value};

/// Failure raised while executing an instruction.
///
/// The three variants are the failure categories the execution boundary
/// tells apart. Anything else (a panic) is the fourth, "unknown" category.
#[derive(Debug, Clone, Error)]
pub enum VMError {
    /// An operand had the wrong type.
    #[error(transparent)]
    Type(#[from] TypeError),
    /// A language-level exception is propagating.
    #[error("{0}")]
    Raise(Box<Exception>),
    /// The interpreter itself failed.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl VMError {
    pub fn raise(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self::Raise(Box::new(Exception::new(kind, message)))
    }
}

impl From<Exception> for VMError {
    fn from(exception: Exception) -> Self {
        Self::Raise(Box::new(exception))
    }
}

impl From<LinkError> for VMError {
    fn from(err: LinkError) -> Self {
        Self::Internal(InternalError::Link(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation}: expected {expected}, got {found}")]
pub struct TypeError {
    pub operation: &'static str,
    pub expected: &'static str,
    pub found: &'static str,
}

impl TypeError {
    pub fn new(operation: &'static str, expected: &'static str, found: &Value) -> Self {
        Self {
            operation,
            expected,
            found: found.type_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("working stack of {0} slots overflowed")]
    StackOverflow(usize),
    #[error("working stack underflow")]
    StackUnderflow,
    #[error("register {0} is out of range")]
    RegisterOutOfRange(usize),
    #[error("local {index} is out of range at depth {depth}")]
    LocalOutOfRange { index: usize, depth: usize },
    #[error("malformed operand at ip {ip}: expected {expected}")]
    MalformedOperand { ip: usize, expected: &'static str },
    #[error("instruction pointer {0} is out of bounds")]
    IpOutOfBounds(usize),
    #[error("no opcode at ip {0}")]
    InvalidOpcode(usize),
    #[error("no call site installed at ip {0}")]
    MissingCallSite(usize),
    #[error("no constant cache installed at ip {0}")]
    MissingConstantCache(usize),
    #[error("no unwind site installed at ip {0}")]
    MissingUnwindSite(usize),
    #[error("no measurement counter installed at ip {0}")]
    MissingMeasurement(usize),
    #[error("method {0} has not been linked")]
    NotLinked(Symbol),
    #[error("link failed: {0}")]
    Link(#[from] LinkError),
    #[error("call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("execution produced neither a value nor an exception")]
    NoValue,
}

/// Failure while linking raw bytecode into a runnable program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("invalid opcode {word} at ip {ip}")]
    InvalidOpcode { ip: usize, word: i64 },
    #[error("{opcode} at ip {ip} needs {width} words but the stream has {len}")]
    Truncated {
        ip: usize,
        opcode: Opcode,
        width: usize,
        len: usize,
    },
    #[error("literal index {index} at ip {ip} is outside a pool of {len}")]
    LiteralOutOfRange { ip: usize, index: i64, len: usize },
    #[error("literal referenced at ip {ip} must be {expected}")]
    LiteralKind { ip: usize, expected: &'static str },
    #[error("operand {value} at ip {ip} is invalid")]
    InvalidOperand { ip: usize, value: i64 },
    #[error("method {0} is already linked")]
    AlreadyLinked(Symbol),
    #[error("reference table has {filled} of {counted} slots filled")]
    ReferenceCountMismatch { counted: usize, filled: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpcodeResult {
    Continue,
    Return(Value),
}
