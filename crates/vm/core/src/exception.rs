//! Language-level exceptions and the locations attached to them.

use std::fmt;

use crate::errors::TypeError;
use crate::frame::CallFrame;
use crate::state::State;
use crate::value::Symbol;

/// Class of a language-level exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionKind {
    TypeError,
    /// A failure of the interpreter itself, surfaced to the program.
    InterpreterError,
    NoMethodError,
    NameError,
    ArgumentError,
    ZeroDivisionError,
    LocalJumpError,
    RuntimeError,
    Custom(Symbol),
}

impl ExceptionKind {
    pub fn name(&self) -> &str {
        match self {
            Self::TypeError => "TypeError",
            Self::InterpreterError => "InterpreterError",
            Self::NoMethodError => "NoMethodError",
            Self::NameError => "NameError",
            Self::ArgumentError => "ArgumentError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::LocalJumpError => "LocalJumpError",
            Self::RuntimeError => "RuntimeError",
            Self::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of an exception backtrace: a method and the instruction
/// offset that was executing in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub method: Symbol,
    pub ip: usize,
}

impl Location {
    /// Backtrace for `frame`, innermost first, followed by every caller
    /// still recorded on the state's call stack.
    pub fn from_call_stack(state: &State, frame: &CallFrame) -> Vec<Location> {
        let mut locations = Vec::with_capacity(state.call_stack().len().saturating_add(1));
        locations.push(frame.location());
        locations.extend(state.call_stack().iter().rev().cloned());
        locations
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.method, self.ip)
    }
}

/// A language-level exception.
///
/// `locations` stays `None` until the exception first crosses an
/// execution boundary; boundaries never overwrite existing locations.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    kind: ExceptionKind,
    message: String,
    locations: Option<Vec<Location>>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            locations: None,
        }
    }

    pub fn make_type_error(err: &TypeError) -> Self {
        Self::new(ExceptionKind::TypeError, err.to_string())
    }

    pub fn make_interpreter_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InterpreterError, message)
    }

    pub fn kind(&self) -> &ExceptionKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn locations(&self) -> Option<&[Location]> {
        self.locations.as_deref()
    }

    pub fn has_locations(&self) -> bool {
        self.locations.is_some()
    }

    pub fn set_locations(&mut self, locations: Vec<Location>) {
        self.locations = Some(locations);
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Exception {}
