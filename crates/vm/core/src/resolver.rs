//! Seams to the object model.
//!
//! The execution core never walks method tables or constant tables
//! itself. It asks a [`MethodResolver`] for methods and a
//! [`ConstantResolver`] for constants, and caches the answers.

use std::fmt;
use std::sync::Arc;

use crate::errors::VMError;
use crate::machine_code::CompiledCode;
use crate::state::State;
use crate::value::{ClassId, ModuleId, Symbol, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

/// Arguments handed to a native method.
#[derive(Debug, Clone, Copy)]
pub struct NativeArgs<'a> {
    pub receiver: &'a Value,
    pub args: &'a [Value],
    pub block: Option<&'a Value>,
}

/// Body of a method implemented in Rust, either a primitive of the object
/// model or code installed by a compiler backend.
pub type NativeFn =
    Arc<dyn Fn(&mut State, NativeArgs<'_>) -> Result<Value, VMError> + Send + Sync>;

#[derive(Clone)]
pub enum Executable {
    Compiled(Arc<CompiledCode>),
    Native(NativeFn),
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compiled(code) => f.debug_tuple("Compiled").field(code.name()).finish(),
            Self::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// A method as stored in a method table.
///
/// `serial` identifies the definition. Redefining a method yields a new
/// `Method` with a different serial; `check_serial` compares against it.
#[derive(Debug)]
pub struct Method {
    pub name: Symbol,
    pub visibility: Visibility,
    pub serial: u64,
    pub executable: Executable,
}

impl Method {
    pub fn new(name: Symbol, visibility: Visibility, serial: u64, executable: Executable) -> Self {
        Self {
            name,
            visibility,
            serial,
            executable,
        }
    }
}

/// A successful method lookup: the method and the module that defines it.
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub module: ModuleId,
    pub method: Arc<Method>,
}

/// Lookup flags carried by a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LookupFlags {
    pub allow_private: bool,
    /// Start the lookup above `owner` instead of at the receiver's class.
    pub is_super: bool,
    /// Module defining the calling method, when known.
    pub owner: Option<ModuleId>,
}

/// Resolves a name against a receiver type.
///
/// Visibility is reported, not enforced: the resolver returns private and
/// protected methods and the call site decides whether the call is legal.
pub trait MethodResolver: Send + Sync {
    fn resolve(
        &self,
        receiver: ClassId,
        name: &Symbol,
        flags: LookupFlags,
    ) -> Option<ResolvedMethod>;
}

/// Resolves and defines constants.
pub trait ConstantResolver: Send + Sync {
    /// Global constant serial. Every definition bumps it.
    fn serial(&self) -> u64;

    /// Lexical lookup starting at `lexical`. Returns the value and the
    /// module it was found in.
    fn lookup(&self, lexical: ModuleId, name: &Symbol) -> Option<(Value, ModuleId)>;

    /// Scoped lookup (`Parent::Name`).
    fn lookup_under(&self, module: ModuleId, name: &Symbol) -> Option<Value>;

    fn define(&self, module: ModuleId, name: Symbol, value: Value);
}
