//! Runtime values and the identities the execution core compares.
//!
//! The object model proper lives outside this crate. The core only needs a
//! receiver-type identity ([`ClassId`]) for every value, a method identity
//! ([`MethodId`]) for tagging and cache keys, and module identities
//! ([`ModuleId`]) for constant scopes and method owners.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::exception::Exception;
use crate::machine_code::CompiledCode;
use crate::scope::BlockEnvironment;

static NEXT_METHOD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a method body.
///
/// Doubles as the "nil id" carried by tagged nils and as the serial of the
/// call sites and constant caches created for the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u64);

impl MethodId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        Self(NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Receiver-type identity. Cache checks compare these as plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u64);

impl ClassId {
    pub const NIL: ClassId = ClassId(1);
    pub const TRUE: ClassId = ClassId(2);
    pub const FALSE: ClassId = ClassId(3);
    pub const INTEGER: ClassId = ClassId(4);
    pub const FLOAT: ClassId = ClassId(5);
    pub const SYMBOL: ClassId = ClassId(6);
    pub const STRING: ClassId = ClassId(7);
    pub const ARRAY: ClassId = ClassId(8);
    pub const MODULE: ClassId = ClassId(9);
    pub const PROC: ClassId = ClassId(10);
    pub const COMPILED_CODE: ClassId = ClassId(11);
    pub const EXCEPTION: ClassId = ClassId(12);
    pub const OBJECT: ClassId = ClassId(13);

    /// First identity available to classes created by the object model.
    pub const FIRST_USER: u64 = 64;

    /// Name of a builtin class, `None` for classes of the object model.
    pub fn builtin_name(self) -> Option<&'static str> {
        let name = match self {
            Self::NIL => "NilClass",
            Self::TRUE => "TrueClass",
            Self::FALSE => "FalseClass",
            Self::INTEGER => "Integer",
            Self::FLOAT => "Float",
            Self::SYMBOL => "Symbol",
            Self::STRING => "String",
            Self::ARRAY => "Array",
            Self::MODULE => "Module",
            Self::PROC => "Proc",
            Self::COMPILED_CODE => "CompiledCode",
            Self::EXCEPTION => "Exception",
            Self::OBJECT => "Object",
            _ => return None,
        };
        Some(name)
    }
}

/// Identity of a module: a constant scope or a method owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u64);

impl ModuleId {
    /// The top-level scope.
    pub const ROOT: ModuleId = ModuleId(ClassId::OBJECT.0);
}

impl From<ClassId> for ModuleId {
    fn from(class: ClassId) -> Self {
        Self(class.0)
    }
}

/// A shared, immutable name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a tagged nil was produced: the method and the instruction offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NilOrigin {
    pub method: MethodId,
    pub ip: usize,
}

/// Heap object owned by the object model. The core reads its class and
/// its instance variables.
#[derive(Debug)]
pub struct Object {
    class: ClassId,
    ivars: Mutex<FxHashMap<Symbol, Value>>,
}

/// Shared handle to an [`Object`]. Equality is identity.
#[derive(Debug, Clone)]
pub struct ObjectRef(Arc<Object>);

impl ObjectRef {
    pub fn new(class: ClassId) -> Self {
        Self(Arc::new(Object {
            class,
            ivars: Mutex::new(FxHashMap::default()),
        }))
    }

    pub fn class(&self) -> ClassId {
        self.0.class
    }

    /// Read an instance variable; unset variables read as nil.
    pub fn ivar(&self, name: &Symbol) -> Value {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let ivars = self.0.ivars.lock().unwrap();
        ivars.get(name).cloned().unwrap_or(Value::Nil)
    }

    pub fn set_ivar(&self, name: Symbol, value: Value) {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut ivars = self.0.ivars.lock().unwrap();
        ivars.insert(name, value);
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A runtime value.
///
/// Immediates are stored inline; everything else is a shared handle.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    /// Nil produced by a specific instruction, used to trace uninitialized
    /// values back to their origin.
    TaggedNil(NilOrigin),
    True,
    False,
    Integer(i64),
    Float(f64),
    Symbol(Symbol),
    String(Arc<str>),
    Array(Arc<[Value]>),
    Module(ModuleId),
    Object(ObjectRef),
    Block(Arc<BlockEnvironment>),
    Code(Arc<CompiledCode>),
    Exception(Arc<Exception>),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    pub fn symbol(name: &str) -> Self {
        Value::Symbol(Symbol::new(name))
    }

    pub fn from_bool(b: bool) -> Self {
        if b { Value::True } else { Value::False }
    }

    /// Receiver-type identity used by the call-site caches.
    pub fn class_id(&self) -> ClassId {
        match self {
            Value::Nil | Value::TaggedNil(_) => ClassId::NIL,
            Value::True => ClassId::TRUE,
            Value::False => ClassId::FALSE,
            Value::Integer(_) => ClassId::INTEGER,
            Value::Float(_) => ClassId::FLOAT,
            Value::Symbol(_) => ClassId::SYMBOL,
            Value::String(_) => ClassId::STRING,
            Value::Array(_) => ClassId::ARRAY,
            Value::Module(_) => ClassId::MODULE,
            Value::Object(object) => object.class(),
            Value::Block(_) => ClassId::PROC,
            Value::Code(_) => ClassId::COMPILED_CODE,
            Value::Exception(_) => ClassId::EXCEPTION,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil | Value::TaggedNil(_))
    }

    /// Only nil and false are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::TaggedNil(_) | Value::False)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Origin of a tagged nil.
    pub fn nil_origin(&self) -> Option<NilOrigin> {
        match self {
            Value::TaggedNil(origin) => Some(*origin),
            _ => None,
        }
    }

    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.class_id().builtin_name().unwrap_or("Object")
    }

    /// Language-level equality: every nil equals every other nil,
    /// heap values compare by identity.
    pub fn eql(&self, other: &Value) -> bool {
        if self.is_nil() && other.is_nil() {
            return true;
        }
        self == other
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::True, Value::True) | (Value::False, Value::False) => {
                true
            }
            (Value::TaggedNil(a), Value::TaggedNil(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Block(a), Value::Block(b)) => Arc::ptr_eq(a, b),
            (Value::Code(a), Value::Code(b)) => Arc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::TaggedNil(origin) => write!(f, "nil<{}@{}>", origin.method, origin.ip),
            Value::True => f.write_str("true"),
            Value::False => f.write_str("false"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Symbol(s) => write!(f, ":{s}"),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Module(id) => write!(f, "#<Module {}>", id.0),
            Value::Object(object) => write!(f, "#<Object class={}>", object.class().0),
            Value::Block(env) => write!(f, "#<Proc {}>", env.code.name()),
            Value::Code(code) => write!(f, "#<CompiledCode {}>", code.name()),
            Value::Exception(exc) => write!(f, "{exc}"),
        }
    }
}
