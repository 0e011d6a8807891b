//! Shared test helpers: a small object model and method builders.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::assembler::assemble;
use crate::config::VmConfig;
use crate::errors::VMError;
use crate::exception::Exception;
use crate::interpreter::Interpreter;
use crate::machine_code::CompiledCode;
use crate::resolver::{
    ConstantResolver, Executable, LookupFlags, Method, MethodResolver, NativeArgs, NativeFn,
    ResolvedMethod, Visibility,
};
use crate::state::{Runtime, State};
use crate::value::{ClassId, ModuleId, ObjectRef, Symbol, Value};

pub const DOG: ClassId = ClassId(ClassId::FIRST_USER);
pub const CAT: ClassId = ClassId(ClassId::FIRST_USER + 1);
pub const PARENT: ClassId = ClassId(ClassId::FIRST_USER + 2);
pub const CHILD: ClassId = ClassId(ClassId::FIRST_USER + 3);

/// Install a test subscriber once. Output goes through the test harness so
/// `RUST_LOG=strand_vm=trace cargo test` shows the interpreter's events.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Method and constant tables for tests.
///
/// Classes form single-inheritance chains through `superclass`. Constants
/// are looked up in the lexical module first and then at the root.
#[derive(Default)]
pub struct TestWorld {
    methods: Mutex<FxHashMap<(ClassId, Symbol), Arc<Method>>>,
    superclass: Mutex<FxHashMap<ClassId, ClassId>>,
    constants: Mutex<FxHashMap<(ModuleId, Symbol), Value>>,
    constant_serial: AtomicU64,
    next_method_serial: AtomicU64,
    pub method_lookups: AtomicU64,
    pub constant_lookups: AtomicU64,
}

impl TestWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            // Serial 0 is reserved for "original definition" checks.
            next_method_serial: AtomicU64::new(1),
            ..Default::default()
        })
    }

    pub fn inherit(&self, child: ClassId, parent: ClassId) {
        self.superclass.lock().unwrap().insert(child, parent);
    }

    /// Define `name` on `class` with an explicit serial.
    pub fn define_with_serial(
        &self,
        class: ClassId,
        name: &str,
        visibility: Visibility,
        serial: u64,
        executable: Executable,
    ) {
        let method = Method::new(Symbol::new(name), visibility, serial, executable);
        self.methods
            .lock()
            .unwrap()
            .insert((class, Symbol::new(name)), Arc::new(method));
    }

    pub fn define_method(&self, class: ClassId, name: &str, code: &Arc<CompiledCode>) {
        let serial = self.next_method_serial.fetch_add(1, Ordering::Relaxed);
        self.define_with_serial(
            class,
            name,
            Visibility::Public,
            serial,
            Executable::Compiled(Arc::clone(code)),
        );
    }

    pub fn define_native(&self, class: ClassId, name: &str, body: NativeFn) {
        let serial = self.next_method_serial.fetch_add(1, Ordering::Relaxed);
        self.define_with_serial(
            class,
            name,
            Visibility::Public,
            serial,
            Executable::Native(body),
        );
    }

    pub fn set_constant(&self, module: ModuleId, name: &str, value: Value) {
        ConstantResolver::define(self, module, Symbol::new(name), value);
    }

    fn parent_of(&self, class: ClassId) -> Option<ClassId> {
        self.superclass.lock().unwrap().get(&class).copied()
    }
}

impl MethodResolver for TestWorld {
    fn resolve(
        &self,
        receiver: ClassId,
        name: &Symbol,
        flags: LookupFlags,
    ) -> Option<ResolvedMethod> {
        self.method_lookups.fetch_add(1, Ordering::Relaxed);
        let mut class = if flags.is_super {
            let owner = flags.owner.map_or(receiver, |module| ClassId(module.0));
            self.parent_of(owner)?
        } else {
            receiver
        };
        loop {
            let found = self
                .methods
                .lock()
                .unwrap()
                .get(&(class, name.clone()))
                .cloned();
            if let Some(method) = found {
                return Some(ResolvedMethod {
                    module: ModuleId::from(class),
                    method,
                });
            }
            class = self.parent_of(class)?;
        }
    }
}

impl ConstantResolver for TestWorld {
    fn serial(&self) -> u64 {
        self.constant_serial.load(Ordering::Acquire)
    }

    fn lookup(&self, lexical: ModuleId, name: &Symbol) -> Option<(Value, ModuleId)> {
        self.constant_lookups.fetch_add(1, Ordering::Relaxed);
        let constants = self.constants.lock().unwrap();
        [lexical, ModuleId::ROOT].into_iter().find_map(|module| {
            constants
                .get(&(module, name.clone()))
                .map(|value| (value.clone(), module))
        })
    }

    fn lookup_under(&self, module: ModuleId, name: &Symbol) -> Option<Value> {
        self.constant_lookups.fetch_add(1, Ordering::Relaxed);
        self.constants
            .lock()
            .unwrap()
            .get(&(module, name.clone()))
            .cloned()
    }

    fn define(&self, module: ModuleId, name: Symbol, value: Value) {
        self.constants.lock().unwrap().insert((module, name), value);
        self.constant_serial.fetch_add(1, Ordering::AcqRel);
    }
}

pub fn runtime(world: &Arc<TestWorld>) -> Arc<Runtime> {
    runtime_with(world, VmConfig::default())
}

pub fn runtime_with(world: &Arc<TestWorld>, config: VmConfig) -> Arc<Runtime> {
    init_tracing();
    let methods: Arc<dyn MethodResolver> = Arc::clone(world) as Arc<dyn MethodResolver>;
    let constants: Arc<dyn ConstantResolver> = Arc::clone(world) as Arc<dyn ConstantResolver>;
    Runtime::new(config, methods, constants)
}

/// Config with compilation switched off, so invocation counts stay out of
/// tests that do not look at them.
pub fn no_jit() -> VmConfig {
    let mut config = VmConfig::default();
    config.jit.enabled = false;
    config
}

/// Assemble `source` into a method body.
pub fn method(name: &str, source: &str, literals: Vec<Value>) -> CompiledCode {
    CompiledCode::new(name, assemble(source).unwrap(), literals)
}

pub fn object(class: ClassId) -> Value {
    Value::Object(ObjectRef::new(class))
}

pub fn native(body: fn(&[Value]) -> Value) -> NativeFn {
    Arc::new(
        move |_state: &mut State, args: NativeArgs<'_>| -> Result<Value, VMError> {
            Ok(body(args.args))
        },
    )
}

/// Run `code` on a fresh thread state.
pub fn call(
    runtime: &Arc<Runtime>,
    code: &Arc<CompiledCode>,
    receiver: Value,
    args: Vec<Value>,
) -> Result<Value, Exception> {
    let mut state = State::new(Arc::clone(runtime));
    let result = Interpreter::call(&mut state, code, receiver, args);
    assert_eq!(state.depth(), 0, "call stack not unwound");
    result
}
