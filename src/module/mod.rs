//! Module Context
//!
//! A [`Module`] owns everything a native module registers with the host:
//! functions, variables, error symbols, hash table tests, unit tests and
//! initialization hooks, plus the type registry used to convert values.
//!
//! # Lifecycle
//!
//! ```text
//! Module::new()            (no host yet)
//!       │  export / define_var / define_error / on_init ...  (queued)
//!       ▼
//! Module::init(env)        (host loaded the module; queues defined once)
//!       │
//!       ▼
//! Trampoline::call         (every call from the host, see `dispatch`)
//! ```
//!
//! Registration methods ending in `_now` need a live environment and define
//! the entity immediately; they keep working after initialization.

mod doc;
mod entity;

pub use doc::{Doc, Usage};

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::async_bridge::Async;
use crate::codec::{HashTest, Name};
use crate::config::BridgeConfig;
use crate::error::{Error, ErrorSymbol, RegistrationError, Result};
use crate::handle::{Handle, HandleRegistry};
use crate::host::{Arity, Env, Trampoline, Value};
use crate::manager::{Manager, ManagerFlags};
use crate::translate::ErrorTranslator;
use crate::types::{
    func, AutoFunc, CallableRecord, Datum, Func, Imported, IntoNative, NativeType, Signature,
    TypeRegistry,
};

use entity::{ConditionDef, FunctionDef, HashTestDef, TestDef, VariableDef};

/// A hook run at the end of [`Module::init`].
pub type InitFn = Arc<dyn Fn(&mut Env<'_>) -> Result<()> + Send + Sync>;

/// Convert a Rust identifier to a host name: `my_func` and `MyFunc` both
/// become `my-func`.
pub fn lisp_name(ident: &str) -> Name {
    let ident = ident.rsplit("::").next().unwrap_or(ident).trim();
    let mut name = String::with_capacity(ident.len() + 4);
    for (i, c) in ident.chars().enumerate() {
        if c == '_' {
            name.push('-');
        } else if c.is_uppercase() {
            if i > 0 && !name.ends_with('-') {
                name.push('-');
            }
            name.extend(c.to_lowercase());
        } else {
            name.push(c);
        }
    }
    Name::new(name)
}

/// Export a function under the host name derived from its identifier.
///
/// ```ignore
/// export!(module, add_numbers)?;                  // add-numbers
/// export!(module, add_numbers, "Add numbers.")?;
/// ```
#[macro_export]
macro_rules! export {
    ($module:expr, $f:path) => {
        $crate::export!($module, $f, "")
    };
    ($module:expr, $f:path, $doc:expr) => {
        $module.export(
            $crate::module::lisp_name(stringify!($f)),
            $f,
            $doc,
        )
    };
}

pub(crate) struct Inner {
    pub(crate) config: BridgeConfig,
    pub(crate) translator: ErrorTranslator,
    pub(crate) types: RwLock<TypeRegistry>,
    pub(crate) functions: HandleRegistry<CallableRecord>,
    errors: Manager<ConditionDef>,
    hash_tests: Manager<HashTestDef>,
    vars: Manager<VariableDef>,
    funcs: Manager<FunctionDef>,
    tests: Manager<TestDef>,
    inits: Mutex<Vec<InitFn>>,
    /// 0 until initialized.
    major_version: AtomicI64,
}

/// The registration context of one native module.
///
/// Cheap to clone; clones share all state. A `Module` is also the
/// [`Trampoline`] the host calls for every exported function.
#[derive(Clone)]
pub struct Module {
    pub(crate) inner: Arc<Inner>,
}

impl Module {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let translator = ErrorTranslator::new(&config.errors.prefix);
        let defined = ManagerFlags::REQUIRE_UNIQUE_NAME | ManagerFlags::DEFINE_ON_INIT;
        let named = defined | ManagerFlags::REQUIRE_NAME;
        let module = Self {
            inner: Arc::new(Inner {
                config,
                translator,
                types: RwLock::new(TypeRegistry::new()),
                functions: HandleRegistry::new(),
                errors: Manager::new(named),
                hash_tests: Manager::new(named),
                vars: Manager::new(named),
                funcs: Manager::new(defined),
                tests: Manager::new(named),
                inits: Mutex::new(Vec::new()),
                major_version: AtomicI64::new(0),
            }),
        };
        for (symbol, parents) in module.inner.translator.conditions() {
            let name = symbol.name().clone();
            // The managers are fresh, so the framework names are free.
            let _ = module
                .inner
                .errors
                .enqueue(Some(name), ConditionDef { symbol, parents });
        }
        module
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn translator(&self) -> &ErrorTranslator {
        &self.inner.translator
    }

    /// Shared access to the type registry.
    pub fn types(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        self.inner.types.read()
    }

    /// Exclusive access to the type registry, for registering user types.
    pub fn types_mut(&self) -> RwLockWriteGuard<'_, TypeRegistry> {
        self.inner.types.write()
    }

    /// This module as the host's trampoline.
    pub fn trampoline(&self) -> Arc<dyn Trampoline> {
        Arc::new(self.clone())
    }

    /// An asynchronous operation tracker whose errors use this module's
    /// conditions.
    pub fn new_async(&self, notify: crossbeam_channel::Sender<()>) -> Result<Async> {
        Async::new(
            notify,
            self.inner.config.async_ops.queue_capacity,
            self.inner.translator.clone(),
        )
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Queue a typed function for definition under `name`.
    ///
    /// Every parameter and return type must have a codec; otherwise this
    /// fails immediately with `UnsupportedType`.
    pub fn export<F, M>(&self, name: impl Into<Name>, f: F, doc: impl Into<Doc>) -> Result<Handle>
    where
        F: IntoNative<M>,
    {
        let auto = AutoFunc::new(f, &self.types())?;
        let arity = auto.arity();
        self.export_record(name.into(), auto.into_record(doc.into()), arity)
    }

    /// Queue a raw function that receives host values unconverted.
    pub fn export_func(
        &self,
        name: impl Into<Name>,
        f: Func,
        arity: Arity,
        doc: impl Into<Doc>,
    ) -> Result<Handle> {
        let record = CallableRecord::new(arity, doc.into(), f);
        self.export_record(name.into(), record, arity)
    }

    /// Queue a function whose signature is only known at runtime.
    pub fn export_dynamic<F>(
        &self,
        name: impl Into<Name>,
        signature: Signature,
        f: F,
        doc: impl Into<Doc>,
    ) -> Result<Handle>
    where
        F: Fn(&mut Env<'_>, Vec<Datum>) -> Result<Datum> + Send + Sync + 'static,
    {
        let auto = AutoFunc::dynamic(signature, f, &self.types())?;
        let arity = auto.arity();
        self.export_record(name.into(), auto.into_record(doc.into()), arity)
    }

    fn export_record(&self, name: Name, record: CallableRecord, arity: Arity) -> Result<Handle> {
        name.validate()?;
        record.doc.validate()?;
        let doc = record.doc.clone();
        let handle = self.inner.functions.allocate(record)?;
        let def = FunctionDef {
            name: Some(name),
            handle,
            arity,
            doc,
            finalize: false,
        };
        if let Err(err) = self.inner.funcs.enqueue(def.name.clone(), def) {
            self.inner.functions.release(handle);
            return Err(err);
        }
        Ok(handle)
    }

    /// Define a typed function immediately and return it. An empty name
    /// defines an anonymous function, which is released once the host
    /// collects it.
    pub fn export_now<F, M>(
        &self,
        env: &mut Env<'_>,
        name: impl Into<Name>,
        f: F,
        doc: impl Into<Doc>,
    ) -> Result<Value>
    where
        F: IntoNative<M>,
    {
        let auto = AutoFunc::new(f, &self.types())?;
        let arity = auto.arity();
        self.define_record_now(env, name.into(), auto.into_record(doc.into()), arity)
    }

    /// Define a raw function immediately and return it. An empty name
    /// defines an anonymous function.
    pub fn export_func_now(
        &self,
        env: &mut Env<'_>,
        name: impl Into<Name>,
        f: Func,
        arity: Arity,
        doc: impl Into<Doc>,
    ) -> Result<Value> {
        let record = CallableRecord::new(arity, doc.into(), f);
        self.define_record_now(env, name.into(), record, arity)
    }

    fn define_record_now(
        &self,
        env: &mut Env<'_>,
        name: Name,
        record: CallableRecord,
        arity: Arity,
    ) -> Result<Value> {
        let name = if name.is_empty() { None } else { Some(name) };
        record.doc.validate()?;
        self.inner.funcs.reserve(name.as_ref())?;
        let doc = record.doc.clone();
        let handle = self.inner.functions.allocate(record)?;
        let def = FunctionDef {
            finalize: name.is_none(),
            name,
            handle,
            arity,
            doc,
        };
        def.materialize(env).map_err(|err| {
            self.inner.functions.release(handle);
            err
        })
    }

    /// Release the function behind `handle`. Calling it afterwards is a
    /// contract violation.
    pub fn unexport(&self, handle: Handle) -> bool {
        self.inner.functions.release(handle).is_some()
    }

    /// An adapter for calling the host function `name`.
    pub fn import(&self, name: impl Into<Name>, signature: Signature) -> Result<Imported> {
        Imported::new(name, signature, &self.types())
    }

    // ========================================================================
    // Other entities
    // ========================================================================

    /// Queue an error symbol for definition with `define-error`.
    pub fn define_error(
        &self,
        name: impl Into<Name>,
        message: &str,
        parents: &[ErrorSymbol],
    ) -> Result<ErrorSymbol> {
        let def = condition(name.into(), message, parents)?;
        let symbol = def.symbol.clone();
        self.inner.errors.enqueue(Some(symbol.name().clone()), def)?;
        Ok(symbol)
    }

    pub fn define_error_now(
        &self,
        env: &mut Env<'_>,
        name: impl Into<Name>,
        message: &str,
        parents: &[ErrorSymbol],
    ) -> Result<ErrorSymbol> {
        let def = condition(name.into(), message, parents)?;
        let symbol = def.symbol.clone();
        self.inner
            .errors
            .register_and_define(env, Some(symbol.name().clone()), def)?;
        Ok(symbol)
    }

    /// Queue a dynamic variable with an initial value.
    pub fn define_var<T: NativeType>(
        &self,
        name: impl Into<Name>,
        init: T,
        doc: impl Into<Doc>,
    ) -> Result<Name> {
        let def = variable(name.into(), init, doc.into())?;
        let name = def.name.clone();
        self.inner.vars.enqueue(Some(name.clone()), def)?;
        Ok(name)
    }

    pub fn define_var_now<T: NativeType>(
        &self,
        env: &mut Env<'_>,
        name: impl Into<Name>,
        init: T,
        doc: impl Into<Doc>,
    ) -> Result<Name> {
        let def = variable(name.into(), init, doc.into())?;
        let name = def.name.clone();
        self.inner.vars.register_and_define(env, Some(name.clone()), def)?;
        Ok(name)
    }

    /// Queue a custom hash table test.
    ///
    /// `equal` must take two keys and `hash` one. Once registered, the test
    /// can be selected with [`TypeRegistry::set_hash_test`].
    pub fn define_hash_test<E, EM, H, HM>(&self, name: impl Into<Name>, equal: E, hash: H) -> Result<HashTest>
    where
        E: IntoNative<EM>,
        H: IntoNative<HM>,
    {
        let name = name.into();
        name.validate()?;
        let (equal, hash) = {
            let types = self.types();
            (AutoFunc::new(equal, &types)?, AutoFunc::new(hash, &types)?)
        };
        for (auto, want) in [(&equal, 2), (&hash, 1)] {
            if auto.arity() != Arity::exact(want) {
                return Err(Error::UnsupportedType(format!(
                    "hash test {} function {} must take {} arguments",
                    name,
                    auto.signature(),
                    want
                )));
            }
        }
        let equal = self.inner.functions.allocate(equal.into_record(Doc::default()))?;
        let hash = match self.inner.functions.allocate(hash.into_record(Doc::default())) {
            Ok(h) => h,
            Err(err) => {
                self.inner.functions.release(equal);
                return Err(err);
            }
        };
        let def = HashTestDef {
            name: name.clone(),
            equal,
            hash,
        };
        if let Err(err) = self.inner.hash_tests.enqueue(Some(name.clone()), def) {
            self.inner.functions.release(equal);
            self.inner.functions.release(hash);
            return Err(err);
        }
        self.types_mut().register_hash_test(name.clone());
        Ok(HashTest::Custom(name))
    }

    /// Queue a unit test. The test fails if `body` returns an error.
    pub fn define_test<F>(&self, name: impl Into<Name>, body: F, doc: impl Into<Doc>) -> Result<()>
    where
        F: Fn(&mut Env<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        name.validate()?;
        let doc = doc.into();
        doc.validate()?;
        let body = func(move |env, _args| {
            body(env)?;
            env.nil()
        });
        let handle = self
            .inner
            .functions
            .allocate(CallableRecord::new(Arity::exact(0), Doc::default(), body))?;
        let def = TestDef {
            name: name.clone(),
            body: handle,
            doc,
        };
        self.inner.tests.enqueue(Some(name), def).map_err(|err| {
            self.inner.functions.release(handle);
            err
        })
    }

    /// Run `f` at the end of initialization, after every queued entity has
    /// been defined. Hooks run in registration order.
    ///
    /// Fails with [`RegistrationError::Closed`] once initialization has
    /// started, including from inside a running hook.
    pub fn on_init<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&mut Env<'_>) -> Result<()> + Send + Sync + 'static,
    {
        // init takes the lock after closing, so a hook pushed here is seen.
        let mut inits = self.inner.inits.lock();
        if self.inner.major_version.load(Ordering::SeqCst) != 0 {
            return Err(RegistrationError::Closed.into());
        }
        inits.push(Arc::new(f));
        Ok(())
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Initialize the module in a freshly loaded host.
    ///
    /// Checks the host's major version, then defines queued error symbols,
    /// hash tests, variables, functions and tests, in that order, and
    /// finally runs the init hooks. Fails if the module was already
    /// initialized.
    pub fn init(&self, env: &mut Env<'_>) -> Result<()> {
        let version = self.check_version(env)?;
        self.inner
            .major_version
            .compare_exchange(0, version, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RegistrationError::Closed)?;
        info!("initializing module (host major version {})", version);

        let inner = &self.inner;
        if inner.errors.flags().contains(ManagerFlags::DEFINE_ON_INIT) {
            inner.errors.define_queued(env)?;
        }
        if inner.hash_tests.flags().contains(ManagerFlags::DEFINE_ON_INIT) {
            inner.hash_tests.define_queued(env)?;
        }
        if inner.vars.flags().contains(ManagerFlags::DEFINE_ON_INIT) {
            inner.vars.define_queued(env)?;
        }
        if inner.funcs.flags().contains(ManagerFlags::DEFINE_ON_INIT) {
            inner.funcs.define_queued(env)?;
        }
        if inner.tests.flags().contains(ManagerFlags::DEFINE_ON_INIT) {
            inner.tests.define_queued(env)?;
        }

        // Registration is closed, so the list no longer changes.
        let hooks: Vec<_> = inner.inits.lock().clone();
        for hook in hooks {
            hook(env)?;
        }
        debug!("module initialized");
        Ok(())
    }

    /// Entry point for the host's module loader.
    ///
    /// Runs [`init`](Self::init) with panics contained. On failure the error
    /// is left pending in the host and `false` is returned.
    pub fn module_init(&self, env: &mut Env<'_>) -> bool {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.init(env)));
        let err = match result {
            Ok(Ok(())) => return true,
            Ok(Err(err)) => err,
            Err(payload) => Error::Panic(crate::dispatch::panic_message(&*payload)),
        };
        log::error!("module initialization failed: {}", err);
        self.inner.translator.deliver(env, err);
        false
    }

    /// The host's major version, once initialized.
    pub fn major_version(&self) -> Option<i64> {
        match self.inner.major_version.load(Ordering::SeqCst) {
            0 => None,
            v => Some(v),
        }
    }

    fn check_version(&self, env: &mut Env<'_>) -> Result<i64> {
        let symbol = env.intern("emacs-major-version")?;
        let value = env.call("symbol-value", &[symbol])?;
        let version = env.int(value)?;
        let min = self.inner.config.runtime.min_major_version;
        if version < min {
            return Err(self.inner.translator.base_error().error(vec![Datum::Str(format!(
                "host major version {} is too old; at least {} is required",
                version, min
            ))]));
        }
        Ok(version)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("functions", &self.inner.functions.len())
            .field("major_version", &self.major_version())
            .finish()
    }
}

fn condition(name: Name, message: &str, parents: &[ErrorSymbol]) -> Result<ConditionDef> {
    if message.is_empty() {
        return Err(RegistrationError::EmptyMessage(name.to_string()).into());
    }
    Ok(ConditionDef {
        symbol: ErrorSymbol::new(name, message),
        parents: parents.to_vec(),
    })
}

fn variable<T: NativeType>(name: Name, init: T, doc: Doc) -> Result<VariableDef> {
    doc.validate()?;
    let init = init.into_datum();
    if let Datum::Custom(c) = &init {
        return Err(Error::UnsupportedType(format!(
            "{} as the initial value of {}",
            c.type_name(),
            name
        )));
    }
    Ok(VariableDef { name, init, doc })
}
