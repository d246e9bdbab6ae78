//! Reference Host
//!
//! An in-process implementation of [`Host`]: a small Lisp object heap with
//! symbols, numbers, strings, conses, vectors, hash tables and the handful
//! of builtins the bridge relies on. Module functions created with
//! [`Host::make_function`] call back into the installed [`Trampoline`].
//!
//! The sandbox follows the runtime's module API rules: a primitive failure
//! leaves a nonlocal exit pending, and while one is pending every primitive
//! returns nil and does nothing.
//!
//! ```ignore
//! let module = Module::new();
//! module.export("add", |a: i64, b: i64| a + b, "Add two numbers.")?;
//! let mut sandbox = Sandbox::with_trampoline(module.trampoline());
//! sandbox.with_env(|env| module.init(env))?;
//! ```

mod builtins;
mod objects;

use std::fmt;
use std::sync::Arc;

use log::debug;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use super::{Arity, Env, Exit, ExitKind, Host, ProcessInput, Trampoline, Value};

use builtins::Builtin;
use objects::{Heap, Id, ModuleFn, Object, NIL};

/// Major version reported through `emacs-major-version`.
pub const DEFAULT_MAJOR_VERSION: i64 = 29;

/// Symbol function indirections followed before giving up.
const MAX_INDIRECTIONS: usize = 100;

/// Marker for a failure whose signal is already pending.
#[derive(Debug, Clone, Copy)]
struct Raised;

type Outcome = std::result::Result<Id, Raised>;

#[derive(Debug, Clone, Copy)]
enum Pending {
    Signal(Id, Id),
    Throw(Id, Id),
}

/// An in-memory host runtime.
pub struct Sandbox {
    heap: Heap,
    exit: Option<Pending>,
    trampoline: Option<Arc<dyn Trampoline>>,
    quit: bool,
}

impl Sandbox {
    pub fn new() -> Self {
        let mut sandbox = Self {
            heap: Heap::new(),
            exit: None,
            trampoline: None,
            quit: false,
        };
        for builtin in builtins::BUILTINS {
            let f = sandbox.heap.alloc(Object::Subr(*builtin));
            let symbol = sandbox.heap.intern(builtin.name);
            if let Some(cell) = sandbox.heap.symbol_mut(symbol) {
                cell.function = Some(f);
            }
        }
        sandbox.define_standard_errors();
        sandbox.set_major_version(DEFAULT_MAJOR_VERSION);
        sandbox
    }

    /// A sandbox whose module functions dispatch to `trampoline`.
    pub fn with_trampoline(trampoline: Arc<dyn Trampoline>) -> Self {
        let mut sandbox = Self::new();
        sandbox.set_trampoline(trampoline);
        sandbox
    }

    pub fn set_trampoline(&mut self, trampoline: Arc<dyn Trampoline>) {
        self.trampoline = Some(trampoline);
    }

    /// Run `f` with a live environment, as if the host had called into the
    /// module. Any exit `f` leaves pending is cleared afterwards.
    pub fn with_env<R>(&mut self, f: impl FnOnce(&mut Env<'_>) -> R) -> R {
        let r = {
            let mut env = Env::new(self);
            f(&mut env)
        };
        self.exit = None;
        r
    }

    pub fn set_major_version(&mut self, version: i64) {
        let symbol = self.heap.intern("emacs-major-version");
        let value = self.heap.int(version);
        if let Some(cell) = self.heap.symbol_mut(symbol) {
            cell.value = Some(value);
        }
    }

    /// Simulate the user pressing the quit key.
    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    /// Number of objects ever allocated.
    pub fn object_count(&self) -> usize {
        self.heap.len()
    }

    /// Run the collector: every finalizable module function that is no
    /// longer reachable from a symbol is finalized through the trampoline.
    /// Returns the number of functions finalized.
    pub fn collect(&mut self) -> usize {
        let roots: Vec<Id> = match self.exit {
            Some(Pending::Signal(a, b)) | Some(Pending::Throw(a, b)) => vec![a, b],
            None => Vec::new(),
        };
        let marked = self.heap.mark(&roots);
        let finalized = self.heap.sweep_functions(&marked);
        if let Some(trampoline) = &self.trampoline {
            for &data in &finalized {
                debug!("finalizing module function {}", data);
                trampoline.finalize(data);
            }
        }
        finalized.len()
    }

    /// Read exactly `n` bytes written to the pipe process `process`.
    #[cfg(unix)]
    pub fn read_pipe(&mut self, process: Value, n: usize) -> std::io::Result<Vec<u8>> {
        use std::io::Read;

        let id = process.raw();
        match self.heap.contains(id).then(|| self.heap.get_mut(id)) {
            Some(Object::Pipe(pipe)) => {
                let mut buf = vec![0u8; n];
                pipe.read.read_exact(&mut buf)?;
                Ok(buf)
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a pipe process",
            )),
        }
    }

    // ========================================================================
    // Signals
    // ========================================================================

    fn raise(&mut self, symbol: &str, data: &[Id]) -> Raised {
        if self.exit.is_none() {
            let symbol = self.heap.intern(symbol);
            let data = self.heap.list(data);
            self.exit = Some(Pending::Signal(symbol, data));
        }
        Raised
    }

    fn wrong_type(&mut self, predicate: &str, value: Id) -> Raised {
        let predicate = self.heap.intern(predicate);
        self.raise("wrong-type-argument", &[predicate, value])
    }

    /// Signal `error` with a message.
    fn error(&mut self, message: &str) -> Raised {
        let message = self.heap.string(message);
        self.raise("error", &[message])
    }

    fn define_standard_errors(&mut self) {
        const STANDARD: &[(&str, &str, &[&str])] = &[
            ("error", "error", &[]),
            ("quit", "Quit", &[]),
            ("wrong-type-argument", "Wrong type argument", &["error"]),
            ("args-out-of-range", "Args out of range", &["error"]),
            ("arith-error", "Arithmetic error", &["error"]),
            ("overflow-error", "Arithmetic overflow error", &["arith-error"]),
            ("void-function", "Symbol's function definition is void", &["error"]),
            ("void-variable", "Symbol's value as variable is void", &["error"]),
            ("wrong-number-of-arguments", "Wrong number of arguments", &["error"]),
            ("invalid-function", "Invalid function", &["error"]),
            ("setting-constant", "Attempt to set a constant symbol", &["error"]),
            ("file-error", "File error", &["error"]),
            ("no-catch", "No catch for tag", &["error"]),
        ];
        let conditions = self.heap.intern("error-conditions");
        let message_prop = self.heap.intern("error-message");
        for (name, message, parents) in STANDARD {
            let symbol = self.heap.intern(name);
            let mut all = vec![symbol];
            for parent in parents.iter() {
                let parent = self.heap.intern(parent);
                let inherited = self
                    .heap
                    .get_prop(parent, conditions)
                    .and_then(|l| self.heap.list_items(l))
                    .unwrap_or_default();
                for c in inherited {
                    if !all.contains(&c) {
                        all.push(c);
                    }
                }
            }
            let list = self.heap.list(&all);
            let message = self.heap.string(message);
            self.heap.put_prop(symbol, conditions, list);
            self.heap.put_prop(symbol, message_prop, message);
        }
    }

    // ========================================================================
    // Argument helpers
    // ========================================================================

    fn int_arg(&mut self, id: Id) -> std::result::Result<BigInt, Raised> {
        match self.heap.get(id) {
            Object::Int(i) => Ok(i.clone()),
            _ => Err(self.wrong_type("integerp", id)),
        }
    }

    fn index_arg(&mut self, id: Id) -> std::result::Result<usize, Raised> {
        let i = self.int_arg(id)?;
        match i.to_usize() {
            Some(n) => Ok(n),
            None => Err(self.raise("args-out-of-range", &[id])),
        }
    }

    fn string_arg(&mut self, id: Id) -> std::result::Result<String, Raised> {
        match self.heap.get(id) {
            Object::Str { bytes, .. } => Ok(String::from_utf8_lossy(bytes).into_owned()),
            _ => Err(self.wrong_type("stringp", id)),
        }
    }

    fn symbol_arg(&mut self, id: Id) -> std::result::Result<Id, Raised> {
        match self.heap.get(id) {
            Object::Symbol(_) => Ok(id),
            _ => Err(self.wrong_type("symbolp", id)),
        }
    }

    fn list_arg(&mut self, id: Id) -> std::result::Result<Vec<Id>, Raised> {
        match self.heap.list_items(id) {
            Some(items) => Ok(items),
            None => Err(self.wrong_type("listp", id)),
        }
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Follow symbol function cells to a callable object.
    fn indirect_function(&mut self, f: Id) -> Outcome {
        let mut current = f;
        for _ in 0..MAX_INDIRECTIONS {
            let next = match self.heap.get(current) {
                Object::Symbol(cell) => cell.function.unwrap_or(NIL),
                _ => return Ok(current),
            };
            if next == NIL {
                return Err(self.raise("void-function", &[f]));
            }
            current = next;
        }
        Err(self.raise("invalid-function", &[f]))
    }

    fn apply(&mut self, f: Id, args: &[Id]) -> Outcome {
        let target = self.indirect_function(f)?;
        match self.heap.get(target) {
            Object::Subr(builtin) => {
                let builtin: Builtin = *builtin;
                if !builtin.arity().accepts(args.len()) {
                    let n = self.heap.int(args.len() as i64);
                    return Err(self.raise("wrong-number-of-arguments", &[f, n]));
                }
                (builtin.f)(self, args)
            }
            Object::ModuleFn(m) if !m.finalized => {
                let (arity, data) = (m.arity, m.data);
                if !arity.accepts(args.len()) {
                    let n = self.heap.int(args.len() as i64);
                    return Err(self.raise("wrong-number-of-arguments", &[target, n]));
                }
                self.call_module(data, args)
            }
            _ => Err(self.raise("invalid-function", &[f])),
        }
    }

    fn call_module(&mut self, data: u64, args: &[Id]) -> Outcome {
        let trampoline = match &self.trampoline {
            Some(t) => Arc::clone(t),
            None => return Err(self.error("no module trampoline installed")),
        };
        let values: Vec<Value> = args.iter().map(|&id| Value::from_raw(id)).collect();
        let result = {
            let mut env = Env::new(self);
            trampoline.call(&mut env, &values, data)
        };
        if self.exit.is_some() {
            return Err(Raised);
        }
        let id = result.raw();
        if !self.heap.contains(id) {
            return Err(self.error("module function returned an invalid value"));
        }
        Ok(id)
    }

    /// A minimal evaluator: self-evaluating atoms, variables, `quote`,
    /// `function`, `progn`, `defvar` and function calls.
    fn eval(&mut self, form: Id) -> Outcome {
        match self.heap.get(form) {
            Object::Symbol(cell) => match cell.value {
                Some(v) => Ok(v),
                None => Err(self.raise("void-variable", &[form])),
            },
            Object::Cons(head, _) => {
                let head = *head;
                let items = self.list_arg(form)?;
                let args = &items[1..];
                let special = self.heap.symbol(head).map(|c| c.name.clone());
                match special.as_deref() {
                    Some("quote") | Some("function") => Ok(args.first().copied().unwrap_or(NIL)),
                    Some("progn") => {
                        let mut last = NIL;
                        for &f in args {
                            last = self.eval(f)?;
                        }
                        Ok(last)
                    }
                    Some("defvar") => self.eval_defvar(args),
                    _ => {
                        let mut evaluated = Vec::with_capacity(args.len());
                        for &a in args {
                            evaluated.push(self.eval(a)?);
                        }
                        self.apply(head, &evaluated)
                    }
                }
            }
            _ => Ok(form),
        }
    }

    fn eval_defvar(&mut self, args: &[Id]) -> Outcome {
        let name = match args.first() {
            Some(&name) => self.symbol_arg(name)?,
            None => return Err(self.raise("wrong-number-of-arguments", &[])),
        };
        let bound = self.heap.symbol(name).map_or(false, |c| c.value.is_some());
        if let Some(&init) = args.get(1) {
            if !bound {
                let value = self.eval(init)?;
                if let Some(cell) = self.heap.symbol_mut(name) {
                    cell.value = Some(value);
                }
            }
        }
        if let Some(&doc) = args.get(2) {
            let prop = self.heap.intern("variable-documentation");
            self.heap.put_prop(name, prop, doc);
        }
        Ok(name)
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("objects", &self.heap.len())
            .field("exit", &self.exit)
            .field("quit", &self.quit)
            .finish()
    }
}

fn value(id: Id) -> Value {
    Value::from_raw(id)
}

impl Host for Sandbox {
    fn intern(&mut self, name: &str) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        value(self.heap.intern(name))
    }

    fn funcall(&mut self, function: Value, args: &[Value]) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        let ids: Vec<Id> = args.iter().map(|v| v.raw()).collect();
        if !self.heap.contains(function.raw()) || ids.iter().any(|&id| !self.heap.contains(id)) {
            self.error("invalid value passed to funcall");
            return value(NIL);
        }
        match self.apply(function.raw(), &ids) {
            Ok(id) => value(id),
            Err(Raised) => value(NIL),
        }
    }

    fn eq(&mut self, a: Value, b: Value) -> bool {
        self.heap.contains(a.raw()) && self.heap.contains(b.raw()) && self.heap.eq(a.raw(), b.raw())
    }

    fn is_not_nil(&mut self, value: Value) -> bool {
        value.raw() != NIL
    }

    fn extract_integer(&mut self, v: Value) -> i64 {
        if self.exit.is_some() {
            return 0;
        }
        match self.int_arg(v.raw()) {
            Ok(i) => match i64::try_from(&i) {
                Ok(i) => i,
                Err(_) => {
                    self.raise("overflow-error", &[v.raw()]);
                    0
                }
            },
            Err(Raised) => 0,
        }
    }

    fn make_integer(&mut self, i: i64) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        value(self.heap.int(i))
    }

    fn extract_big_integer(&mut self, v: Value) -> BigInt {
        if self.exit.is_some() {
            return BigInt::from(0);
        }
        self.int_arg(v.raw()).unwrap_or_else(|_| BigInt::from(0))
    }

    fn make_big_integer(&mut self, i: &BigInt) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        value(self.heap.int(i.clone()))
    }

    fn extract_float(&mut self, v: Value) -> f64 {
        if self.exit.is_some() {
            return 0.0;
        }
        match self.heap.get(v.raw()) {
            Object::Float(x) => *x,
            _ => {
                self.wrong_type("floatp", v.raw());
                0.0
            }
        }
    }

    fn make_float(&mut self, f: f64) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        value(self.heap.alloc(Object::Float(f)))
    }

    fn copy_string_contents(&mut self, v: Value) -> Option<Vec<u8>> {
        if self.exit.is_some() {
            return None;
        }
        match self.heap.get(v.raw()) {
            Object::Str { bytes, .. } => Some(bytes.clone()),
            _ => {
                self.wrong_type("stringp", v.raw());
                None
            }
        }
    }

    fn make_string(&mut self, s: &str) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        value(self.heap.string(s))
    }

    fn make_unibyte_string(&mut self, bytes: &[u8]) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        value(self.heap.alloc(Object::Str {
            bytes: bytes.to_vec(),
            multibyte: false,
        }))
    }

    fn vec_get(&mut self, vector: Value, index: usize) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        let id = vector.raw();
        match self.heap.get(id) {
            Object::Vector(items) => match items.get(index) {
                Some(&item) => value(item),
                None => {
                    let i = self.heap.int(index as u64);
                    self.raise("args-out-of-range", &[id, i]);
                    value(NIL)
                }
            },
            _ => {
                self.wrong_type("vectorp", id);
                value(NIL)
            }
        }
    }

    fn vec_set(&mut self, vector: Value, index: usize, v: Value) {
        if self.exit.is_some() {
            return;
        }
        let id = vector.raw();
        let out_of_range = match self.heap.get_mut(id) {
            Object::Vector(items) => match items.get_mut(index) {
                Some(slot) => {
                    *slot = v.raw();
                    return;
                }
                None => true,
            },
            _ => false,
        };
        if out_of_range {
            let i = self.heap.int(index as u64);
            self.raise("args-out-of-range", &[id, i]);
        } else {
            self.wrong_type("vectorp", id);
        }
    }

    fn vec_size(&mut self, vector: Value) -> usize {
        if self.exit.is_some() {
            return 0;
        }
        match self.heap.get(vector.raw()) {
            Object::Vector(items) => items.len(),
            _ => {
                self.wrong_type("vectorp", vector.raw());
                0
            }
        }
    }

    fn extract_time(&mut self, v: Value) -> (i64, u32) {
        if self.exit.is_some() {
            return (0, 0);
        }
        match builtins::time_parts(self, v.raw()) {
            Ok(t) => t,
            Err(Raised) => (0, 0),
        }
    }

    /// Times are `(HIGH LOW USEC PSEC)` lists.
    fn make_time(&mut self, secs: i64, nanos: u32) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        let high = self.heap.int(secs >> 16);
        let low = self.heap.int(secs & 0xffff);
        let usec = self.heap.int(nanos / 1000);
        let psec = self.heap.int((nanos % 1000) * 1000);
        value(self.heap.list(&[high, low, usec, psec]))
    }

    fn make_function(&mut self, arity: Arity, doc: Option<&str>, data: u64, finalize: bool) -> Value {
        if self.exit.is_some() {
            return value(NIL);
        }
        value(self.heap.alloc(Object::ModuleFn(ModuleFn {
            arity,
            doc: doc.map(str::to_string),
            data,
            finalize,
            finalized: false,
        })))
    }

    fn exit_check(&mut self) -> ExitKind {
        match self.exit {
            None => ExitKind::Return,
            Some(Pending::Signal(..)) => ExitKind::Signal,
            Some(Pending::Throw(..)) => ExitKind::Throw,
        }
    }

    fn exit_get(&mut self) -> Exit {
        match self.exit {
            None => Exit::Return,
            Some(Pending::Signal(symbol, data)) => Exit::Signal {
                symbol: value(symbol),
                data: value(data),
            },
            Some(Pending::Throw(tag, v)) => Exit::Throw {
                tag: value(tag),
                value: value(v),
            },
        }
    }

    fn exit_clear(&mut self) {
        self.exit = None;
    }

    fn exit_signal(&mut self, symbol: Value, data: Value) {
        if self.exit.is_none() {
            self.exit = Some(Pending::Signal(symbol.raw(), data.raw()));
        }
    }

    fn exit_throw(&mut self, tag: Value, v: Value) {
        if self.exit.is_none() {
            self.exit = Some(Pending::Throw(tag.raw(), v.raw()));
        }
    }

    fn should_quit(&mut self) -> bool {
        self.quit
    }

    fn process_input(&mut self) -> ProcessInput {
        if self.exit.is_some() {
            return ProcessInput::Quit;
        }
        if std::mem::take(&mut self.quit) {
            self.raise("quit", &[]);
            return ProcessInput::Quit;
        }
        ProcessInput::Continue
    }

    fn open_channel(&mut self, pipe_process: Value) -> i64 {
        if self.exit.is_some() {
            return -1;
        }
        builtins::open_channel(self, pipe_process.raw()).unwrap_or(-1)
    }
}

#[cfg(test)]
mod tests;
