//! Host Boundary
//!
//! The primitive surface a foreign runtime exposes to native modules.
//!
//! # Architecture
//!
//! ```text
//! Foreign runtime (owns every value)
//!       │
//!       ▼
//! Host trait (intern, funcall, integers, strings, vectors, exits, ...)
//!       │
//!       ▼
//! Env<'_> (call-scoped, checked wrapper; never leaves the calling thread)
//!       │
//!       ▼
//! Codecs, registration managers, dispatch
//! ```
//!
//! Everything above the `Host` trait is written against this boundary only,
//! so a module can be driven by the real runtime or by the in-process
//! [`sandbox::Sandbox`] used in tests.

mod env;
pub mod sandbox;

pub use env::Env;

use std::fmt;
use std::marker::PhantomData;

use num_bigint::BigInt;

/// An opaque reference to a value owned by the foreign runtime.
///
/// A `Value` is only valid during the call that produced it. It is neither
/// `Send` nor `Sync`, and it deliberately has no `PartialEq`: two values may
/// denote the same object, so identity must be tested with [`Env::eq`].
#[derive(Clone, Copy)]
pub struct Value {
    raw: usize,
    _not_send: PhantomData<*const ()>,
}

impl Value {
    /// Wrap a raw host reference. Only host implementations should call this.
    pub fn from_raw(raw: usize) -> Self {
        Self {
            raw,
            _not_send: PhantomData,
        }
    }

    /// The raw host reference.
    pub fn raw(&self) -> usize {
        self.raw
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value(#{})", self.raw)
    }
}

/// Kind of the nonlocal exit pending in a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Return,
    Signal,
    Throw,
}

/// A pending nonlocal exit together with its payload.
#[derive(Debug, Clone, Copy)]
pub enum Exit {
    /// No nonlocal exit is pending.
    Return,
    /// A signal `(symbol . data)` is pending.
    Signal { symbol: Value, data: Value },
    /// A throw to `tag` carrying `value` is pending.
    Throw { tag: Value, value: Value },
}

impl Exit {
    pub fn kind(&self) -> ExitKind {
        match self {
            Exit::Return => ExitKind::Return,
            Exit::Signal { .. } => ExitKind::Signal,
            Exit::Throw { .. } => ExitKind::Throw,
        }
    }
}

/// How many arguments a foreign callable accepts.
///
/// `max == None` marks a variadic function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    /// Exactly `n` arguments.
    pub const fn exact(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    /// At least `min` arguments.
    pub const fn variadic(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn is_variadic(&self) -> bool {
        self.max.is_none()
    }

    /// Check whether `n` arguments are acceptable.
    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "({} . {})", self.min, max),
            None => write!(f, "({} . many)", self.min),
        }
    }
}

/// Result of polling the host for pending user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessInput {
    /// The caller may continue.
    Continue,
    /// The caller should return to the runtime as quickly as possible.
    Quit,
}

/// The single entry point the host invokes for every module function.
///
/// `data` is the opaque handle passed to [`Host::make_function`]. Native
/// function references never cross the boundary; only this handle does.
pub trait Trampoline: Send + Sync {
    /// Invoke the function identified by `data`.
    fn call(&self, env: &mut Env<'_>, args: &[Value], data: u64) -> Value;

    /// The host no longer references the callable created for `data`.
    fn finalize(&self, data: u64);
}

/// The primitive operations a foreign runtime provides.
///
/// Primitives report failure by leaving a nonlocal exit pending; while one is
/// pending, every primitive returns a nil-like result and does nothing.
/// Implementations are single-threaded and call-scoped: the runtime hands a
/// `&mut dyn Host` to the module for the duration of one call.
pub trait Host {
    fn intern(&mut self, name: &str) -> Value;
    fn funcall(&mut self, function: Value, args: &[Value]) -> Value;
    fn eq(&mut self, a: Value, b: Value) -> bool;
    fn is_not_nil(&mut self, value: Value) -> bool;

    fn extract_integer(&mut self, value: Value) -> i64;
    fn make_integer(&mut self, i: i64) -> Value;
    fn extract_big_integer(&mut self, value: Value) -> BigInt;
    fn make_big_integer(&mut self, i: &BigInt) -> Value;

    fn extract_float(&mut self, value: Value) -> f64;
    fn make_float(&mut self, f: f64) -> Value;

    /// Copy the bytes of a string; `None` with a pending exit if `value` is
    /// not a string.
    fn copy_string_contents(&mut self, value: Value) -> Option<Vec<u8>>;
    fn make_string(&mut self, s: &str) -> Value;
    fn make_unibyte_string(&mut self, bytes: &[u8]) -> Value;

    fn vec_get(&mut self, vector: Value, index: usize) -> Value;
    fn vec_set(&mut self, vector: Value, index: usize, value: Value);
    fn vec_size(&mut self, vector: Value) -> usize;

    /// Seconds and nanoseconds since the epoch of a time value.
    fn extract_time(&mut self, value: Value) -> (i64, u32);
    fn make_time(&mut self, secs: i64, nanos: u32) -> Value;

    /// Create a callable that invokes the host's trampoline with `data`.
    /// With `finalize`, the host calls [`Trampoline::finalize`] once the
    /// callable becomes unreachable.
    fn make_function(&mut self, arity: Arity, doc: Option<&str>, data: u64, finalize: bool)
        -> Value;

    fn exit_check(&mut self) -> ExitKind;
    fn exit_get(&mut self) -> Exit;
    fn exit_clear(&mut self);
    fn exit_signal(&mut self, symbol: Value, data: Value);
    fn exit_throw(&mut self, tag: Value, value: Value);

    fn should_quit(&mut self) -> bool;
    fn process_input(&mut self) -> ProcessInput;

    /// A writable file descriptor feeding the given pipe process, or -1 with
    /// a pending exit.
    fn open_channel(&mut self, pipe_process: Value) -> i64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_accepts() {
        assert!(Arity::exact(2).accepts(2));
        assert!(!Arity::exact(2).accepts(3));
        assert!(Arity::variadic(1).accepts(7));
        assert!(!Arity::variadic(1).accepts(0));
        assert_eq!(Arity::variadic(1).to_string(), "(1 . many)");
    }
}
