//! modbridge - Native Modules for a Lisp Runtime
//!
//! Write dynamic modules for an embedded Lisp runtime in plain Rust. The
//! runtime owns every value and calls into the module through a single
//! trampoline; this crate turns typed Rust functions into host functions,
//! converts values in both directions and keeps errors, signals and panics
//! from crossing the boundary in the wrong shape.
//!
//! # Features
//!
//! - **Typed exports**: closures over integers, floats, strings, lists,
//!   vectors, hash maps, times and user types become host functions
//! - **Lossless conversion**: big integers, unibyte strings and
//!   picosecond times survive the round trip
//! - **Error translation**: native errors become host signals; host
//!   signals and throws pass through untouched
//! - **Panic containment**: a panicking function signals `rust-panic` and
//!   the module keeps working
//! - **Registration queues**: functions, variables, error symbols, hash
//!   table tests and unit tests defined once at load time
//! - **Async results**: worker threads complete promises that the host
//!   collects in batches after a notification
//!
//! # Example
//!
//! ```rust
//! use modbridge::host::sandbox::Sandbox;
//! use modbridge::Module;
//!
//! let module = Module::new();
//! module.export("add", |a: i64, b: i64| a + b, "Add two numbers.").unwrap();
//!
//! let mut sandbox = Sandbox::with_trampoline(module.trampoline());
//! sandbox.with_env(|env| {
//!     module.init(env).unwrap();
//!     let (a, b) = (env.make_int(2).unwrap(), env.make_int(3).unwrap());
//!     let sum = env.call("add", &[a, b]).unwrap();
//!     assert_eq!(env.int(sum).unwrap(), 5);
//! });
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Lisp runtime   │  owns every value, calls by handle
//! └────────┬────────┘
//!          │ Trampoline::call(env, args, handle)
//!          ▼
//! ┌─────────────────┐
//! │    dispatch     │  panic containment, error delivery
//! └────────┬────────┘
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌───────┐  ┌──────────┐
//! │ types │  │  codec   │  typed signatures, value conversion
//! └───────┘  └──────────┘
//!          │
//!          ▼
//! ┌─────────────────────┐
//! │ module / manager    │  registration queues, init
//! └─────────────────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod async_bridge;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod host;
pub mod logging;
pub mod manager;
pub mod module;
pub mod translate;
pub mod types;

// Errors
pub use error::{
    ConversionError, Error, ErrorSymbol, LispError, RegistrationError, Result, Signal, Throw,
};

// Host boundary
pub use host::{Arity, Env, Exit, ExitKind, Host, ProcessInput, Trampoline, Value};

// Conversion
pub use codec::{Bytes, Cons, Decode, Encode, HashKey, HashTest, List, Name, Picoseconds, Symbol};
pub use types::{Datum, NativeType, Rest, Signature, TypeDesc, TypeRegistry};

// Modules
pub use module::{lisp_name, Doc, Module, Usage};
pub use translate::ErrorTranslator;

// Async
pub use async_bridge::{Async, AsyncData, AsyncError, AsyncHandle, Promise};

// Configuration
pub use config::BridgeConfig;
