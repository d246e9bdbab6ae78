//! Value Codecs
//!
//! Conversion between native values and host values.
//!
//! `Encode` turns a native value into a host value, `Decode` goes the other
//! way. Composite codecs (sequences, maps, options) are built from the codecs
//! of their elements.

mod hash;
mod integer;
mod seq;
mod string;
mod symbol;
mod time;

pub use hash::{HashKey, HashTest};
pub use seq::{Cons, List};
pub use string::Bytes;
pub use symbol::{Name, Symbol};
pub use time::Picoseconds;

use crate::error::Result;
use crate::host::{Env, Value};

/// Native to host conversion.
pub trait Encode {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value>;
}

/// Host to native conversion.
pub trait Decode: Sized {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self>;
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        (**self).encode(env)
    }
}

impl<T: Encode + ?Sized> Encode for Box<T> {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        (**self).encode(env)
    }
}

impl Encode for Value {
    fn encode(&self, _env: &mut Env<'_>) -> Result<Value> {
        Ok(*self)
    }
}

impl Decode for Value {
    fn decode(_env: &mut Env<'_>, value: Value) -> Result<Self> {
        Ok(value)
    }
}

/// `()` encodes as nil and decodes from anything.
impl Encode for () {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.nil()
    }
}

impl Decode for () {
    fn decode(_env: &mut Env<'_>, _value: Value) -> Result<Self> {
        Ok(())
    }
}

/// nil is false, everything else is true.
impl Encode for bool {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        if *self {
            env.t()
        } else {
            env.nil()
        }
    }
}

impl Decode for bool {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        Ok(env.is_not_nil(value))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        match self {
            Some(v) => v.encode(env),
            None => env.nil(),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        if env.is_nil(value) {
            Ok(None)
        } else {
            T::decode(env, value).map(Some)
        }
    }
}

impl Encode for f64 {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.make_float(*self)
    }
}

impl Decode for f64 {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        env.float(value)
    }
}

impl Encode for f32 {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.make_float(f64::from(*self))
    }
}

impl Decode for f32 {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let f = env.float(value)?;
        if f.is_finite() && f.abs() > f64::from(f32::MAX) {
            return Err(crate::error::Error::overflow(f));
        }
        Ok(f as f32)
    }
}
