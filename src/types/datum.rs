//! Owned, thread-safe native data.
//!
//! `Datum` is the intermediate form the type registry's codecs produce and
//! consume. Unlike `Value` it owns its contents, so it can be stored in
//! errors and sent across threads.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use num_bigint::BigInt;

use crate::codec::{Decode, Encode, HashTest};
use crate::error::{Error, Result};
use crate::host::{Env, Value};

/// A native value of any supported shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Nil,
    Bool(bool),
    Int(i64),
    Big(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Symbol(String),
    Time(SystemTime),
    Duration(Duration),
    /// A vector.
    Seq(Vec<Datum>),
    /// A proper list.
    List(Vec<Datum>),
    /// Hash table entries in host iteration order.
    Map(Vec<(Datum, Datum)>),
    /// A value of a registered user type.
    Custom(Custom),
}

impl Datum {
    /// An integer, using the fixnum form when it fits.
    pub fn int(i: impl Into<BigInt>) -> Self {
        let big = i.into();
        match i64::try_from(&big) {
            Ok(i) => Datum::Int(i),
            Err(_) => Datum::Big(big),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Datum::Nil)
    }

    /// Short name of the datum's shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Nil => "nil",
            Datum::Bool(_) => "boolean",
            Datum::Int(_) | Datum::Big(_) => "integer",
            Datum::Float(_) => "float",
            Datum::Str(_) => "string",
            Datum::Bytes(_) => "unibyte-string",
            Datum::Symbol(_) => "symbol",
            Datum::Time(_) => "time",
            Datum::Duration(_) => "duration",
            Datum::Seq(_) => "vector",
            Datum::List(_) => "list",
            Datum::Map(_) => "hash-table",
            Datum::Custom(c) => c.type_name(),
        }
    }

    pub(crate) fn mismatch(&self, predicate: &str) -> Error {
        Error::wrong_type(predicate, self)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(f: &mut fmt::Formatter<'_>, items: &[Datum]) -> fmt::Result {
            for (i, x) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{}", x)?;
            }
            Ok(())
        }
        match self {
            Datum::Nil | Datum::Bool(false) => f.write_str("nil"),
            Datum::Bool(true) => f.write_str("t"),
            Datum::Int(i) => write!(f, "{}", i),
            Datum::Big(i) => write!(f, "{}", i),
            Datum::Float(x) => write!(f, "{:?}", x),
            Datum::Str(s) => write!(f, "{:?}", s),
            Datum::Bytes(b) => write!(f, "{}", crate::codec::Bytes(b.clone())),
            Datum::Symbol(s) => f.write_str(s),
            Datum::Time(t) => write!(f, "{:?}", t),
            Datum::Duration(d) => write!(f, "{:?}", d),
            Datum::Seq(items) => {
                f.write_str("[")?;
                seq(f, items)?;
                f.write_str("]")
            }
            Datum::List(items) => {
                f.write_str("(")?;
                seq(f, items)?;
                f.write_str(")")
            }
            Datum::Map(entries) => {
                f.write_str("#s(hash-table data (")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                f.write_str("))")
            }
            Datum::Custom(c) => write!(f, "#<{}>", c.type_name()),
        }
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Bool(b)
    }
}

impl From<i64> for Datum {
    fn from(i: i64) -> Self {
        Datum::Int(i)
    }
}

impl From<f64> for Datum {
    fn from(x: f64) -> Self {
        Datum::Float(x)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::Str(s.to_string())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::Str(s)
    }
}

impl From<BigInt> for Datum {
    fn from(i: BigInt) -> Self {
        Datum::int(i)
    }
}

/// A shared value of a user type registered with the type registry.
#[derive(Clone)]
pub struct Custom {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Custom {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for Custom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Custom")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Custom values are equal only if they share the same allocation.
impl PartialEq for Custom {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl Encode for Datum {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        match self {
            Datum::Nil => env.nil(),
            Datum::Bool(b) => b.encode(env),
            Datum::Int(i) => env.make_int(*i),
            Datum::Big(i) => env.make_big_int(i),
            Datum::Float(x) => env.make_float(*x),
            Datum::Str(s) => env.make_string(s),
            Datum::Bytes(b) => env.make_unibyte_string(b),
            Datum::Symbol(s) => env.intern(s),
            Datum::Time(t) => t.encode(env),
            Datum::Duration(d) => d.encode(env),
            Datum::Seq(items) => items.encode(env),
            Datum::List(items) => {
                let mut elems = Vec::with_capacity(items.len());
                for x in items {
                    elems.push(x.encode(env)?);
                }
                env.list(&elems)
            }
            Datum::Map(entries) => encode_entries(env, &HashTest::Equal, entries),
            Datum::Custom(c) => Err(Error::UnsupportedType(c.type_name().to_string())),
        }
    }
}

/// Build a hash table with the given test from decoded entries.
pub(crate) fn encode_entries(
    env: &mut Env<'_>,
    test: &HashTest,
    entries: &[(Datum, Datum)],
) -> Result<Value> {
    let test = test.encode(env)?;
    let table = env.make_hash(test, entries.len())?;
    for (k, v) in entries {
        let k = k.encode(env)?;
        let v = v.encode(env)?;
        env.puthash(k, v, table)?;
    }
    Ok(table)
}

/// Decoding inspects the host type of the value.
impl Decode for Datum {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        if env.is_nil(value) {
            return Ok(Datum::Nil);
        }
        let kind = env.call("type-of", &[value])?;
        let kind = env.symbol_name(kind)?;
        match kind.as_str() {
            "integer" => env.big_int(value).map(Datum::int),
            "float" => env.float(value).map(Datum::Float),
            "string" => {
                let bytes = env.bytes(value)?;
                Ok(match String::from_utf8(bytes) {
                    Ok(s) => Datum::Str(s),
                    Err(e) => Datum::Bytes(e.into_bytes()),
                })
            }
            "symbol" | "boolean" => {
                let name = env.symbol_name(value)?;
                Ok(if name == "t" {
                    Datum::Bool(true)
                } else {
                    Datum::Symbol(name)
                })
            }
            "cons" => {
                let mut items = Vec::new();
                env.dolist(value, |env, elem| {
                    items.push(Datum::decode(env, elem)?);
                    Ok(())
                })?;
                Ok(Datum::List(items))
            }
            "vector" => Vec::<Datum>::decode(env, value).map(Datum::Seq),
            "hash-table" => {
                let feature = env.intern("map")?;
                env.call("require", &[feature])?;
                let pairs = env.call("map-pairs", &[value])?;
                let mut entries = Vec::new();
                env.dolist(pairs, |env, pair| {
                    let (k, v) = env.uncons(pair)?;
                    entries.push((Datum::decode(env, k)?, Datum::decode(env, v)?));
                    Ok(())
                })?;
                Ok(Datum::Map(entries))
            }
            other => Err(Error::wrong_type("datap", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_prefers_fixnum() {
        assert_eq!(Datum::int(42i64), Datum::Int(42));
        assert_eq!(Datum::int(u64::MAX), Datum::Big(BigInt::from(u64::MAX)));
    }

    #[test]
    fn test_display() {
        let d = Datum::List(vec![
            Datum::Int(1),
            Datum::Seq(vec![Datum::Str("a".into()), Datum::Nil]),
            Datum::Symbol("foo".into()),
        ]);
        assert_eq!(d.to_string(), "(1 [\"a\" nil] foo)");
    }

    #[test]
    fn test_custom_identity() {
        let a = Custom::new(5u8);
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Custom::new(5u8));
        assert_eq!(a.downcast_ref::<u8>(), Some(&5));
        assert!(a.downcast_ref::<u16>().is_none());
    }
}
