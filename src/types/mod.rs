//! Type Descriptors and Native Types
//!
//! Runtime descriptions of native types and the conversions between native
//! values and [`Datum`].
//!
//! # Architecture
//!
//! ```text
//! fn(i64, String) -> Vec<f64>          (native closure)
//!       │  NativeType::type_desc()
//!       ▼
//! Signature { params: [i64, string], ret: vec<f64> }
//!       │  TypeRegistry::resolve()
//!       ▼
//! CallableRecord { arity, doc, func: pre-resolved adapter }
//! ```
//!
//! Resolution happens once, when a function is exported. A type without a
//! codec is rejected at that point, before the function is reachable from the
//! host.

mod auto;
mod datum;
mod import;
mod registry;

pub use auto::{func, AutoFunc, CallableRecord, Func, IntoNative, NativeReturn, Signature};
pub use datum::{Custom, Datum};
pub use import::Imported;
pub use registry::{decoder, encoder, Codec, DecodeFn, EncodeFn, TypeRegistry};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::time::{Duration, SystemTime};

use num_bigint::BigInt;

use crate::codec::{Bytes, List, Name, Symbol};
use crate::error::{ConversionError, Error, Result};
use crate::host::{Env, Value};

/// A runtime description of a native type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    /// A raw host value, passed through unchanged.
    Value,
    Bool,
    Int { bits: u8, signed: bool },
    Float { bits: u8 },
    String,
    Bytes,
    BigInt,
    Time,
    Duration,
    Symbol,
    /// `()`, encoded as nil.
    Unit,
    /// Any host value, decoded by inspecting its type.
    Dynamic,
    Option(Box<TypeDesc>),
    /// A host vector.
    Seq(Box<TypeDesc>),
    /// A proper list.
    List(Box<TypeDesc>),
    Map(Box<TypeDesc>, Box<TypeDesc>),
    /// A user type or alias registered by name.
    Named(String),
}

impl TypeDesc {
    pub fn int(bits: u8, signed: bool) -> Self {
        TypeDesc::Int { bits, signed }
    }

    pub fn seq(elem: TypeDesc) -> Self {
        TypeDesc::Seq(Box::new(elem))
    }

    pub fn list(elem: TypeDesc) -> Self {
        TypeDesc::List(Box::new(elem))
    }

    pub fn option(inner: TypeDesc) -> Self {
        TypeDesc::Option(Box::new(inner))
    }

    pub fn map(key: TypeDesc, value: TypeDesc) -> Self {
        TypeDesc::Map(Box::new(key), Box::new(value))
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeDesc::Named(name.into())
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, TypeDesc::Int { .. } | TypeDesc::BigInt)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeDesc::Float { .. })
    }

    /// Whether `Value` appears anywhere below the top level.
    pub fn nests_value(&self) -> bool {
        match self {
            TypeDesc::Option(t) | TypeDesc::Seq(t) | TypeDesc::List(t) => t.is_value_like(),
            TypeDesc::Map(k, v) => k.is_value_like() || v.is_value_like(),
            _ => false,
        }
    }

    fn is_value_like(&self) -> bool {
        matches!(self, TypeDesc::Value) || self.nests_value()
    }

    /// Parse from a string representation such as `vec<i64>` or
    /// `map<string, f64>`.
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(open) = s.find('<') {
            let head = s[..open].trim().to_lowercase();
            let inner = s[open + 1..].strip_suffix('>')?;
            return match head.as_str() {
                "option" => Some(TypeDesc::option(TypeDesc::from_str(inner)?)),
                "vec" | "vector" => Some(TypeDesc::seq(TypeDesc::from_str(inner)?)),
                "list" => Some(TypeDesc::list(TypeDesc::from_str(inner)?)),
                "map" | "hash" => {
                    let comma = split_top_level(inner)?;
                    let key = TypeDesc::from_str(&inner[..comma])?;
                    let value = TypeDesc::from_str(&inner[comma + 1..])?;
                    Some(TypeDesc::map(key, value))
                }
                _ => None,
            };
        }
        let desc = match s.to_lowercase().as_str() {
            "value" => TypeDesc::Value,
            "bool" | "boolean" => TypeDesc::Bool,
            "i8" => TypeDesc::int(8, true),
            "i16" => TypeDesc::int(16, true),
            "i32" => TypeDesc::int(32, true),
            "i64" | "int" | "integer" => TypeDesc::int(64, true),
            "i128" => TypeDesc::int(128, true),
            "u8" | "byte" => TypeDesc::int(8, false),
            "u16" => TypeDesc::int(16, false),
            "u32" => TypeDesc::int(32, false),
            "u64" => TypeDesc::int(64, false),
            "u128" => TypeDesc::int(128, false),
            "f32" => TypeDesc::Float { bits: 32 },
            "f64" | "float" => TypeDesc::Float { bits: 64 },
            "string" | "str" => TypeDesc::String,
            "bytes" => TypeDesc::Bytes,
            "bigint" => TypeDesc::BigInt,
            "time" => TypeDesc::Time,
            "duration" => TypeDesc::Duration,
            "symbol" => TypeDesc::Symbol,
            "unit" | "()" | "nil" => TypeDesc::Unit,
            "dynamic" | "any" => TypeDesc::Dynamic,
            _ if !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == ':') => {
                TypeDesc::named(s)
            }
            _ => return None,
        };
        Some(desc)
    }
}

/// Index of the comma separating two type arguments, ignoring nested ones.
fn split_top_level(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Value => write!(f, "value"),
            TypeDesc::Bool => write!(f, "bool"),
            TypeDesc::Int { bits, signed } => write!(f, "{}{}", if *signed { "i" } else { "u" }, bits),
            TypeDesc::Float { bits } => write!(f, "f{}", bits),
            TypeDesc::String => write!(f, "string"),
            TypeDesc::Bytes => write!(f, "bytes"),
            TypeDesc::BigInt => write!(f, "bigint"),
            TypeDesc::Time => write!(f, "time"),
            TypeDesc::Duration => write!(f, "duration"),
            TypeDesc::Symbol => write!(f, "symbol"),
            TypeDesc::Unit => write!(f, "unit"),
            TypeDesc::Dynamic => write!(f, "dynamic"),
            TypeDesc::Option(t) => write!(f, "option<{}>", t),
            TypeDesc::Seq(t) => write!(f, "vec<{}>", t),
            TypeDesc::List(t) => write!(f, "list<{}>", t),
            TypeDesc::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            TypeDesc::Named(n) => write!(f, "{}", n),
        }
    }
}

/// A native type that can cross the boundary through the type registry.
///
/// Conversions go through [`Datum`]; the registry's codec for
/// `type_desc()` produces and consumes the datum.
pub trait NativeType: Sized + 'static {
    fn type_desc() -> TypeDesc;

    fn from_datum(datum: Datum) -> Result<Self>;

    fn into_datum(self) -> Datum;

    /// Push the codecs of named types that convert themselves, including
    /// those nested inside this type. Resolution falls back to these when
    /// the registry has no entry for the name.
    fn own_codecs(_out: &mut Vec<Codec>) {}

    /// Decode an argument with its resolved codec.
    fn from_arg(env: &mut Env<'_>, value: Value, codec: &Codec) -> Result<Self> {
        let datum = codec.decode(env, value)?;
        Self::from_datum(datum)
    }

    /// Encode a return value with its resolved codec.
    fn into_ret(self, env: &mut Env<'_>, codec: &Codec) -> Result<Value> {
        codec.encode(env, self.into_datum())
    }
}

/// A trailing parameter that collects all remaining arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rest<T>(pub Vec<T>);

impl<T> std::ops::Deref for Rest<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

/// Raw host values bypass the datum form; only valid at the top level of a
/// signature.
impl NativeType for Value {
    fn type_desc() -> TypeDesc {
        TypeDesc::Value
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        Err(Error::UnsupportedType(format!("value from {}", datum.kind())))
    }

    fn into_datum(self) -> Datum {
        Datum::Nil
    }

    fn from_arg(_env: &mut Env<'_>, value: Value, _codec: &Codec) -> Result<Self> {
        Ok(value)
    }

    fn into_ret(self, _env: &mut Env<'_>, _codec: &Codec) -> Result<Value> {
        Ok(self)
    }
}

impl NativeType for Datum {
    fn type_desc() -> TypeDesc {
        TypeDesc::Dynamic
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        Ok(datum)
    }

    fn into_datum(self) -> Datum {
        self
    }
}

impl NativeType for () {
    fn type_desc() -> TypeDesc {
        TypeDesc::Unit
    }

    fn from_datum(_datum: Datum) -> Result<Self> {
        Ok(())
    }

    fn into_datum(self) -> Datum {
        Datum::Nil
    }
}

impl NativeType for bool {
    fn type_desc() -> TypeDesc {
        TypeDesc::Bool
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Bool(b) => Ok(b),
            Datum::Nil => Ok(false),
            _ => Ok(true),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::Bool(self)
    }
}

fn integer_from_datum<T>(datum: Datum) -> Result<T>
where
    T: TryFrom<i64> + for<'a> TryFrom<&'a BigInt>,
{
    match datum {
        Datum::Int(i) => T::try_from(i).map_err(|_| Error::overflow(i)),
        Datum::Big(ref i) => T::try_from(i).map_err(|_| Error::overflow(i)),
        other => Err(other.mismatch("integerp")),
    }
}

macro_rules! impl_native_int {
    ($($t:ty => $bits:expr, $signed:expr);* $(;)?) => {
        $(
            impl NativeType for $t {
                fn type_desc() -> TypeDesc {
                    TypeDesc::int($bits, $signed)
                }

                fn from_datum(datum: Datum) -> Result<Self> {
                    integer_from_datum(datum)
                }

                fn into_datum(self) -> Datum {
                    Datum::int(self)
                }
            }
        )*
    };
}

impl_native_int! {
    i8 => 8, true;
    i16 => 16, true;
    i32 => 32, true;
    i64 => 64, true;
    i128 => 128, true;
    isize => 64, true;
    u8 => 8, false;
    u16 => 16, false;
    u32 => 32, false;
    u64 => 64, false;
    u128 => 128, false;
    usize => 64, false;
}

impl NativeType for BigInt {
    fn type_desc() -> TypeDesc {
        TypeDesc::BigInt
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Int(i) => Ok(BigInt::from(i)),
            Datum::Big(i) => Ok(i),
            other => Err(other.mismatch("integerp")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::int(self)
    }
}

impl NativeType for f64 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Float { bits: 64 }
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Float(x) => Ok(x),
            other => Err(other.mismatch("floatp")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::Float(self)
    }
}

impl NativeType for f32 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Float { bits: 32 }
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        let x = f64::from_datum(datum)?;
        if x.is_finite() && x.abs() > f64::from(f32::MAX) {
            return Err(Error::overflow(x));
        }
        Ok(x as f32)
    }

    fn into_datum(self) -> Datum {
        Datum::Float(f64::from(self))
    }
}

impl NativeType for String {
    fn type_desc() -> TypeDesc {
        TypeDesc::String
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Str(s) => Ok(s),
            Datum::Bytes(b) => String::from_utf8(b).map_err(|_| ConversionError::InvalidUtf8.into()),
            other => Err(other.mismatch("stringp")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::Str(self)
    }
}

impl NativeType for Bytes {
    fn type_desc() -> TypeDesc {
        TypeDesc::Bytes
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Bytes(b) => Ok(Bytes(b)),
            Datum::Str(s) => Ok(Bytes(s.into_bytes())),
            other => Err(other.mismatch("stringp")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::Bytes(self.0)
    }
}

impl NativeType for Symbol {
    fn type_desc() -> TypeDesc {
        TypeDesc::Symbol
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Symbol(s) => Ok(Symbol(s)),
            Datum::Nil => Ok(Symbol("nil".into())),
            Datum::Bool(true) => Ok(Symbol("t".into())),
            other => Err(other.mismatch("symbolp")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::Symbol(self.0)
    }
}

impl NativeType for Name {
    fn type_desc() -> TypeDesc {
        TypeDesc::Symbol
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        Symbol::from_datum(datum).map(|s| Name::new(s.0))
    }

    fn into_datum(self) -> Datum {
        Datum::Symbol(self.as_str().to_string())
    }
}

impl NativeType for SystemTime {
    fn type_desc() -> TypeDesc {
        TypeDesc::Time
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Time(t) => Ok(t),
            other => Err(other.mismatch("timep")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::Time(self)
    }
}

impl NativeType for Duration {
    fn type_desc() -> TypeDesc {
        TypeDesc::Duration
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Duration(d) => Ok(d),
            other => Err(other.mismatch("timep")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::Duration(self)
    }
}

impl<T: NativeType> NativeType for Option<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::option(T::type_desc())
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        T::own_codecs(out)
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Nil => Ok(None),
            d => T::from_datum(d).map(Some),
        }
    }

    fn into_datum(self) -> Datum {
        match self {
            Some(v) => v.into_datum(),
            None => Datum::Nil,
        }
    }
}

fn items_from_datum<T: NativeType>(items: Vec<Datum>) -> Result<Vec<T>> {
    items.into_iter().map(T::from_datum).collect()
}

impl<T: NativeType> NativeType for Vec<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::seq(T::type_desc())
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        T::own_codecs(out)
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Seq(items) | Datum::List(items) => items_from_datum(items),
            Datum::Nil => Ok(Vec::new()),
            other => Err(other.mismatch("sequencep")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::Seq(self.into_iter().map(T::into_datum).collect())
    }
}

impl<T: NativeType> NativeType for List<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::list(T::type_desc())
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        T::own_codecs(out)
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::List(items) | Datum::Seq(items) => items_from_datum(items).map(List),
            Datum::Nil => Ok(List(Vec::new())),
            other => Err(other.mismatch("listp")),
        }
    }

    fn into_datum(self) -> Datum {
        Datum::List(self.0.into_iter().map(T::into_datum).collect())
    }
}

fn entries_from_datum(datum: Datum) -> Result<Vec<(Datum, Datum)>> {
    match datum {
        Datum::Map(entries) => Ok(entries),
        Datum::Nil => Ok(Vec::new()),
        other => Err(other.mismatch("hash-table-p")),
    }
}

impl<K, V, S> NativeType for HashMap<K, V, S>
where
    K: NativeType + Eq + Hash + fmt::Debug,
    V: NativeType,
    S: BuildHasher + Default + 'static,
{
    fn type_desc() -> TypeDesc {
        TypeDesc::map(K::type_desc(), V::type_desc())
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        K::own_codecs(out);
        V::own_codecs(out);
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        let mut m = HashMap::default();
        for (k, v) in entries_from_datum(datum)? {
            let k = K::from_datum(k)?;
            if m.contains_key(&k) {
                return Err(ConversionError::DuplicateKey(format!("{:?}", k)).into());
            }
            let v = V::from_datum(v)?;
            m.insert(k, v);
        }
        Ok(m)
    }

    fn into_datum(self) -> Datum {
        Datum::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_datum(), v.into_datum()))
                .collect(),
        )
    }
}

impl<K, V> NativeType for BTreeMap<K, V>
where
    K: NativeType + Ord + fmt::Debug,
    V: NativeType,
{
    fn type_desc() -> TypeDesc {
        TypeDesc::map(K::type_desc(), V::type_desc())
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        K::own_codecs(out);
        V::own_codecs(out);
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        let mut m = BTreeMap::new();
        for (k, v) in entries_from_datum(datum)? {
            let k = K::from_datum(k)?;
            if m.contains_key(&k) {
                return Err(ConversionError::DuplicateKey(format!("{:?}", k)).into());
            }
            let v = V::from_datum(v)?;
            m.insert(k, v);
        }
        Ok(m)
    }

    fn into_datum(self) -> Datum {
        Datum::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_datum(), v.into_datum()))
                .collect(),
        )
    }
}

/// Implement [`NativeType`] for a user type carried as a [`Custom`] datum.
///
/// `native_type!(T)` converts through the type's own [`Encode`] and
/// [`Decode`] impls, so `T` can be exported without registering it. A codec
/// registered under the same name takes precedence.
///
/// `native_type!(opaque T)` is for types without those impls; they need a
/// codec from [`TypeRegistry::register_codec`] before any export uses them.
///
/// [`Encode`]: crate::codec::Encode
/// [`Decode`]: crate::codec::Decode
#[macro_export]
macro_rules! native_type {
    (@impl $t:ty, { $($own:tt)* }) => {
        impl $crate::types::NativeType for $t {
            fn type_desc() -> $crate::types::TypeDesc {
                $crate::types::TypeDesc::named(stringify!($t))
            }

            fn from_datum(datum: $crate::types::Datum) -> $crate::Result<Self> {
                match datum {
                    $crate::types::Datum::Custom(ref c) => c
                        .downcast_ref::<$t>()
                        .cloned()
                        .ok_or_else(|| $crate::Error::wrong_type(stringify!($t), &datum)),
                    other => Err($crate::Error::wrong_type(stringify!($t), other)),
                }
            }

            fn into_datum(self) -> $crate::types::Datum {
                $crate::types::Datum::Custom($crate::types::Custom::new(self))
            }

            $($own)*
        }

        $crate::native_return!($t);
    };
    (opaque $t:ty) => {
        $crate::native_type!(@impl $t, {});
    };
    ($t:ty) => {
        $crate::native_type!(@impl $t, {
            fn own_codecs(out: &mut ::std::vec::Vec<$crate::types::Codec>) {
                out.push($crate::types::Codec::custom::<$t>());
            }
        });
    };
}
