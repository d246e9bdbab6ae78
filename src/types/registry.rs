//! Type Registry
//!
//! Resolves a [`TypeDesc`] to a [`Codec`] once, ahead of any call.
//!
//! Resolution order:
//! 1. user types registered with [`TypeRegistry::register_type`] or
//!    [`TypeRegistry::register_codec`]
//! 2. aliases of other descriptors
//! 3. the codecs of types that convert themselves, supplied by the caller
//! 4. structural resolution of sequences, lists, options and maps, built
//!    from element codecs
//! 5. fixed scalar codecs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use num_bigint::BigInt;

use super::{Custom, Datum, NativeType, TypeDesc};
use crate::codec::{Decode, Encode, HashTest, Name};
use crate::error::{ConversionError, Error, Result};
use crate::host::{Env, Value};

/// Host to datum conversion.
pub type DecodeFn = Arc<dyn Fn(&mut Env<'_>, Value) -> Result<Datum> + Send + Sync>;

/// Datum to host conversion.
pub type EncodeFn = Arc<dyn Fn(&mut Env<'_>, Datum) -> Result<Value> + Send + Sync>;

/// Alias chains longer than this are treated as cycles.
const MAX_ALIAS_DEPTH: usize = 16;

/// Box a closure as an [`EncodeFn`].
pub fn encoder<F>(f: F) -> EncodeFn
where
    F: Fn(&mut Env<'_>, Datum) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as a [`DecodeFn`].
pub fn decoder<F>(f: F) -> DecodeFn
where
    F: Fn(&mut Env<'_>, Value) -> Result<Datum> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A resolved pair of conversion functions for one type.
#[derive(Clone)]
pub struct Codec {
    desc: TypeDesc,
    encode: Option<EncodeFn>,
    decode: Option<DecodeFn>,
}

impl Codec {
    pub fn new(desc: TypeDesc, encode: Option<EncodeFn>, decode: Option<DecodeFn>) -> Self {
        Self {
            desc,
            encode,
            decode,
        }
    }

    fn both(desc: TypeDesc, encode: EncodeFn, decode: DecodeFn) -> Self {
        Self::new(desc, Some(encode), Some(decode))
    }

    /// The codec of a user type that converts itself, carried as a
    /// [`Custom`] datum.
    pub fn custom<T>() -> Self
    where
        T: NativeType + Encode + Decode + Clone + Send + Sync,
    {
        let desc = T::type_desc();
        let type_name = desc.to_string();
        let encode = encoder(move |env, datum| match &datum {
            Datum::Custom(c) => match c.downcast_ref::<T>() {
                Some(v) => v.encode(env),
                None => Err(Error::wrong_type(&type_name, &datum)),
            },
            _ => Err(Error::wrong_type(&type_name, &datum)),
        });
        let decode = decoder(|env, value| {
            let v = T::decode(env, value)?;
            Ok(Datum::Custom(Custom::new(v)))
        });
        Self::both(desc, encode, decode)
    }

    /// The codec of raw values. Raw values never pass through a datum, so
    /// both directions are absent.
    pub(crate) fn passthrough() -> Self {
        Self::new(TypeDesc::Value, None, None)
    }

    pub fn desc(&self) -> &TypeDesc {
        &self.desc
    }

    pub fn can_encode(&self) -> bool {
        self.encode.is_some()
    }

    pub fn can_decode(&self) -> bool {
        self.decode.is_some()
    }

    pub fn decode(&self, env: &mut Env<'_>, value: Value) -> Result<Datum> {
        match &self.decode {
            Some(f) => f(env, value),
            None => Err(Error::UnsupportedType(format!("decoding {}", self.desc))),
        }
    }

    pub fn encode(&self, env: &mut Env<'_>, datum: Datum) -> Result<Value> {
        match &self.encode {
            Some(f) => f(env, datum),
            None => Err(Error::UnsupportedType(format!("encoding {}", self.desc))),
        }
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("desc", &self.desc)
            .field("encode", &self.encode.is_some())
            .field("decode", &self.decode.is_some())
            .finish()
    }
}

/// Registry of codecs for user types, aliases and hash table tests.
#[derive(Default)]
pub struct TypeRegistry {
    custom: HashMap<String, Codec>,
    aliases: HashMap<String, TypeDesc>,
    hash_tests: HashMap<TypeDesc, HashTest>,
    consistent_tests: HashSet<Name>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a user type that converts itself.
    ///
    /// `T::type_desc()` must be a named descriptor, as produced by
    /// [`native_type!`](crate::native_type).
    pub fn register_type<T>(&mut self) -> Result<()>
    where
        T: NativeType + Encode + Decode + Clone + Send + Sync,
    {
        let desc = T::type_desc();
        let name = match &desc {
            TypeDesc::Named(n) => n.clone(),
            other => return Err(Error::UnsupportedType(format!("{} is not a named type", other))),
        };
        self.custom.insert(name, Codec::custom::<T>());
        Ok(())
    }

    /// Register explicit conversion functions for a named type.
    pub fn register_codec(
        &mut self,
        name: impl Into<String>,
        encode: Option<EncodeFn>,
        decode: Option<DecodeFn>,
    ) {
        let name = name.into();
        let codec = Codec::new(TypeDesc::Named(name.clone()), encode, decode);
        self.custom.insert(name, codec);
    }

    /// Make the named type an alias of `target`.
    pub fn alias(&mut self, name: impl Into<String>, target: TypeDesc) {
        self.aliases.insert(name.into(), target);
    }

    /// Record that a custom hash test has both an equality and a hash
    /// function.
    pub fn register_hash_test(&mut self, name: Name) {
        self.consistent_tests.insert(name);
    }

    /// Use `test` for hash tables keyed by `key`.
    ///
    /// Custom tests are only accepted once registered with
    /// [`register_hash_test`](Self::register_hash_test).
    pub fn set_hash_test(&mut self, key: TypeDesc, test: HashTest) -> Result<()> {
        if let HashTest::Custom(name) = &test {
            if !self.consistent_tests.contains(name) {
                return Err(Error::UnsupportedType(format!(
                    "hash test {} without a consistent hash function",
                    name
                )));
            }
        }
        self.hash_tests.insert(key, test);
        Ok(())
    }

    /// The hash table test for keys of type `key`.
    pub fn hash_test_for(&self, key: &TypeDesc) -> HashTest {
        if let Some(test) = self.hash_tests.get(key) {
            return test.clone();
        }
        match key {
            TypeDesc::Bool | TypeDesc::Int { .. } | TypeDesc::Symbol | TypeDesc::Value => {
                HashTest::Eq
            }
            TypeDesc::Float { .. } | TypeDesc::BigInt => HashTest::Eql,
            _ => HashTest::Equal,
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolve the codec for `desc`.
    pub fn resolve(&self, desc: &TypeDesc) -> Result<Codec> {
        self.resolve_with(desc, &[])
    }

    /// Resolve the codec for `desc`, falling back to `own` for named types
    /// the registry does not know.
    pub fn resolve_with(&self, desc: &TypeDesc, own: &[Codec]) -> Result<Codec> {
        if desc.nests_value() {
            return Err(Error::UnsupportedType(format!(
                "{} (raw values are only supported at the top level)",
                desc
            )));
        }
        self.resolve_depth(desc, own, 0)
    }

    fn resolve_depth(&self, desc: &TypeDesc, own: &[Codec], depth: usize) -> Result<Codec> {
        match desc {
            TypeDesc::Named(name) => {
                if let Some(codec) = self.custom.get(name) {
                    return Ok(codec.clone());
                }
                match self.aliases.get(name) {
                    Some(_) if depth >= MAX_ALIAS_DEPTH => {
                        Err(Error::UnsupportedType(format!("{} (alias cycle)", name)))
                    }
                    Some(target) => self.resolve_depth(target, own, depth + 1),
                    None => own
                        .iter()
                        .find(|c| c.desc() == desc)
                        .cloned()
                        .ok_or_else(|| Error::UnsupportedType(name.clone())),
                }
            }
            TypeDesc::Seq(elem) => Ok(seq_codec(desc, self.resolve_depth(elem, own, depth)?)),
            TypeDesc::List(elem) => Ok(list_codec(desc, self.resolve_depth(elem, own, depth)?)),
            TypeDesc::Option(inner) => {
                Ok(option_codec(desc, self.resolve_depth(inner, own, depth)?))
            }
            TypeDesc::Map(key, value) => {
                let test = self.hash_test_for(key);
                let key = self.resolve_depth(key, own, depth)?;
                let value = self.resolve_depth(value, own, depth)?;
                Ok(map_codec(desc, test, key, value))
            }
            TypeDesc::Value => Ok(Codec::passthrough()),
            scalar => Ok(scalar_codec(scalar)),
        }
    }
}

// ============================================================================
// Structural codecs
// ============================================================================

fn encode_items(env: &mut Env<'_>, elem: &Codec, items: Vec<Datum>) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        values.push(elem.encode(env, item)?);
    }
    Ok(values)
}

fn sequence_items(datum: Datum) -> Result<Vec<Datum>> {
    match datum {
        Datum::Seq(items) | Datum::List(items) => Ok(items),
        Datum::Nil => Ok(Vec::new()),
        other => Err(other.mismatch("sequencep")),
    }
}

fn seq_codec(desc: &TypeDesc, elem: Codec) -> Codec {
    let enc = elem.clone();
    let encode = encoder(move |env, datum| {
        let values = encode_items(env, &enc, sequence_items(datum)?)?;
        env.make_vector(&values)
    });
    let decode = decoder(move |env, value| {
        let n = env.vec_size(value)?;
        let mut items = Vec::with_capacity(n);
        for i in 0..n {
            let v = env.vec_get(value, i)?;
            items.push(elem.decode(env, v)?);
        }
        Ok(Datum::Seq(items))
    });
    Codec::both(desc.clone(), encode, decode)
}

fn list_codec(desc: &TypeDesc, elem: Codec) -> Codec {
    let enc = elem.clone();
    let encode = encoder(move |env, datum| {
        let values = encode_items(env, &enc, sequence_items(datum)?)?;
        env.list(&values)
    });
    let decode = decoder(move |env, value| {
        let mut items = Vec::new();
        env.dolist(value, |env, v| {
            items.push(elem.decode(env, v)?);
            Ok(())
        })?;
        Ok(Datum::List(items))
    });
    Codec::both(desc.clone(), encode, decode)
}

fn option_codec(desc: &TypeDesc, inner: Codec) -> Codec {
    let enc = inner.clone();
    let encode = encoder(move |env, datum| match datum {
        Datum::Nil => env.nil(),
        d => enc.encode(env, d),
    });
    let decode = decoder(move |env, value| {
        if env.is_nil(value) {
            Ok(Datum::Nil)
        } else {
            inner.decode(env, value)
        }
    });
    Codec::both(desc.clone(), encode, decode)
}

fn map_codec(desc: &TypeDesc, test: HashTest, key: Codec, value: Codec) -> Codec {
    let (enc_key, enc_value) = (key.clone(), value.clone());
    let encode = encoder(move |env, datum| {
        let entries = match datum {
            Datum::Map(entries) => entries,
            Datum::Nil => Vec::new(),
            other => return Err(other.mismatch("hash-table-p")),
        };
        let mut encoded = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            encoded.push((enc_key.encode(env, k)?, enc_value.encode(env, v)?));
        }
        let test_sym = test.encode(env)?;
        let table = env.make_hash(test_sym, encoded.len())?;
        for (k, v) in encoded {
            env.puthash(k, v, table)?;
        }
        Ok(table)
    });
    let decode = decoder(move |env, table| {
        let feature = env.intern("map")?;
        env.call("require", &[feature])?;
        let pairs = env.call("map-pairs", &[table])?;
        let mut entries = Vec::new();
        env.dolist(pairs, |env, pair| {
            let (k, v) = env.uncons(pair)?;
            entries.push((key.decode(env, k)?, value.decode(env, v)?));
            Ok(())
        })?;
        Ok(Datum::Map(entries))
    });
    Codec::both(desc.clone(), encode, decode)
}

// ============================================================================
// Scalar codecs
// ============================================================================

/// Inclusive bounds of an integer type.
fn int_bounds(bits: u8, signed: bool) -> (BigInt, BigInt) {
    let one = BigInt::from(1);
    if signed {
        let half: BigInt = &one << (usize::from(bits) - 1);
        (-half.clone(), half - one)
    } else {
        let full: BigInt = &one << usize::from(bits);
        (BigInt::from(0), full - one)
    }
}

fn check_int(i: BigInt, bits: u8, signed: bool) -> Result<BigInt> {
    let (min, max) = int_bounds(bits, signed);
    if i < min || i > max {
        return Err(Error::overflow(&i));
    }
    Ok(i)
}

fn scalar_codec(desc: &TypeDesc) -> Codec {
    let (encode, decode) = match *desc {
        TypeDesc::Bool => (
            encoder(|env, datum| match datum {
                Datum::Bool(b) => b.encode(env),
                Datum::Nil => env.nil(),
                other => Err(other.mismatch("booleanp")),
            }),
            decoder(|env, value| Ok(Datum::Bool(env.is_not_nil(value)))),
        ),
        TypeDesc::Int { bits, signed } => (
            encoder(move |env, datum| match datum {
                Datum::Int(i) => {
                    check_int(BigInt::from(i), bits, signed)?;
                    env.make_int(i)
                }
                Datum::Big(i) => {
                    let i = check_int(i, bits, signed)?;
                    match i64::try_from(&i) {
                        Ok(small) => env.make_int(small),
                        Err(_) => env.make_big_int(&i),
                    }
                }
                other => Err(other.mismatch("integerp")),
            }),
            decoder(move |env, value| {
                let i = env.big_int(value)?;
                check_int(i, bits, signed).map(Datum::int)
            }),
        ),
        TypeDesc::BigInt => (
            encoder(|env, datum| match datum {
                Datum::Int(i) => env.make_int(i),
                Datum::Big(i) => env.make_big_int(&i),
                other => Err(other.mismatch("integerp")),
            }),
            decoder(|env, value| env.big_int(value).map(Datum::int)),
        ),
        TypeDesc::Float { bits } => (
            encoder(|env, datum| match datum {
                Datum::Float(x) => env.make_float(x),
                other => Err(other.mismatch("floatp")),
            }),
            decoder(move |env, value| {
                let x = env.float(value)?;
                if bits == 32 && x.is_finite() && x.abs() > f64::from(f32::MAX) {
                    return Err(Error::overflow(x));
                }
                Ok(Datum::Float(x))
            }),
        ),
        TypeDesc::String => (
            encoder(|env, datum| match datum {
                Datum::Str(s) => env.make_string(&s),
                Datum::Bytes(b) => {
                    let s = String::from_utf8(b).map_err(|_| ConversionError::InvalidUtf8)?;
                    env.make_string(&s)
                }
                other => Err(other.mismatch("stringp")),
            }),
            decoder(|env, value| env.str(value).map(Datum::Str)),
        ),
        TypeDesc::Bytes => (
            encoder(|env, datum| match datum {
                Datum::Bytes(b) => env.make_unibyte_string(&b),
                Datum::Str(s) => env.make_unibyte_string(s.as_bytes()),
                other => Err(other.mismatch("stringp")),
            }),
            decoder(|env, value| env.bytes(value).map(Datum::Bytes)),
        ),
        TypeDesc::Time => (
            encoder(|env, datum| match datum {
                Datum::Time(t) => t.encode(env),
                other => Err(other.mismatch("timep")),
            }),
            decoder(|env, value| SystemTime::decode(env, value).map(Datum::Time)),
        ),
        TypeDesc::Duration => (
            encoder(|env, datum| match datum {
                Datum::Duration(d) => d.encode(env),
                other => Err(other.mismatch("timep")),
            }),
            decoder(|env, value| Duration::decode(env, value).map(Datum::Duration)),
        ),
        TypeDesc::Symbol => (
            encoder(|env, datum| match datum {
                Datum::Symbol(s) => env.intern(&s),
                Datum::Nil => env.nil(),
                Datum::Bool(true) => env.t(),
                other => Err(other.mismatch("symbolp")),
            }),
            decoder(|env, value| env.symbol_name(value).map(Datum::Symbol)),
        ),
        TypeDesc::Unit => (
            encoder(|env, _datum| env.nil()),
            decoder(|_env, _value| Ok(Datum::Nil)),
        ),
        _ => (
            encoder(|env, datum| datum.encode(env)),
            decoder(|env, value| Datum::decode(env, value)),
        ),
    };
    Codec::both(desc.clone(), encode, decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Celsius(f64);

    impl Encode for Celsius {
        fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
            env.make_float(self.0)
        }
    }

    impl Decode for Celsius {
        fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
            env.float(value).map(Celsius)
        }
    }

    crate::native_type!(Celsius);

    #[test]
    fn test_unknown_named_type_is_unsupported() {
        let registry = TypeRegistry::new();
        let err = registry.resolve(&TypeDesc::named("Celsius")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(ref n) if n == "Celsius"));
    }

    #[test]
    fn test_registered_type_resolves() {
        let mut registry = TypeRegistry::new();
        registry.register_type::<Celsius>().unwrap();
        let codec = registry.resolve(&TypeDesc::seq(TypeDesc::named("Celsius"))).unwrap();
        assert!(codec.can_encode() && codec.can_decode());
    }

    #[test]
    fn test_own_codec_used_when_unregistered() {
        let registry = TypeRegistry::new();
        let mut own = Vec::new();
        <Vec<Celsius> as NativeType>::own_codecs(&mut own);
        assert_eq!(own.len(), 1);
        let codec = registry
            .resolve_with(&TypeDesc::option(TypeDesc::named("Celsius")), &own)
            .unwrap();
        assert!(codec.can_encode() && codec.can_decode());
        assert!(registry.resolve_with(&TypeDesc::named("Kelvin"), &own).is_err());
    }

    #[test]
    fn test_alias_resolution_and_cycles() {
        let mut registry = TypeRegistry::new();
        registry.alias("Meters", TypeDesc::Float { bits: 64 });
        let codec = registry.resolve(&TypeDesc::named("Meters")).unwrap();
        assert_eq!(codec.desc(), &TypeDesc::Float { bits: 64 });

        registry.alias("A", TypeDesc::named("B"));
        registry.alias("B", TypeDesc::named("A"));
        assert!(registry.resolve(&TypeDesc::named("A")).is_err());
    }

    #[test]
    fn test_nested_raw_values_rejected() {
        let registry = TypeRegistry::new();
        assert!(registry.resolve(&TypeDesc::Value).is_ok());
        assert!(registry.resolve(&TypeDesc::seq(TypeDesc::Value)).is_err());
    }

    #[test]
    fn test_hash_test_selection() {
        let mut registry = TypeRegistry::new();
        assert_eq!(registry.hash_test_for(&TypeDesc::int(64, true)), HashTest::Eq);
        assert_eq!(registry.hash_test_for(&TypeDesc::Bool), HashTest::Eq);
        assert_eq!(registry.hash_test_for(&TypeDesc::Float { bits: 64 }), HashTest::Eql);
        assert_eq!(registry.hash_test_for(&TypeDesc::String), HashTest::Equal);

        let custom = HashTest::Custom(Name::new("case-fold"));
        assert!(registry.set_hash_test(TypeDesc::String, custom.clone()).is_err());
        registry.register_hash_test(Name::new("case-fold"));
        registry.set_hash_test(TypeDesc::String, custom.clone()).unwrap();
        assert_eq!(registry.hash_test_for(&TypeDesc::String), custom);
    }

    #[test]
    fn test_int_bounds() {
        assert_eq!(int_bounds(8, true), (BigInt::from(-128), BigInt::from(127)));
        assert_eq!(int_bounds(8, false), (BigInt::from(0), BigInt::from(255)));
        assert!(check_int(BigInt::from(u64::MAX), 64, true).is_err());
        assert!(check_int(BigInt::from(u64::MAX), 64, false).is_ok());
    }
}
