//! Automatic calling adapters.
//!
//! Turns a typed native closure into a uniform [`Func`] that decodes host
//! arguments, calls the closure, and encodes the result. Every codec is
//! resolved when the adapter is built; an unsupported parameter or return
//! type fails there, not on the first call.

use std::fmt;
use std::sync::Arc;

use super::registry::{Codec, TypeRegistry};
use super::{Datum, NativeType, Rest, TypeDesc};
use crate::codec::{Bytes, List, Name, Symbol};
use crate::error::{Error, Result};
use crate::host::{Arity, Env, Value};
use crate::module::Doc;

/// The uniform adapter every exported function is reduced to.
pub type Func = Arc<dyn Fn(&mut Env<'_>, &[Value]) -> Result<Value> + Send + Sync>;

/// Box a closure as a [`Func`].
pub fn func<F>(f: F) -> Func
where
    F: Fn(&mut Env<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// An exported function: arity, documentation and adapter. Immutable once
/// created.
#[derive(Clone)]
pub struct CallableRecord {
    pub arity: Arity,
    pub doc: Doc,
    pub func: Func,
}

impl CallableRecord {
    pub fn new(arity: Arity, doc: Doc, func: Func) -> Self {
        Self { arity, doc, func }
    }

    pub fn call(&self, env: &mut Env<'_>, args: &[Value]) -> Result<Value> {
        (self.func)(env, args)
    }
}

impl fmt::Debug for CallableRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableRecord")
            .field("arity", &self.arity)
            .field("doc", &self.doc)
            .finish()
    }
}

/// The shape of a native function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// The function receives the live environment as its first argument.
    pub takes_env: bool,
    pub params: Vec<TypeDesc>,
    /// Element type of a trailing variadic parameter.
    pub rest: Option<TypeDesc>,
    /// Return type; `None` returns nil.
    pub ret: Option<TypeDesc>,
    /// The function can fail with an error.
    pub fallible: bool,
}

impl Signature {
    pub fn new(params: Vec<TypeDesc>, ret: Option<TypeDesc>) -> Self {
        Self {
            takes_env: false,
            params,
            rest: None,
            ret,
            fallible: false,
        }
    }

    pub fn with_rest(mut self, rest: TypeDesc) -> Self {
        self.rest = Some(rest);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.takes_env = true;
        self
    }

    pub fn fallible(mut self, fallible: bool) -> Self {
        self.fallible = fallible;
        self
    }

    pub fn arity(&self) -> Arity {
        match self.rest {
            Some(_) => Arity::variadic(self.params.len()),
            None => Arity::exact(self.params.len()),
        }
    }

    /// Parse from a string representation.
    /// Format: "(type, type, &rest type) -> type"
    pub fn parse(signature: &str) -> Option<Self> {
        let signature = signature.trim();
        let (params_str, ret_str) = match signature.find("->") {
            Some(pos) => (signature[..pos].trim(), Some(signature[pos + 2..].trim())),
            None => (signature, None),
        };
        let inner = params_str.strip_prefix('(')?.strip_suffix(')')?;

        let mut params = Vec::new();
        let mut rest = None;
        let mut depth = 0usize;
        let mut start = 0;
        let mut pieces = Vec::new();
        for (i, c) in inner.char_indices() {
            match c {
                '<' => depth += 1,
                '>' => depth = depth.checked_sub(1)?,
                ',' if depth == 0 => {
                    pieces.push(&inner[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        pieces.push(&inner[start..]);

        for piece in pieces {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            if rest.is_some() {
                // Nothing may follow the variadic parameter.
                return None;
            }
            match piece.strip_prefix("&rest") {
                Some(ty) => rest = Some(TypeDesc::from_str(ty)?),
                None => params.push(TypeDesc::from_str(piece)?),
            }
        }

        let ret = match ret_str {
            Some(r) => Some(TypeDesc::from_str(r)?),
            None => None,
        };
        Some(Self {
            takes_env: false,
            params,
            rest,
            ret,
            fallible: false,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        if let Some(rest) = &self.rest {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "&rest {}", rest)?;
        }
        write!(f, ")")?;
        if let Some(ret) = &self.ret {
            write!(f, " -> {}", ret)?;
        }
        Ok(())
    }
}

/// Codecs resolved for one signature.
pub struct Resolved {
    params: Vec<Codec>,
    rest: Option<Codec>,
    ret: Codec,
}

impl Resolved {
    fn resolve(registry: &TypeRegistry, sig: &Signature, own: &[Codec]) -> Result<Self> {
        let mut params = Vec::with_capacity(sig.params.len());
        for desc in &sig.params {
            params.push(registry.resolve_with(desc, own)?);
        }
        let rest = match &sig.rest {
            Some(desc) => Some(registry.resolve_with(desc, own)?),
            None => None,
        };
        let ret = registry.resolve_with(sig.ret.as_ref().unwrap_or(&TypeDesc::Unit), own)?;
        Ok(Self { params, rest, ret })
    }

    fn rest_codec(&self) -> Codec {
        self.rest.clone().unwrap_or_else(Codec::passthrough)
    }
}

fn arg(args: &[Value], pos: usize) -> Result<Value> {
    args.get(pos)
        .copied()
        .ok_or_else(|| Error::other(format!("missing argument {}", pos + 1)))
}

/// Return types of exported functions.
///
/// `T` and `Result<T, E>` for any native type `T`; an `Err` becomes the
/// error delivered to the host.
pub trait NativeReturn: Sized + 'static {
    fn ret_desc() -> TypeDesc;

    fn fallible() -> bool {
        false
    }

    fn own_codecs(_out: &mut Vec<Codec>) {}

    fn into_value(self, env: &mut Env<'_>, codec: &Codec) -> Result<Value>;
}

impl<T, E> NativeReturn for std::result::Result<T, E>
where
    T: NativeType,
    E: Into<Error> + 'static,
{
    fn ret_desc() -> TypeDesc {
        T::type_desc()
    }

    fn fallible() -> bool {
        true
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        T::own_codecs(out)
    }

    fn into_value(self, env: &mut Env<'_>, codec: &Codec) -> Result<Value> {
        self.map_err(Into::<Error>::into)?.into_ret(env, codec)
    }
}

/// Implement [`NativeReturn`] for types that are already [`NativeType`]s.
#[macro_export]
macro_rules! native_return {
    ($($t:ty),* $(,)?) => {
        $(
            impl $crate::types::NativeReturn for $t {
                fn ret_desc() -> $crate::types::TypeDesc {
                    <$t as $crate::types::NativeType>::type_desc()
                }

                fn own_codecs(out: &mut ::std::vec::Vec<$crate::types::Codec>) {
                    <$t as $crate::types::NativeType>::own_codecs(out)
                }

                fn into_value(
                    self,
                    env: &mut $crate::host::Env<'_>,
                    codec: &$crate::types::Codec,
                ) -> $crate::Result<$crate::host::Value> {
                    $crate::types::NativeType::into_ret(self, env, codec)
                }
            }
        )*
    };
}

native_return!(
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    Bytes,
    Symbol,
    Name,
    Value,
    Datum,
    num_bigint::BigInt,
    std::time::SystemTime,
    std::time::Duration,
);

impl<T: NativeType> NativeReturn for Option<T> {
    fn ret_desc() -> TypeDesc {
        <Self as NativeType>::type_desc()
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        <Self as NativeType>::own_codecs(out)
    }

    fn into_value(self, env: &mut Env<'_>, codec: &Codec) -> Result<Value> {
        self.into_ret(env, codec)
    }
}

impl<T: NativeType> NativeReturn for Vec<T> {
    fn ret_desc() -> TypeDesc {
        <Self as NativeType>::type_desc()
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        <Self as NativeType>::own_codecs(out)
    }

    fn into_value(self, env: &mut Env<'_>, codec: &Codec) -> Result<Value> {
        self.into_ret(env, codec)
    }
}

impl<T: NativeType> NativeReturn for List<T> {
    fn ret_desc() -> TypeDesc {
        <Self as NativeType>::type_desc()
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        <Self as NativeType>::own_codecs(out)
    }

    fn into_value(self, env: &mut Env<'_>, codec: &Codec) -> Result<Value> {
        self.into_ret(env, codec)
    }
}

impl<K, V, S> NativeReturn for std::collections::HashMap<K, V, S>
where
    K: NativeType + Eq + std::hash::Hash + fmt::Debug,
    V: NativeType,
    S: std::hash::BuildHasher + Default + 'static,
{
    fn ret_desc() -> TypeDesc {
        <Self as NativeType>::type_desc()
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        <Self as NativeType>::own_codecs(out)
    }

    fn into_value(self, env: &mut Env<'_>, codec: &Codec) -> Result<Value> {
        self.into_ret(env, codec)
    }
}

impl<K, V> NativeReturn for std::collections::BTreeMap<K, V>
where
    K: NativeType + Ord + fmt::Debug,
    V: NativeType,
{
    fn ret_desc() -> TypeDesc {
        <Self as NativeType>::type_desc()
    }

    fn own_codecs(out: &mut Vec<Codec>) {
        <Self as NativeType>::own_codecs(out)
    }

    fn into_value(self, env: &mut Env<'_>, codec: &Codec) -> Result<Value> {
        self.into_ret(env, codec)
    }
}

/// Marker for closures taking `&mut Env` first.
#[doc(hidden)]
pub struct WithEnv;

/// Marker for closures ending in a [`Rest`] parameter.
#[doc(hidden)]
pub struct Variadic;

/// Typed closures that can be turned into a [`Func`].
///
/// `Marker` only disambiguates the closure shapes; callers never name it.
pub trait IntoNative<Marker>: Send + Sync + Sized + 'static {
    fn signature() -> Signature;

    /// Codecs of the self-converting types among the parameters and the
    /// return type.
    #[doc(hidden)]
    fn own_codecs() -> Vec<Codec>;

    #[doc(hidden)]
    fn into_func(self, codecs: Resolved) -> Func;
}

macro_rules! impl_into_native {
    ($($a:ident),*) => {
        impl<F, R, $($a,)*> IntoNative<fn($($a,)*) -> R> for F
        where
            F: Fn($($a),*) -> R + Send + Sync + 'static,
            R: NativeReturn,
            $($a: NativeType,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($a::type_desc()),*], Some(R::ret_desc()))
                    .fallible(R::fallible())
            }

            fn own_codecs() -> Vec<Codec> {
                let mut out = Vec::new();
                $($a::own_codecs(&mut out);)*
                R::own_codecs(&mut out);
                out
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_func(self, codecs: Resolved) -> Func {
                func(move |env, args| {
                    let mut pos = 0;
                    $(
                        let $a = $a::from_arg(env, arg(args, pos)?, &codecs.params[pos])?;
                        pos += 1;
                    )*
                    (self)($($a),*).into_value(env, &codecs.ret)
                })
            }
        }

        impl<F, R, $($a,)*> IntoNative<(WithEnv, fn($($a,)*) -> R)> for F
        where
            F: Fn(&mut Env<'_>, $($a),*) -> R + Send + Sync + 'static,
            R: NativeReturn,
            $($a: NativeType,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($a::type_desc()),*], Some(R::ret_desc()))
                    .with_env()
                    .fallible(R::fallible())
            }

            fn own_codecs() -> Vec<Codec> {
                let mut out = Vec::new();
                $($a::own_codecs(&mut out);)*
                R::own_codecs(&mut out);
                out
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_func(self, codecs: Resolved) -> Func {
                func(move |env, args| {
                    let mut pos = 0;
                    $(
                        let $a = $a::from_arg(env, arg(args, pos)?, &codecs.params[pos])?;
                        pos += 1;
                    )*
                    (self)(env, $($a),*).into_value(env, &codecs.ret)
                })
            }
        }

        impl<F, R, $($a,)* T> IntoNative<(Variadic, fn($($a,)* Rest<T>) -> R)> for F
        where
            F: Fn($($a,)* Rest<T>) -> R + Send + Sync + 'static,
            R: NativeReturn,
            T: NativeType,
            $($a: NativeType,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($a::type_desc()),*], Some(R::ret_desc()))
                    .with_rest(T::type_desc())
                    .fallible(R::fallible())
            }

            fn own_codecs() -> Vec<Codec> {
                let mut out = Vec::new();
                $($a::own_codecs(&mut out);)*
                T::own_codecs(&mut out);
                R::own_codecs(&mut out);
                out
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_func(self, codecs: Resolved) -> Func {
                let rest_codec = codecs.rest_codec();
                func(move |env, args| {
                    let mut pos = 0;
                    $(
                        let $a = $a::from_arg(env, arg(args, pos)?, &codecs.params[pos])?;
                        pos += 1;
                    )*
                    let mut rest = Vec::with_capacity(args.len().saturating_sub(pos));
                    for &v in args.get(pos..).unwrap_or(&[]) {
                        rest.push(T::from_arg(env, v, &rest_codec)?);
                    }
                    (self)($($a,)* Rest(rest)).into_value(env, &codecs.ret)
                })
            }
        }

        impl<F, R, $($a,)* T> IntoNative<(WithEnv, Variadic, fn($($a,)* Rest<T>) -> R)> for F
        where
            F: Fn(&mut Env<'_>, $($a,)* Rest<T>) -> R + Send + Sync + 'static,
            R: NativeReturn,
            T: NativeType,
            $($a: NativeType,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($a::type_desc()),*], Some(R::ret_desc()))
                    .with_env()
                    .with_rest(T::type_desc())
                    .fallible(R::fallible())
            }

            fn own_codecs() -> Vec<Codec> {
                let mut out = Vec::new();
                $($a::own_codecs(&mut out);)*
                T::own_codecs(&mut out);
                R::own_codecs(&mut out);
                out
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_func(self, codecs: Resolved) -> Func {
                let rest_codec = codecs.rest_codec();
                func(move |env, args| {
                    let mut pos = 0;
                    $(
                        let $a = $a::from_arg(env, arg(args, pos)?, &codecs.params[pos])?;
                        pos += 1;
                    )*
                    let mut rest = Vec::with_capacity(args.len().saturating_sub(pos));
                    for &v in args.get(pos..).unwrap_or(&[]) {
                        rest.push(T::from_arg(env, v, &rest_codec)?);
                    }
                    (self)(env, $($a,)* Rest(rest)).into_value(env, &codecs.ret)
                })
            }
        }
    };
}

impl_into_native!();
impl_into_native!(A1);
impl_into_native!(A1, A2);
impl_into_native!(A1, A2, A3);
impl_into_native!(A1, A2, A3, A4);
impl_into_native!(A1, A2, A3, A4, A5);
impl_into_native!(A1, A2, A3, A4, A5, A6);

/// A function with all codecs resolved, ready to be registered.
pub struct AutoFunc {
    signature: Signature,
    func: Func,
}

impl AutoFunc {
    /// Build the adapter for a typed closure.
    pub fn new<F, M>(f: F, registry: &TypeRegistry) -> Result<Self>
    where
        F: IntoNative<M>,
    {
        let signature = F::signature();
        let codecs = Resolved::resolve(registry, &signature, &F::own_codecs())?;
        Ok(Self {
            signature,
            func: f.into_func(codecs),
        })
    }

    /// Build the adapter for a function described at runtime.
    ///
    /// The function receives its decoded arguments, with any variadic tail
    /// appended. Raw `value` types are not supported here.
    pub fn dynamic<F>(signature: Signature, f: F, registry: &TypeRegistry) -> Result<Self>
    where
        F: Fn(&mut Env<'_>, Vec<Datum>) -> Result<Datum> + Send + Sync + 'static,
    {
        let raw = signature
            .params
            .iter()
            .chain(signature.rest.iter())
            .chain(signature.ret.iter())
            .any(|d| *d == TypeDesc::Value);
        if raw {
            return Err(Error::UnsupportedType(format!(
                "{} (raw values in a dynamic signature)",
                signature
            )));
        }
        let codecs = Resolved::resolve(registry, &signature, &[])?;
        let signature = Signature {
            takes_env: true,
            fallible: true,
            ..signature
        };
        let rest_codec = codecs.rest_codec();
        let fixed = codecs.params.len();
        let adapter = func(move |env, args| {
            let mut data = Vec::with_capacity(args.len());
            for (pos, codec) in codecs.params.iter().enumerate() {
                data.push(codec.decode(env, arg(args, pos)?)?);
            }
            for &v in args.get(fixed..).unwrap_or(&[]) {
                data.push(rest_codec.decode(env, v)?);
            }
            let result = f(env, data)?;
            codecs.ret.encode(env, result)
        });
        Ok(Self {
            signature,
            func: adapter,
        })
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn arity(&self) -> Arity {
        self.signature.arity()
    }

    pub fn into_record(self, doc: Doc) -> CallableRecord {
        CallableRecord::new(self.signature.arity(), doc, self.func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_parse() {
        let sig = Signature::parse("(i64, map<string, f64>, &rest string) -> bool").unwrap();
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.rest, Some(TypeDesc::String));
        assert_eq!(sig.ret, Some(TypeDesc::Bool));
        assert_eq!(sig.arity(), Arity::variadic(2));
        assert_eq!(
            sig.to_string(),
            "(i64, map<string, f64>, &rest string) -> bool"
        );
        assert!(Signature::parse("(&rest i64, i64)").is_none());
        assert!(Signature::parse("i64").is_none());
    }

    #[test]
    fn test_closure_signatures() {
        fn sig<F: IntoNative<M>, M>(_f: F) -> Signature {
            F::signature()
        }

        let s = sig(|a: i64, b: String| -> bool { a > 0 && !b.is_empty() });
        assert_eq!(s.params, vec![TypeDesc::int(64, true), TypeDesc::String]);
        assert!(!s.takes_env && !s.fallible);

        let s = sig(|_env: &mut Env<'_>, x: f64| -> Result<f64> { Ok(x) });
        assert!(s.takes_env && s.fallible);
        assert_eq!(s.arity(), Arity::exact(1));

        let s = sig(|xs: Rest<i64>| -> i64 { xs.iter().sum() });
        assert_eq!(s.arity(), Arity::variadic(0));
        assert_eq!(s.rest, Some(TypeDesc::int(64, true)));
    }

    #[test]
    fn test_unsupported_types_fail_at_construction() {
        #[derive(Clone)]
        struct Opaque;
        crate::native_type!(opaque Opaque);

        let registry = TypeRegistry::new();
        let err = AutoFunc::new(|_o: Opaque| (), &registry).err().unwrap();
        assert!(matches!(err, Error::UnsupportedType(_)));

        let sig = Signature::new(vec![TypeDesc::Value], None);
        assert!(AutoFunc::dynamic(sig, |_env, _args| Ok(Datum::Nil), &registry).is_err());
    }
}
