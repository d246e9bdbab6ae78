//! Calling host functions with native arguments.

use super::registry::{Codec, TypeRegistry};
use super::{Datum, Signature, TypeDesc};
use crate::codec::Name;
use crate::error::{Error, ErrorSymbol, Result};
use crate::host::Env;

/// A host function with pre-resolved argument and result codecs.
#[derive(Debug, Clone)]
pub struct Imported {
    name: Name,
    signature: Signature,
    params: Vec<Codec>,
    rest: Option<Codec>,
    ret: Codec,
}

impl Imported {
    /// Resolve the codecs for calling `name` with `signature`.
    pub fn new(name: impl Into<Name>, signature: Signature, registry: &TypeRegistry) -> Result<Self> {
        let name = name.into();
        name.validate()?;
        let descs = signature
            .params
            .iter()
            .chain(signature.rest.iter())
            .chain(signature.ret.iter());
        for desc in descs {
            if *desc == TypeDesc::Value {
                return Err(Error::UnsupportedType(format!(
                    "{} (raw values in an imported signature)",
                    signature
                )));
            }
        }
        let mut params = Vec::with_capacity(signature.params.len());
        for desc in &signature.params {
            params.push(registry.resolve(desc)?);
        }
        let rest = match &signature.rest {
            Some(desc) => Some(registry.resolve(desc)?),
            None => None,
        };
        let ret = registry.resolve(signature.ret.as_ref().unwrap_or(&TypeDesc::Unit))?;
        Ok(Self {
            name,
            signature,
            params,
            rest,
            ret,
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Encode `args`, call the function and decode its result.
    pub fn call(&self, env: &mut Env<'_>, args: Vec<Datum>) -> Result<Datum> {
        if !self.signature.arity().accepts(args.len()) {
            let symbol = ErrorSymbol::new("wrong-number-of-arguments", "Wrong number of arguments");
            return Err(symbol.error(vec![
                Datum::Symbol(self.name.to_string()),
                Datum::int(args.len()),
            ]));
        }
        let mut values = Vec::with_capacity(args.len());
        for (i, datum) in args.into_iter().enumerate() {
            let codec = match (self.params.get(i), &self.rest) {
                (Some(codec), _) => codec,
                (None, Some(rest)) => rest,
                (None, None) => break,
            };
            values.push(codec.encode(env, datum)?);
        }
        let result = env.call(self.name.as_str(), &values)?;
        self.ret.decode(env, result)
    }
}
