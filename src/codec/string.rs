//! String codecs.

use std::fmt;

use super::{Decode, Encode};
use crate::error::Result;
use crate::host::{Env, Value};

impl Encode for str {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.make_string(self)
    }
}

impl Encode for String {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.make_string(self)
    }
}

impl Decode for String {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        env.str(value)
    }
}

/// A byte string, encoded as a unibyte host string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes(pub Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(v: &[u8]) -> Self {
        Bytes(v.to_vec())
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for b in &self.0 {
            write!(f, "\\{:03o}", b)?;
        }
        f.write_str("\"")
    }
}

impl Encode for Bytes {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.make_unibyte_string(&self.0)
    }
}

impl Decode for Bytes {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        env.bytes(value).map(Bytes)
    }
}
