//! Symbol codecs.

use std::borrow::Borrow;
use std::fmt;

use super::{Decode, Encode};
use crate::error::{RegistrationError, Result};
use crate::host::{Env, Value};

/// A symbol, encoded by interning its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol(s.to_string())
    }
}

impl Encode for Symbol {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.intern(&self.0)
    }
}

impl Decode for Symbol {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        env.symbol_name(value).map(Symbol)
    }
}

/// The name of a global entity such as a function, variable, or error
/// symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Name(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that the name can be interned.
    pub fn validate(&self) -> std::result::Result<(), RegistrationError> {
        if self.0.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if self.0.contains('\0') {
            return Err(RegistrationError::InvalidName(self.0.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_string())
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name(s)
    }
}

impl From<&Name> for Name {
    fn from(n: &Name) -> Self {
        n.clone()
    }
}

impl Encode for Name {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.intern(&self.0)
    }
}

impl Decode for Name {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        env.symbol_name(value).map(Name)
    }
}
