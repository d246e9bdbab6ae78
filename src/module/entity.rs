//! Entities a module defines in the host.

use crate::codec::{Encode, Name};
use crate::error::{ErrorSymbol, Result};
use crate::handle::Handle;
use crate::host::{Arity, Env, Value};
use crate::manager::Define;
use crate::types::Datum;

use super::Doc;

/// A function whose record lives in the module's function table.
#[derive(Debug, Clone)]
pub(crate) struct FunctionDef {
    pub name: Option<Name>,
    pub handle: Handle,
    pub arity: Arity,
    pub doc: Doc,
    /// Release the handle once the host no longer references the function.
    pub finalize: bool,
}

impl FunctionDef {
    /// Create the host function and bind it to its name, if any.
    pub fn materialize(&self, env: &mut Env<'_>) -> Result<Value> {
        self.doc.validate()?;
        let f = env.make_function(self.arity, self.doc.as_option(), self.handle, self.finalize)?;
        if let Some(name) = &self.name {
            env.defalias(name.as_str(), f)?;
        }
        Ok(f)
    }
}

impl Define for FunctionDef {
    fn define(&self, env: &mut Env<'_>) -> Result<()> {
        self.materialize(env).map(|_| ())
    }
}

/// A dynamic variable defined with `defvar`.
#[derive(Debug, Clone)]
pub(crate) struct VariableDef {
    pub name: Name,
    pub init: Datum,
    pub doc: Doc,
}

impl Define for VariableDef {
    fn define(&self, env: &mut Env<'_>) -> Result<()> {
        let init = self.init.encode(env)?;
        self.doc.validate()?;
        env.defvar(self.name.as_str(), init, self.doc.as_str())
    }
}

/// An error symbol defined with `define-error`.
#[derive(Debug, Clone)]
pub(crate) struct ConditionDef {
    pub symbol: ErrorSymbol,
    pub parents: Vec<ErrorSymbol>,
}

impl Define for ConditionDef {
    fn define(&self, env: &mut Env<'_>) -> Result<()> {
        let name = self.symbol.name().encode(env)?;
        let message = env.make_string(self.symbol.message())?;
        let mut parents = Vec::with_capacity(self.parents.len());
        for parent in &self.parents {
            parents.push(parent.name().encode(env)?);
        }
        let parents = env.list(&parents)?;
        env.call("define-error", &[name, message, parents])?;
        Ok(())
    }
}

/// A custom hash table test backed by two native functions.
#[derive(Debug, Clone)]
pub(crate) struct HashTestDef {
    pub name: Name,
    pub equal: Handle,
    pub hash: Handle,
}

impl Define for HashTestDef {
    fn define(&self, env: &mut Env<'_>) -> Result<()> {
        let name = self.name.encode(env)?;
        let equal = env.make_function(Arity::exact(2), None, self.equal, false)?;
        let hash = env.make_function(Arity::exact(1), None, self.hash, false)?;
        env.call("define-hash-table-test", &[name, equal, hash])?;
        Ok(())
    }
}

/// A unit test registered with the host's test framework.
#[derive(Debug, Clone)]
pub(crate) struct TestDef {
    pub name: Name,
    /// Nullary body function.
    pub body: Handle,
    pub doc: Doc,
}

impl Define for TestDef {
    fn define(&self, env: &mut Env<'_>) -> Result<()> {
        // The body itself is anonymous and undocumented.
        let body = env.make_function(Arity::exact(0), None, self.body, false)?;
        let name = self.name.encode(env)?;
        let mut args = vec![env.intern(":name")?, name, env.intern(":body")?, body];
        if !self.doc.is_empty() {
            args.push(env.intern(":documentation")?);
            args.push(self.doc.encode(env)?);
        }
        let test = env.call("make-ert-test", &args)?;
        env.call("ert-set-test", &[name, test])?;
        Ok(())
    }
}
