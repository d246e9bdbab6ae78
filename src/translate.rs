//! Error translation.
//!
//! Turns a native [`Error`] into the nonlocal exit the host sees when a
//! module function returns. Lazy signals are evaluated best effort: if the
//! symbol or the data cannot be encoded, the host receives the framework's
//! base condition with nil data instead, so reporting an error never fails.
//!
//! The reverse direction lives in [`Env::check`], which reads and clears a
//! pending exit in one step.

use crate::codec::Encode;
use crate::error::{ConversionError, Error, ErrorSymbol, LispError, Result};
use crate::host::{Env, Exit};
use crate::types::Datum;

/// Default prefix of the framework's condition symbols.
pub const DEFAULT_PREFIX: &str = "rust";

/// The framework's condition symbols and the rules for delivering errors.
#[derive(Debug, Clone)]
pub struct ErrorTranslator {
    base: ErrorSymbol,
    panic: ErrorSymbol,
    async_error: ErrorSymbol,
    duplicate_key: ErrorSymbol,
    unimplemented: ErrorSymbol,
}

impl ErrorTranslator {
    /// Condition symbols are named `<prefix>-error`, `<prefix>-panic` and so
    /// on.
    pub fn new(prefix: &str) -> Self {
        let symbol = |suffix: &str, message: &str| {
            ErrorSymbol::new(format!("{}-{}", prefix, suffix), message)
        };
        Self {
            base: symbol("error", "Generic native error"),
            panic: symbol("panic", "Panic while running module function"),
            async_error: symbol("async-error", "Generic asynchronous native error"),
            duplicate_key: symbol("duplicate-key", "Duplicate map key"),
            unimplemented: symbol("unimplemented-error", "Unimplemented native function"),
        }
    }

    /// The parent of every other framework condition.
    pub fn base_error(&self) -> &ErrorSymbol {
        &self.base
    }

    pub fn panic_error(&self) -> &ErrorSymbol {
        &self.panic
    }

    pub fn async_error(&self) -> &ErrorSymbol {
        &self.async_error
    }

    pub fn duplicate_key_error(&self) -> &ErrorSymbol {
        &self.duplicate_key
    }

    pub fn unimplemented_error(&self) -> &ErrorSymbol {
        &self.unimplemented
    }

    /// Every framework condition with its parents, base first.
    pub fn conditions(&self) -> Vec<(ErrorSymbol, Vec<ErrorSymbol>)> {
        let parent = vec![self.base.clone()];
        vec![
            (self.base.clone(), Vec::new()),
            (self.panic.clone(), parent.clone()),
            (self.async_error.clone(), parent.clone()),
            (self.duplicate_key.clone(), parent.clone()),
            (self.unimplemented.clone(), parent),
        ]
    }

    /// The lazy signal an error stands for, unless it is a foreign signal
    /// or throw that must be delivered as is.
    pub fn lisp_error(&self, err: Error) -> std::result::Result<LispError, Error> {
        let (symbol, data) = match err {
            Error::Lisp(x) => return Ok(x),
            Error::Signal(_) | Error::Throw(_) => return Err(err),
            Error::Conversion(ConversionError::WrongTypeArgument { predicate, value }) => (
                ErrorSymbol::wrong_type_argument(),
                vec![Datum::Symbol(predicate), Datum::Str(value)],
            ),
            Error::Conversion(ConversionError::Overflow(value)) => {
                (ErrorSymbol::overflow_error(), vec![Datum::Str(value)])
            }
            Error::Conversion(ConversionError::InvalidUtf8) => (
                ErrorSymbol::wrong_type_argument(),
                vec![Datum::Symbol("utf-8-string-p".to_string())],
            ),
            Error::Conversion(ConversionError::DuplicateKey(key)) => {
                (self.duplicate_key.clone(), vec![Datum::Str(key)])
            }
            Error::Panic(message) => (self.panic.clone(), vec![Datum::Str(message)]),
            other => (self.base.clone(), vec![Datum::Str(other.to_string())]),
        };
        Ok(LispError { symbol, data })
    }

    /// Evaluate `err` into the exit the host should see.
    pub fn evaluate(&self, env: &mut Env<'_>, err: Error) -> Exit {
        match self.lisp_error(err) {
            Ok(x) => match encode_signal(env, &x) {
                Ok(exit) => exit,
                Err(_) => self.fallback(env),
            },
            Err(Error::Signal(s)) => Exit::Signal {
                symbol: s.symbol,
                data: s.data,
            },
            Err(Error::Throw(t)) => Exit::Throw {
                tag: t.tag,
                value: t.value,
            },
            Err(_) => self.fallback(env),
        }
    }

    /// Leave `err` pending in the host.
    pub fn deliver(&self, env: &mut Env<'_>, err: Error) {
        match self.evaluate(env, err) {
            Exit::Return => {}
            Exit::Signal { symbol, data } => env.signal(symbol, data),
            Exit::Throw { tag, value } => env.throw(tag, value),
        }
    }

    // Uses the raw primitives; a failure here has nowhere left to go.
    fn fallback(&self, env: &mut Env<'_>) -> Exit {
        let host = env.host();
        host.exit_clear();
        let symbol = host.intern(self.base.name().as_str());
        let data = host.intern("nil");
        Exit::Signal { symbol, data }
    }
}

impl Default for ErrorTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

fn encode_signal(env: &mut Env<'_>, err: &LispError) -> Result<Exit> {
    let symbol = err.symbol.name().encode(env)?;
    let mut data = Vec::with_capacity(err.data.len());
    for d in &err.data {
        data.push(d.encode(env)?);
    }
    let data = env.list(&data)?;
    Ok(Exit::Signal { symbol, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decode;
    use crate::error::RegistrationError;
    use crate::host::sandbox::Sandbox;
    use crate::types::Custom;

    fn signal_of(sandbox: &mut Sandbox, translator: &ErrorTranslator, err: Error) -> String {
        sandbox.with_env(|env| {
            translator.deliver(env, err);
            match env.check() {
                Err(Error::Signal(s)) => {
                    let cond = env.cons(s.symbol, s.data).unwrap();
                    Datum::decode(env, cond).unwrap().to_string()
                }
                other => panic!("expected a signal, got {:?}", other.map(|_| ())),
            }
        })
    }

    #[test]
    fn test_lazy_signal() {
        let translator = ErrorTranslator::default();
        let mut sandbox = Sandbox::new();
        let err = ErrorSymbol::new("my-error", "My error").error(vec![Datum::Int(1), "x".into()]);
        assert_eq!(signal_of(&mut sandbox, &translator, err), "(my-error 1 \"x\")");
    }

    #[test]
    fn test_conversion_errors_use_host_conditions() {
        let translator = ErrorTranslator::default();
        let mut sandbox = Sandbox::new();
        assert_eq!(
            signal_of(&mut sandbox, &translator, Error::wrong_type("stringp", 5)),
            "(wrong-type-argument stringp \"5\")"
        );
        assert_eq!(
            signal_of(&mut sandbox, &translator, Error::overflow(300)),
            "(overflow-error \"300\")"
        );
    }

    #[test]
    fn test_generic_errors_use_base_condition() {
        let translator = ErrorTranslator::new("demo");
        let mut sandbox = Sandbox::new();
        let err = RegistrationError::DuplicateName("foo".into()).into();
        assert_eq!(
            signal_of(&mut sandbox, &translator, err),
            "(demo-error \"duplicate name foo\")"
        );
        let err = Error::Panic("boom".into());
        assert_eq!(signal_of(&mut sandbox, &translator, err), "(demo-panic \"boom\")");
    }

    #[test]
    fn test_unencodable_data_falls_back() {
        let translator = ErrorTranslator::default();
        let mut sandbox = Sandbox::new();
        let err = ErrorSymbol::new("my-error", "My error")
            .error(vec![Datum::Custom(Custom::new(1u8))]);
        assert_eq!(signal_of(&mut sandbox, &translator, err), "(rust-error)");
    }

    #[test]
    fn test_unencodable_symbol_falls_back() {
        let translator = ErrorTranslator::default();
        let mut sandbox = Sandbox::new();
        // Non-ASCII names are interned through the host's `intern` function.
        sandbox.with_env(|env| {
            let intern = env.intern("intern").unwrap();
            let nil = env.nil().unwrap();
            env.call("fset", &[intern, nil]).unwrap();
        });
        let err = ErrorSymbol::new("température-error", "Température").error(vec![Datum::Int(1)]);
        assert_eq!(signal_of(&mut sandbox, &translator, err), "(rust-error)");
    }

    #[test]
    fn test_conditions_have_base_parent() {
        let translator = ErrorTranslator::default();
        let conditions = translator.conditions();
        assert_eq!(conditions[0].0.name().as_str(), "rust-error");
        assert!(conditions[0].1.is_empty());
        assert!(conditions[1..]
            .iter()
            .all(|(_, parents)| parents[0].name().as_str() == "rust-error"));
    }
}
