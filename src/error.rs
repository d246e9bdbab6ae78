//! Error taxonomy for the bridge.
//!
//! Conversion and registration failures are ordinary values returned to the
//! immediate caller. Foreign nonlocal exits (`Signal`, `Throw`) round-trip
//! untouched. `Panic` is only produced by the trampoline's containment
//! boundary.

use std::fmt;

use thiserror::Error;

use crate::codec::Name;
use crate::host::{Env, Value};
use crate::types::Datum;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("unsupported type {0}")]
    UnsupportedType(String),

    /// A signal whose symbol and data are encoded when it reaches the host.
    #[error(transparent)]
    Lisp(#[from] LispError),

    /// A signal that already lives in the host.
    #[error(transparent)]
    Signal(#[from] Signal),

    #[error(transparent)]
    Throw(#[from] Throw),

    /// A native panic caught at the dispatch boundary.
    #[error("panic in native function: {0}")]
    Panic(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an arbitrary error as a generic condition.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Other(err.into())
    }

    /// A `wrong-type-argument` failure for `value` failing `predicate`.
    pub fn wrong_type(predicate: &str, value: impl fmt::Display) -> Self {
        ConversionError::WrongTypeArgument {
            predicate: predicate.to_string(),
            value: value.to_string(),
        }
        .into()
    }

    /// An `overflow-error` for the printed representation of a value.
    pub fn overflow(value: impl fmt::Display) -> Self {
        ConversionError::Overflow(value.to_string()).into()
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panic(_))
    }
}

/// Failures while converting between native and foreign values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("wrong type argument: {predicate}, {value}")]
    WrongTypeArgument { predicate: String, value: String },

    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("duplicate hash table key {0}")]
    DuplicateKey(String),
}

/// Failures while registering entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("unnamed queue item")]
    EmptyName,

    #[error("duplicate name {0}")]
    DuplicateName(String),

    #[error("initialization already complete")]
    Closed,

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("too many handles")]
    TooManyHandles,

    #[error("empty error message for error symbol {0}")]
    EmptyMessage(String),
}

/// An error symbol together with its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorSymbol {
    name: Name,
    message: String,
}

impl ErrorSymbol {
    /// Refer to an error symbol without defining it.
    pub fn new(name: impl Into<Name>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn wrong_type_argument() -> Self {
        Self::new("wrong-type-argument", "Wrong type argument")
    }

    pub fn overflow_error() -> Self {
        Self::new("overflow-error", "Arithmetic overflow error")
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// A lazy signal of this symbol with the given data.
    pub fn error(&self, data: Vec<Datum>) -> Error {
        Error::Lisp(LispError {
            symbol: self.clone(),
            data,
        })
    }

    /// Whether `err` is a signal of exactly this symbol.
    ///
    /// Interning failures count as a mismatch.
    pub fn matches(&self, env: &mut Env<'_>, err: &Error) -> bool {
        match err {
            Error::Lisp(x) => x.symbol == *self,
            Error::Signal(s) => match env.intern(self.name.as_str()) {
                Ok(want) => env.eq(s.symbol, want),
                Err(_) => false,
            },
            Error::Conversion(ConversionError::WrongTypeArgument { .. }) => {
                self.name.as_str() == "wrong-type-argument"
            }
            Error::Conversion(ConversionError::Overflow(_)) => {
                self.name.as_str() == "overflow-error"
            }
            _ => false,
        }
    }
}

impl fmt::Display for ErrorSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A signal with an unevaluated symbol and data list.
///
/// Evaluation is best effort: if the symbol or data cannot be encoded, the
/// host receives a generic framework error instead.
#[derive(Debug, Clone, PartialEq)]
pub struct LispError {
    pub symbol: ErrorSymbol,
    pub data: Vec<Datum>,
}

impl fmt::Display for LispError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.symbol)?;
        for (i, d) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for LispError {}

/// A signal already present in the host, as `(symbol . data)`.
#[derive(Debug, Clone, Copy)]
pub struct Signal {
    pub symbol: Value,
    pub data: Value,
}

impl Signal {
    /// The host's message for this signal, or `<error>` if it cannot be
    /// determined.
    pub fn message(&self, env: &mut Env<'_>) -> String {
        let message = env
            .cons(self.symbol, self.data)
            .and_then(|cond| env.call("error-message-string", &[cond]))
            .and_then(|s| env.str(s));
        message.unwrap_or_else(|_| "<error>".to_string())
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("foreign signal")
    }
}

impl std::error::Error for Signal {}

/// A pending throw to `tag` carrying `value`.
#[derive(Debug, Clone, Copy)]
pub struct Throw {
    pub tag: Value,
    pub value: Value,
}

impl fmt::Display for Throw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("foreign throw")
    }
}

impl std::error::Error for Throw {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_messages() {
        assert_eq!(
            RegistrationError::DuplicateName("foo".into()).to_string(),
            "duplicate name foo"
        );
        assert_eq!(
            RegistrationError::Closed.to_string(),
            "initialization already complete"
        );
        assert_eq!(RegistrationError::EmptyName.to_string(), "unnamed queue item");
    }

    #[test]
    fn test_lisp_error_display() {
        let sym = ErrorSymbol::new("my-error", "My error");
        let err = LispError {
            symbol: sym,
            data: vec![Datum::Int(1), Datum::Str("two".into())],
        };
        assert_eq!(err.to_string(), "My error: 1, \"two\"");
    }

    #[test]
    fn test_error_conversions() {
        let err: Error = ConversionError::InvalidUtf8.into();
        assert!(matches!(err, Error::Conversion(ConversionError::InvalidUtf8)));
        assert!(Error::Panic("boom".into()).is_panic());
        let err = Error::overflow(u128::MAX);
        assert!(matches!(err, Error::Conversion(ConversionError::Overflow(_))));
    }
}
