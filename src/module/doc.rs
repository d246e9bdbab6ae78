//! Documentation strings.
//!
//! A documentation string may end in usage information of the form
//! `\n\n(fn ARGS)`, which the host shows instead of the real argument list.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::codec::Encode;
use crate::error::{Error, Result};
use crate::host::{Env, Value};

lazy_static! {
    /// Trailing usage information, as recognized by the host's help system.
    static ref USAGE_PATTERN: Regex = Regex::new(r"\n\n\(fn( .*)?\)\z").expect("valid usage pattern");
}

/// A documentation string for a function or variable. An empty string means
/// no documentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Doc(String);

impl Doc {
    pub fn new(doc: impl Into<String>) -> Self {
        Doc(doc.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `None` for an empty string.
    pub fn as_option(&self) -> Option<&str> {
        if self.0.is_empty() {
            None
        } else {
            Some(&self.0)
        }
    }

    /// Documentation strings may not contain NUL bytes.
    pub fn validate(&self) -> Result<()> {
        if self.0.contains('\0') {
            return Err(Error::wrong_type("valid-string-p", format!("{:?}", self.0)));
        }
        Ok(())
    }

    /// Split off trailing usage information.
    ///
    /// Absent usage information (`None`) is different from an empty usage.
    pub fn split_usage(&self) -> (Doc, Option<Usage>) {
        match USAGE_PATTERN.captures(&self.0) {
            Some(caps) => {
                let start = caps.get(0).map_or(self.0.len(), |m| m.start());
                let usage = caps.get(1).map_or("", |m| m.as_str().trim_matches(' '));
                (Doc(self.0[..start].to_string()), Some(Usage(usage.to_string())))
            }
            None => (self.clone(), None),
        }
    }

    /// This documentation with `usage` appended, replacing any existing
    /// usage information.
    pub fn with_usage(&self, usage: &Usage) -> Result<Doc> {
        usage.validate()?;
        let (doc, _) = self.split_usage();
        let args = usage.0.trim_matches(' ');
        let sep = if args.is_empty() { "" } else { " " };
        Ok(Doc(format!("{}\n\n(fn{}{})", doc.0, sep, args)))
    }
}

impl fmt::Display for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Doc {
    fn from(s: &str) -> Self {
        Doc(s.to_string())
    }
}

impl From<String> for Doc {
    fn from(s: String) -> Self {
        Doc(s)
    }
}

/// Encodes as nil when empty.
impl Encode for Doc {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        if self.0.is_empty() {
            return env.nil();
        }
        self.validate()?;
        env.make_string(&self.0)
    }
}

/// A space-separated list of argument names, without parentheses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Usage(String);

impl Usage {
    pub fn new(usage: impl Into<String>) -> Self {
        Usage(usage.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Usage strings may contain neither NUL bytes nor newlines.
    pub fn validate(&self) -> Result<()> {
        if self.0.contains(['\0', '\n']) {
            return Err(Error::wrong_type("valid-string-p", format!("{:?}", self.0)));
        }
        Ok(())
    }
}

impl From<&str> for Usage {
    fn from(s: &str) -> Self {
        Usage(s.to_string())
    }
}
