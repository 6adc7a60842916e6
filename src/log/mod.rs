//! Structured logging.
//!
//! # Responsibilities
//! - Build a logger over a rotating file or stdout
//! - Plain calls with an optional prefix
//! - Context calls with key/value fields and a `trace_id`
//! - Bridge database query tracing into the logger (query.rs)
//!
//! # Design Decisions
//! - Each logger owns its own `tracing` dispatcher; nothing is global
//! - Loggers are values: `with_prefix` returns a new logger
//! - Fatal handling is a policy so tests can observe it

mod buffer;
#[cfg(test)]
pub(crate) mod capture;
pub mod logger;
pub mod query;
mod rotate;

use std::fmt;
use std::panic::Location;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use logger::{FatalPolicy, Logger};
pub use query::{QueryLogLevel, QueryLogger};

/// Log sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerKind {
    /// Rotating file described by `LogConfig`.
    #[default]
    File,
    /// Standard output, always at DEBUG.
    Stdout,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("unknown logger kind `{0}`, expected `file` or `stdout`")]
    UnknownKind(String),
}

impl FromStr for LoggerKind {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "stdout" => Ok(Self::Stdout),
            other => Err(LogError::UnknownKind(other.to_string())),
        }
    }
}

/// A key/value pair attached to a single log call.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    key: String,
    value: Value,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or_else(|err| Value::String(err.to_string()));
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Shorthand for [`Field::new`].
pub fn any(key: impl Into<String>, value: impl Serialize) -> Field {
    Field::new(key, value)
}

/// Strings are written raw unless they contain whitespace, everything
/// else as JSON.
impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::String(s) if !s.contains(char::is_whitespace) => write!(f, "{}={}", self.key, s),
            other => write!(f, "{}={}", self.key, other),
        }
    }
}

/// `parent/file.rs:line` for a call site.
pub(crate) fn short_caller(location: &Location<'_>) -> String {
    let file = location.file();
    let is_sep = |c: char| c == '/' || c == '\\';
    let short = match file.rfind(is_sep) {
        Some(last) => match file[..last].rfind(is_sep) {
            Some(prev) => &file[prev + 1..],
            None => file,
        },
        None => file,
    };
    format!("{}:{}", short, location.line())
}
