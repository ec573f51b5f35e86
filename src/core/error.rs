//! Unified error handling
//!
//! Every fallible operation below `execute` returns a [`BridgeError`]. At the `execute`
//! boundary errors are flattened into the human-readable string channel, so interpreter
//! failures never escape as native faults.
//!
//! ## Error taxonomy
//!
//! - **type mismatch**: a `try_*` accessor was called against the wrong [`VarType`]
//! - **conversion**: a numeric value does not fit the target representation
//! - **capability**: the target runtime cannot represent the value at all
//! - **script**: parse or runtime error inside an embedded interpreter
//! - **callback**: a native callback reported an error or panicked

use thiserror::Error;

use crate::bindings::Runtime;
use crate::config::ConfigError;
use crate::value::VarType;

/// Bridge core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: VarType, found: VarType },

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("{runtime} cannot represent {what}")]
    Capability { runtime: Runtime, what: String },

    #[error("{0} runtime is not available in this build")]
    RuntimeUnavailable(Runtime),

    #[error("Error in {runtime} ({file}): {message}")]
    Script {
        runtime: Runtime,
        file: String,
        message: String,
    },

    #[error("Callback error: {0}")]
    Callback(String),

    #[error("No method `{method}` on {type_name}")]
    MissingMethod { type_name: String, method: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bridge has been finalized")]
    Finalized,
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl BridgeError {
    /// Shorthand for a script error raised outside of a named file.
    pub fn script(runtime: Runtime, message: impl Into<String>) -> Self {
        BridgeError::Script {
            runtime,
            file: "<eval>".to_string(),
            message: message.into(),
        }
    }

    pub fn capability(runtime: Runtime, what: impl Into<String>) -> Self {
        BridgeError::Capability {
            runtime,
            what: what.into(),
        }
    }

    /// Attach a file name to a script error produced without one.
    pub fn in_file(self, file_name: &str) -> Self {
        match self {
            BridgeError::Script {
                runtime, message, ..
            } => BridgeError::Script {
                runtime,
                file: file_name.to_string(),
                message,
            },
            other => other,
        }
    }
}

/// Bridge result type alias
pub type BridgeResult<T> = Result<T, BridgeError>;
