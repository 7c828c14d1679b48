//! Error types for the Lua bridge

use std::sync::Arc;
use thiserror::Error;

/// Convenience alias for bridge results
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Coarse classification of a [`BridgeError`], for callers that branch on
/// the failure category rather than the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Load,
    Runtime,
    InvalidPath,
    UnknownKey,
    MissingModule,
    Disabled,
    Closed,
    InvalidIndex,
    Conversion,
    Host,
    Config,
}

/// Main error type for the bridge
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// Source failed to parse or could not be read
    #[error("Lua loading error: {message}")]
    Load { message: String },

    /// Error raised while a chunk or function was running
    #[error("Lua error: {message}")]
    Runtime { message: String },

    /// Dotted path without segments, or a segment applied to a non-indexable value
    #[error("invalid Lua key: \"{path}\"")]
    InvalidPath { path: String },

    /// Intermediate path segment resolved to nil
    #[error("unknown Lua key: \"{key}\"")]
    UnknownKey { key: String },

    #[error("unable to find package {name}")]
    MissingModule { name: String },

    /// The runtime failed startup and refuses use until reset
    #[error("Lua runtime is disabled")]
    Disabled,

    /// The interpreter was torn down (or never created)
    #[error("Lua runtime is closed")]
    Closed,

    #[error("invalid stack index {index} (top is {top})")]
    InvalidIndex { index: i32, top: usize },

    #[error("expected {expected}, found {found}")]
    Conversion {
        expected: &'static str,
        found: &'static str,
    },

    /// Failure reported by a host function body
    #[error("{message}")]
    Host { message: String },

    #[error("invalid bridge configuration: {message}")]
    Config { message: String },
}

impl BridgeError {
    pub fn load(message: impl Into<String>) -> Self {
        BridgeError::Load {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        BridgeError::Runtime {
            message: message.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        BridgeError::InvalidPath { path: path.into() }
    }

    pub fn unknown_key(key: impl Into<String>) -> Self {
        BridgeError::UnknownKey { key: key.into() }
    }

    pub fn missing_module(name: impl Into<String>) -> Self {
        BridgeError::MissingModule { name: name.into() }
    }

    pub fn host(message: impl Into<String>) -> Self {
        BridgeError::Host {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    pub fn conversion(expected: &'static str, found: &'static str) -> Self {
        BridgeError::Conversion { expected, found }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Load { .. } => ErrorKind::Load,
            BridgeError::Runtime { .. } => ErrorKind::Runtime,
            BridgeError::InvalidPath { .. } => ErrorKind::InvalidPath,
            BridgeError::UnknownKey { .. } => ErrorKind::UnknownKey,
            BridgeError::MissingModule { .. } => ErrorKind::MissingModule,
            BridgeError::Disabled => ErrorKind::Disabled,
            BridgeError::Closed => ErrorKind::Closed,
            BridgeError::InvalidIndex { .. } => ErrorKind::InvalidIndex,
            BridgeError::Conversion { .. } => ErrorKind::Conversion,
            BridgeError::Host { .. } => ErrorKind::Host,
            BridgeError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Converts into an error that can be raised inside the interpreter.
    ///
    /// The bridge error survives the trip through Lua and is recovered by
    /// the `From<mlua::Error>` conversion when it escapes a protected call.
    pub(crate) fn into_lua(self) -> mlua::Error {
        mlua::Error::ExternalError(Arc::new(self))
    }
}

impl From<mlua::Error> for BridgeError {
    fn from(err: mlua::Error) -> Self {
        match err {
            mlua::Error::SyntaxError { message, .. } => BridgeError::Load { message },
            mlua::Error::RuntimeError(message) => classify_runtime(&message),
            mlua::Error::CallbackError { cause, .. } => BridgeError::from((*cause).clone()),
            mlua::Error::ExternalError(inner) => match inner.downcast_ref::<BridgeError>() {
                Some(bridge) => bridge.clone(),
                None => BridgeError::runtime(inner.to_string()),
            },
            other => BridgeError::runtime(strip_traceback(&other.to_string())),
        }
    }
}

/// Drops the `stack traceback:` tail the interpreter appends to error strings.
pub(crate) fn strip_traceback(message: &str) -> String {
    match message.split_once("\nstack traceback:") {
        Some((head, _)) => head.to_string(),
        None => message.to_string(),
    }
}

fn classify_runtime(message: &str) -> BridgeError {
    let message = strip_traceback(message);
    if let Some(name) = missing_module_name(&message) {
        return BridgeError::MissingModule { name };
    }
    BridgeError::Runtime { message }
}

/// Extracts `x` from the interpreter's `module 'x' not found` message.
fn missing_module_name(message: &str) -> Option<String> {
    let (_, rest) = message.split_once("module '")?;
    let (name, tail) = rest.split_once('\'')?;
    tail.starts_with(" not found").then(|| name.to_string())
}
