//! Error taxonomy for the runtime.
//!
//! Mirrors the six kinds in the spec: validation errors never reach the
//! script as a thrown error (they resolve a Promise instead); everything
//! else propagates through `Run`/`require`'s ordinary return paths.

use thiserror::Error;

/// Result type used throughout the runtime crate.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// Missing/malformed argument to a primitive.
    #[error("validation error: {0}")]
    Validation(String),

    /// Script or module bytecode compilation failed.
    #[error("compile error: {0}")]
    Compile(String),

    /// Script-level error observed when a resume returns the error status.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// HTTP/connection/TLS/timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Cooperative cancellation (parent scope, stream close, timeout cancel).
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Package not found, version not found, checksum mismatch, invalid
    /// package, cyclic dependency.
    #[error("registry error: {0}")]
    Registry(String),
}

impl RuntimeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Human-readable message, used when surfacing to Luau as a plain string.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<mlua::Error> for RuntimeError {
    fn from(e: mlua::Error) -> Self {
        RuntimeError::Runtime(e.to_string())
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Registry(e.to_string())
    }
}
