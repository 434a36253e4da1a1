use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid octal mode: {0:?}")]
    InvalidMode(String),

    #[error("mode {0:#o} has bits outside the type and permission masks")]
    ModeOutOfRange(u32),
}
