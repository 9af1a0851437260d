//! Error types for stack access
//!
//! Every failure a caller can observe is one variant of [`Error`]. Retrieval
//! failures are always reported after the value stack has been restored to
//! the height it had before the failed operation, so a caller can keep using
//! the session (and any live [`TableHandle`](crate::TableHandle)) afterwards.

use crate::stack::StackIndex;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The runtime state could not be allocated
    #[error("cannot create lua state: {0}")]
    RuntimeInit(String),

    /// A chunk failed to compile or raised while running, or a lookup
    /// triggered a metamethod that raised
    #[error("{0}")]
    Script(String),

    /// The retrieved value does not satisfy the requested type
    ///
    /// `key` is the literal name for named keys, the decimal index for
    /// integer keys and `function()` for probe keys.
    #[error("variable {key} is not {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// A handle's recorded position no longer addresses its table
    #[error("stack index {position} is out of range (top is {top})")]
    StackIndex { position: StackIndex, top: StackIndex },

    /// The runtime refused to grow the value stack
    #[error("value stack exhausted at height {0}")]
    StackExhausted(StackIndex),

    /// A script file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn type_mismatch(key: impl Into<String>, expected: &'static str) -> Self {
        Error::TypeMismatch {
            key: key.into(),
            expected,
        }
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, Error::TypeMismatch { .. })
    }

    pub fn is_stack_index(&self) -> bool {
        matches!(self, Error::StackIndex { .. })
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Error::Script(_))
    }
}
