//! Error types for the source-chain engine.

use std::fmt;
use std::sync::Arc;

/// The main error type for the source-chain engine.
#[derive(Debug, Clone)]
pub enum Error {
    /// An item was emitted on a source whose completion is already settled
    AlreadyCompleted { label: String },

    /// A completion handle was transitioned twice
    AlreadyReady { label: String },

    /// No encoder/decoder is registered under the requested kind
    UnsupportedCodec { kind: String },

    /// A codec rejected its input
    Codec { kind: String, detail: String },

    /// An operator was constructed with an invalid argument
    InvalidArgument { detail: String },

    /// The operator exists in the API surface but has no implementation
    Unimplemented { feature: String },

    /// A blocking wait can never make progress on this chain
    Stalled { label: String },

    /// An I/O error from a reader-backed root source
    Io(Arc<std::io::Error>),

    /// An error raised by user code (item callbacks, codecs, combiners)
    External(Arc<dyn std::error::Error + Send + Sync>),

    /// A custom error with a message
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyCompleted { label } => {
                write!(f, "source '{}' already completed", label)
            }
            Error::AlreadyReady { label } => {
                write!(f, "completion '{}' is already settled", label)
            }
            Error::UnsupportedCodec { kind } => write!(f, "unsupported codec kind '{}'", kind),
            Error::Codec { kind, detail } => write!(f, "codec '{}' failed: {}", kind, detail),
            Error::InvalidArgument { detail } => write!(f, "invalid argument: {}", detail),
            Error::Unimplemented { feature } => write!(f, "'{}' is not implemented", feature),
            Error::Stalled { label } => {
                write!(f, "'{}' will never become ready on this thread", label)
            }
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::External(e) => write!(f, "{}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e.as_ref()),
            Error::External(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

// Convenience constructors
impl Error {
    /// Create an error from any external error type
    pub fn external<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::External(Arc::new(error))
    }

    /// Create a codec error
    pub fn codec<K: Into<String>, D: Into<String>>(kind: K, detail: D) -> Self {
        Error::Codec {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    /// Create an unsupported-codec error
    pub fn unsupported_codec<S: Into<String>>(kind: S) -> Self {
        Error::UnsupportedCodec { kind: kind.into() }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument<S: Into<String>>(detail: S) -> Self {
        Error::InvalidArgument {
            detail: detail.into(),
        }
    }

    /// Create an unimplemented-feature error
    pub fn unimplemented<S: Into<String>>(feature: S) -> Self {
        Error::Unimplemented {
            feature: feature.into(),
        }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }
}

// Common conversions
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;
