//! Error types for the signal system.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error produced by a user computation.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias used throughout the reactive module.
pub type Result<T, E = SignalError> = std::result::Result<T, E>;

/// Errors raised while reading or writing signals.
#[derive(Debug, Error)]
pub enum SignalError {
    /// A computed signal was written to. Computed signals are derived-only.
    #[error("can't set dynamic signaled attribute `{name}`")]
    UnsupportedWrite { name: Arc<str> },

    /// The descriptor has no target a handler could be built from.
    #[error("no acceptable handler for signal `{name}`: target was never attached")]
    NoAcceptableHandler { name: Arc<str> },

    /// A computation read a signal that is already being evaluated.
    #[error("circular dependency while evaluating signal `{name}`")]
    CircularDependency { name: Arc<str> },

    /// A computed signal was read at class level, with no instance to compute with.
    #[error("computed signal `{name}` needs an instance to evaluate")]
    Unbound { name: Arc<str> },

    /// The user computation itself failed.
    #[error("computation of signal `{name}` failed")]
    Compute {
        name: Arc<str>,
        #[source]
        source: BoxError,
    },

    /// Error raised from inside a computation body, before it is attributed to a signal.
    #[error(transparent)]
    Custom(BoxError),
}

impl SignalError {
    /// Wrap an arbitrary error raised by a computation body.
    pub fn custom<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Custom(err.into())
    }

    /// Attach the signal name to a bare computation error.
    ///
    /// Errors that already name a signal (nested reads) pass through unchanged.
    pub(crate) fn within(self, name: &Arc<str>) -> Self {
        match self {
            Self::Custom(source) => Self::Compute {
                name: Arc::clone(name),
                source,
            },
            other => other,
        }
    }

    /// The name of the signal the error is attributed to, if any.
    pub fn signal_name(&self) -> Option<&str> {
        match self {
            Self::UnsupportedWrite { name }
            | Self::NoAcceptableHandler { name }
            | Self::CircularDependency { name }
            | Self::Unbound { name }
            | Self::Compute { name, .. } => Some(name),
            Self::Custom(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_errors_are_attributed_once() {
        let outer: Arc<str> = Arc::from("outer");
        let inner: Arc<str> = Arc::from("inner");

        let err = SignalError::custom("boom").within(&inner).within(&outer);
        assert_eq!(err.signal_name(), Some("inner"));
        assert!(matches!(err, SignalError::Compute { .. }));
    }

    #[test]
    fn unsupported_write_message() {
        let err = SignalError::UnsupportedWrite {
            name: Arc::from("total"),
        };
        assert_eq!(err.to_string(), "can't set dynamic signaled attribute `total`");
    }
}
