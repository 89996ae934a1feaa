use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a [`FlowError`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad split strategy, parameter or configuration value.
    Config,
    /// Arity mismatch, unknown node or double-wired port.
    Wiring,
    /// Pull before a required input was supplied, or before `init`.
    NotReady,
    /// A pull re-entered a node already being resolved.
    Cycle,
    /// Not enough instances to build the requested partitions.
    InsufficientData,
    /// A learner failed to build a model.
    Training,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Config => "config error",
            Self::Wiring => "wiring error",
            Self::NotReady => "not ready",
            Self::Cycle => "cycle error",
            Self::InsufficientData => "insufficient data",
            Self::Training => "training error",
        };
        f.write_str(label)
    }
}

/// The single error type raised by the engine.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct FlowError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

/// Result alias used throughout the engine.
pub type FlowResult<T> = Result<T, FlowError>;

impl FlowError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for [`ErrorKind::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Shorthand for [`ErrorKind::Wiring`].
    pub fn wiring(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Wiring, message)
    }

    /// Shorthand for [`ErrorKind::NotReady`].
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotReady, message)
    }

    /// Shorthand for [`ErrorKind::Cycle`].
    pub fn cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cycle, message)
    }

    /// Shorthand for [`ErrorKind::InsufficientData`].
    pub fn insufficient_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientData, message)
    }

    /// Shorthand for [`ErrorKind::Training`].
    pub fn training(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Training, message)
    }

    /// Wraps an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Error category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human readable message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_includes_kind_and_message() {
        let err = FlowError::wiring("input 3 out of range");
        assert_eq!(err.kind(), ErrorKind::Wiring);
        assert_eq!(err.to_string(), "wiring error: input 3 out of range");
    }

    #[test]
    fn wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = FlowError::training("centroid failed").with_source(io);
        assert_eq!(err.source().map(ToString::to_string), Some("disk".into()));
    }
}
