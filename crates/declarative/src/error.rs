//! Error types for graph orchestration.
//!
//! Errors are classified so callers can tell a run that was refused before
//! touching anything (pre-flight) from one that failed part-way through.
//! Provider failures have their own error type in [`crate::provider`].

use crate::provider::ProviderError;
use std::fmt;
use thiserror::Error;

/// Coarse classification of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Raised before any external mutation (configuration, graph shape)
    PreFlight,
    /// Misuse of the graph-building API
    Programmer,
    /// A provider call failed for one node
    Provider,
    /// A cross-stack output could not be resolved for one node
    Binding,
    /// The state store could not be read or written
    State,
    /// The run was cancelled
    Cancelled,
}

impl ErrorClass {
    /// Whether errors of this class abort the whole run before any change.
    pub fn aborts_run(&self) -> bool {
        matches!(self, Self::PreFlight | Self::Programmer)
    }

    /// Whether errors of this class are confined to a single node.
    pub fn is_node_local(&self) -> bool {
        matches!(self, Self::Provider | Self::Binding)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreFlight => "pre-flight",
            Self::Programmer => "programmer",
            Self::Provider => "provider",
            Self::Binding => "binding",
            Self::State => "state",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors raised by graph construction, provisioning and state tracking.
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration key is missing or malformed
    #[error("invalid configuration for '{key}': {message}")]
    Config {
        /// Offending configuration key
        key: String,
        /// What was wrong with it
        message: String,
    },

    /// The graph contains a dependency cycle
    #[error("cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency {
        /// Node ids along the cycle, first id repeated at the end
        path: Vec<String>,
    },

    /// A node id was added twice
    #[error("duplicate node id: {id}")]
    DuplicateId { id: String },

    /// A referenced node id does not exist in the graph
    #[error("unknown node: {id}")]
    UnknownNode { id: String },

    /// A binding id was not issued by this binder
    #[error("unknown binding: #{id}")]
    UnknownBinding { id: usize },

    /// A provider call failed with a retryable error
    #[error("transient provider error on {node}: {source}")]
    ProviderTransient {
        node: String,
        #[source]
        source: ProviderError,
    },

    /// A provider call failed for good
    #[error("provider error on {node} after {attempts} attempt(s): {source}")]
    ProviderFatal {
        node: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// A producer output was dereferenced before the producer was created
    #[error("output '{output}' of {graph}/{node} is not available")]
    UnresolvedOutput {
        graph: String,
        node: String,
        output: String,
    },

    /// State store read or write failed
    #[error("state store error: {message}")]
    State { message: String },

    /// The run was cancelled before this node started
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a configuration error for a key.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a state store error from anything displayable.
    pub fn state(err: impl fmt::Display) -> Self {
        Self::State {
            message: err.to_string(),
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config { .. } | Error::CyclicDependency { .. } => ErrorClass::PreFlight,
            Error::DuplicateId { .. } | Error::UnknownNode { .. } | Error::UnknownBinding { .. } => {
                ErrorClass::Programmer
            }
            Error::ProviderTransient { .. } | Error::ProviderFatal { .. } => ErrorClass::Provider,
            Error::UnresolvedOutput { .. } => ErrorClass::Binding,
            Error::State { .. } => ErrorClass::State,
            Error::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Whether this error prevents the run from starting at all.
    pub fn is_preflight(&self) -> bool {
        self.class().aborts_run()
    }

    /// The provider error underneath, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Error::ProviderTransient { source, .. } | Error::ProviderFatal { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_joins_path() {
        let err = Error::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_preflight_classes() {
        assert!(Error::config("deployment.region", "missing").is_preflight());
        assert!(Error::CyclicDependency { path: vec![] }.is_preflight());
        assert!(Error::DuplicateId { id: "x".into() }.is_preflight());
        assert!(!Error::Cancelled.is_preflight());
        assert!(!Error::state("disk full").is_preflight());
    }

    #[test]
    fn test_node_local_classes() {
        let fatal = Error::ProviderFatal {
            node: "queue".into(),
            attempts: 1,
            source: ProviderError::PermissionDenied {
                message: "no".into(),
            },
        };
        assert!(fatal.class().is_node_local());
        assert!(fatal.provider_error().is_some());

        let unresolved = Error::UnresolvedOutput {
            graph: "g".into(),
            node: "n".into(),
            output: "arn".into(),
        };
        assert_eq!(unresolved.class(), ErrorClass::Binding);
        assert!(unresolved.provider_error().is_none());
    }
}
