//! Provider trait - the external control plane that creates, updates
//! and deletes resources.
//!
//! The engine never knows what a resource *is*. It hands the provider a
//! kind name and a resolved configuration and gets back a physical id plus
//! named outputs. Implementations live outside this crate.

use crate::node::Config;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Categories of provider errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limiting by the control plane
    Throttling,
    /// Eventual consistency: a dependency is not visible yet
    Consistency,
    /// The call did not complete within its timeout
    Timeout,
    /// The control plane is temporarily unavailable
    Unavailable,
    /// The resource does not exist
    NotFound,
    /// The request was rejected as invalid
    Validation,
    /// The caller lacks permission
    Permission,
    /// The resource is in a conflicting state or already exists
    Conflict,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttling | Self::Consistency | Self::Timeout | Self::Unavailable
        )
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Throttling => "Request throttled",
            Self::Consistency => "Dependency not visible yet",
            Self::Timeout => "Call timed out",
            Self::Unavailable => "Control plane unavailable",
            Self::NotFound => "Resource not found",
            Self::Validation => "Invalid request",
            Self::Permission => "Permission denied",
            Self::Conflict => "Resource conflict",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Throttling => "Lower --jobs or wait before re-running",
            Self::Consistency => "Re-run apply; upstream resources may still be propagating",
            Self::Timeout => "Raise provisioner.call_timeout_secs or check the control plane",
            Self::Unavailable => "Check the provider endpoint and try again",
            Self::NotFound => "The resource was removed outside rigger; re-run apply",
            Self::Validation => "Fix the resource configuration",
            Self::Permission => "Grant the deploying role the missing permission",
            Self::Conflict => "Remove or import the conflicting resource",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors returned by a [`Provider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Rate limited
    #[error("throttled: {message}")]
    Throttled { message: String },

    /// A referenced resource is not visible yet
    #[error("not yet visible: {message}")]
    NotYetVisible { message: String },

    /// The call exceeded its timeout
    #[error("timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    /// Temporary server-side failure
    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    /// No resource with this physical id
    #[error("resource not found: {physical_id}")]
    NotFound { physical_id: String },

    /// The request was rejected
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The caller is not allowed to perform the call
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// Conflicting state (already exists, in use, ...)
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Throttled { .. } => ErrorCategory::Throttling,
            ProviderError::NotYetVisible { .. } => ErrorCategory::Consistency,
            ProviderError::Timeout { .. } => ErrorCategory::Timeout,
            ProviderError::Unavailable { .. } => ErrorCategory::Unavailable,
            ProviderError::NotFound { .. } => ErrorCategory::NotFound,
            ProviderError::Validation { .. } => ErrorCategory::Validation,
            ProviderError::PermissionDenied { .. } => ErrorCategory::Permission,
            ProviderError::Conflict { .. } => ErrorCategory::Conflict,
            ProviderError::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error means the resource is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }
}

/// Per-call context handed to the provider.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Graph the node belongs to
    pub graph_id: String,
    /// Node being provisioned
    pub node_id: String,
    /// Deadline for this single call; exceeding it should yield
    /// [`ProviderError::Timeout`]
    pub timeout: Duration,
    /// 1-indexed attempt number
    pub attempt: u32,
}

impl CallContext {
    /// Create a context for the first attempt.
    pub fn new(graph_id: impl Into<String>, node_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            graph_id: graph_id.into(),
            node_id: node_id.into(),
            timeout,
            attempt: 1,
        }
    }

    /// Same context for a later attempt.
    pub fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }
}

/// What a successful create or update returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provisioned {
    /// Provider-assigned identifier of the live resource
    pub physical_id: String,
    /// Named values other nodes may consume
    pub outputs: BTreeMap<String, String>,
}

impl Provisioned {
    /// Create a result with no outputs.
    pub fn new(physical_id: impl Into<String>) -> Self {
        Self {
            physical_id: physical_id.into(),
            outputs: BTreeMap::new(),
        }
    }

    /// Add an output.
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

/// External control plane.
///
/// Every call must be safe to repeat: the provisioner retries transient
/// failures and may re-issue a create after a crash between the call and
/// the state write.
pub trait Provider: Send + Sync {
    /// Create a resource of `kind` with the given configuration.
    fn create(
        &self,
        kind: &str,
        config: &Config,
        ctx: &CallContext,
    ) -> std::result::Result<Provisioned, ProviderError>;

    /// Update an existing resource in place.
    fn update(
        &self,
        kind: &str,
        physical_id: &str,
        config: &Config,
        ctx: &CallContext,
    ) -> std::result::Result<Provisioned, ProviderError>;

    /// Delete a resource. [`ProviderError::NotFound`] is treated as success
    /// by the provisioner.
    fn delete(
        &self,
        kind: &str,
        physical_id: &str,
        ctx: &CallContext,
    ) -> std::result::Result<(), ProviderError>;
}
