use thiserror::Error;

/// Errors that can occur while registering budgets or handling alerts.
#[derive(Debug, Error)]
pub enum Error {
    /// An alert named a budget this monitor never registered
    #[error("unknown budget: {name}")]
    UnknownBudget {
        /// Budget name from the alert
        name: String,
    },

    /// The backend refused to create a rule because one already exists
    #[error("budget rule already exists: {name}")]
    RuleExists {
        /// Rule name
        name: String,
    },

    /// The rule failed validation
    #[error("invalid budget rule '{name}': {message}")]
    InvalidRule {
        /// Rule name
        name: String,
        /// What was wrong with it
        message: String,
    },

    /// The budget backend failed
    #[error("budget backend error: {message}")]
    Backend {
        /// Backend error message
        message: String,
    },
}

impl Error {
    /// Create a backend error from anything displayable.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }

    /// Returns true if the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Backend { .. })
    }

    /// Returns true if the rule exists somewhere this monitor cannot see
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::RuleExists { .. })
    }
}

/// Result type for budget operations
pub type Result<T> = std::result::Result<T, Error>;
