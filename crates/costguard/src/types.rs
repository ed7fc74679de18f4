use crate::error::{Error, Result};
use declarative::RunReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Budget accounting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Resets every day
    Daily,
    /// Resets every month
    Monthly,
    /// Resets every quarter
    Quarterly,
    /// Resets every year
    Annually,
}

impl Period {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annually => "annually",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "annually" | "yearly" => Ok(Self::Annually),
            other => Err(format!(
                "unknown period '{other}' (expected daily, monthly, quarterly or annually)"
            )),
        }
    }
}

/// A named spending threshold and the graphs torn down when it is crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRule {
    /// Unique name within the backend scope
    pub name: String,
    /// Amount that must be exceeded to trigger teardown
    pub threshold_amount: f64,
    /// ISO currency code
    pub currency: String,
    /// Accounting period
    pub period: Period,
    /// Graphs torn down on breach
    #[serde(default)]
    pub attached_graph_ids: BTreeSet<String>,
}

impl BudgetRule {
    /// Create a rule with no attached graphs
    pub fn new(
        name: impl Into<String>,
        threshold_amount: f64,
        currency: impl Into<String>,
        period: Period,
    ) -> Self {
        Self {
            name: name.into(),
            threshold_amount,
            currency: currency.into(),
            period,
            attached_graph_ids: BTreeSet::new(),
        }
    }

    /// Attach a graph to the rule
    pub fn attach(mut self, graph_id: impl Into<String>) -> Self {
        self.attached_graph_ids.insert(graph_id.into());
        self
    }

    /// Check the rule before it reaches the backend
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Error::InvalidRule {
            name: self.name.clone(),
            message: message.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !self.threshold_amount.is_finite() || self.threshold_amount <= 0.0 {
            return Err(invalid("threshold must be a positive amount"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(invalid("currency must be a three-letter code such as USD"));
        }
        Ok(())
    }

    /// Check if an amount crosses the threshold
    pub fn is_exceeded_by(&self, amount: f64) -> bool {
        amount > self.threshold_amount
    }
}

/// Notification that actual spend reached some amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    /// Name of the budget rule
    pub budget_name: String,
    /// Spend reported by the notification channel
    pub actual_amount: f64,
}

impl BudgetAlert {
    /// Create an alert
    pub fn new(budget_name: impl Into<String>, actual_amount: f64) -> Self {
        Self {
            budget_name: budget_name.into(),
            actual_amount,
        }
    }

    /// Parse a JSON alert such as `{"budget_name": "b", "actual_amount": 12.5}`
    pub fn from_json(line: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Lifecycle of a registered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorState {
    /// Not known to this monitor
    Unregistered,
    /// Registered and watching
    Registered,
    /// Threshold crossed, teardown issued
    Triggered,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Triggered => "triggered",
        };
        f.write_str(name)
    }
}

/// How a registration was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Registration {
    /// A new rule was created in the backend
    Created,
    /// The subscriber was attached to an existing rule
    Attached,
    /// The backend reports the rule exists but it could not be looked
    /// up; tracked locally only
    Unverified,
}

/// Options for a [`crate::BudgetMonitor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorOptions {
    /// Fail registration when a rule exists but cannot be discovered,
    /// instead of tracking it locally with a warning
    pub strict: bool,
}

/// Result of tearing down one graph.
#[derive(Debug, Clone)]
pub enum TeardownOutcome {
    /// Destroy ran; the report may still be partial
    Destroyed(RunReport),
    /// Destroy could not start
    Error(String),
}

impl TeardownOutcome {
    /// Returns true if every node of the graph is gone
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Destroyed(report) if report.is_success())
    }
}

/// Teardown result for one attached graph.
#[derive(Debug, Clone)]
pub struct GraphTeardown {
    /// Graph that was torn down
    pub graph_id: String,
    /// What happened
    pub outcome: TeardownOutcome,
}

/// Outcome of handling one alert.
#[derive(Debug, Clone)]
pub struct TriggerReport {
    /// Budget the alert named
    pub budget_name: String,
    /// Spend from the alert
    pub actual_amount: f64,
    /// Threshold of the rule
    pub threshold_amount: f64,
    /// Per-graph teardown results, empty when not triggered
    pub teardowns: Vec<GraphTeardown>,
}

impl TriggerReport {
    /// Returns true if the alert crossed the threshold
    pub fn triggered(&self) -> bool {
        self.actual_amount > self.threshold_amount
    }

    /// Graphs whose teardown did not complete
    pub fn failed_graphs(&self) -> Vec<&str> {
        self.teardowns
            .iter()
            .filter(|t| !t.outcome.is_success())
            .map(|t| t.graph_id.as_str())
            .collect()
    }

    /// Returns true if nothing needed tearing down or every teardown completed
    pub fn is_success(&self) -> bool {
        self.failed_graphs().is_empty()
    }
}
