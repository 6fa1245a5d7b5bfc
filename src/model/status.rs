use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{CoordinatorError, CoordinatorResult};

/// Provisioning state of a single router.
///
/// `Pending → Processing → {Completed | Errored}`. The wire encoding keeps
/// the values the provisioning workers already exchange: pending is the
/// empty string and `processed` is read as `Processing`.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouterStatus {
    #[default]
    #[serde(rename = "", alias = "pending")]
    Pending,
    #[serde(rename = "processing", alias = "processed")]
    Processing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "errored")]
    Errored,
}

impl RouterStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouterStatus::Completed | RouterStatus::Errored)
    }

    /// Whether the scheduler may pick this router up
    pub fn is_schedulable(&self) -> bool {
        matches!(self, RouterStatus::Pending)
    }

    /// Validate moving from `self` to `to` and return the new status.
    pub fn transition(self, to: RouterStatus) -> CoordinatorResult<RouterStatus> {
        use RouterStatus::*;

        match (self, to) {
            (Pending, Processing) | (Pending, Completed) | (Pending, Errored) => Ok(to),
            (Processing, Completed) | (Processing, Errored) => Ok(to),
            (Pending, Pending)
            | (Processing, Pending)
            | (Processing, Processing)
            | (Completed, _)
            | (Errored, _) => Err(CoordinatorError::InvalidTransition { from: self, to }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouterStatus::Pending => "pending",
            RouterStatus::Processing => "processing",
            RouterStatus::Completed => "completed",
            RouterStatus::Errored => "errored",
        }
    }
}

impl fmt::Display for RouterStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overall state of an aggregate. `InProgress` is stored as the empty string.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateStatus {
    #[default]
    #[serde(rename = "")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
}

impl AggregateStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AggregateStatus::InProgress)
    }
}
