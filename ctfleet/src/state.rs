//! Lifecycle states and reconciliation results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

/// Lifecycle state requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// Resource exists, running state untouched.
    Present,
    /// Resource does not exist.
    Absent,
    /// Resource exists, is running and reachable.
    Started,
    /// Resource exists only if it already did, and is not running.
    Stopped,
}

impl DesiredState {
    /// Whether this state asks for a reachable resource.
    pub fn implies_running(self) -> bool {
        matches!(self, DesiredState::Started)
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DesiredState::Present => "present",
            DesiredState::Absent => "absent",
            DesiredState::Started => "started",
            DesiredState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Status reported by the hypervisor for a resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedStatus {
    Absent,
    Created,
    Running,
    Stopped,
    Unknown,
}

impl ObservedStatus {
    pub fn exists(self) -> bool {
        !matches!(self, ObservedStatus::Absent | ObservedStatus::Unknown)
    }
}

impl fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObservedStatus::Absent => "absent",
            ObservedStatus::Created => "created",
            ObservedStatus::Running => "running",
            ObservedStatus::Stopped => "stopped",
            ObservedStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for ObservedStatus {
    type Err = std::convert::Infallible;

    /// Never fails: anything the hypervisor reports that we do not model is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "absent" => ObservedStatus::Absent,
            "created" => ObservedStatus::Created,
            "running" => ObservedStatus::Running,
            "stopped" => ObservedStatus::Stopped,
            _ => ObservedStatus::Unknown,
        })
    }
}

/// Overall outcome of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Unchanged,
    Changed,
    Failed,
}

/// A mutating call that completed during a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Start,
    Stop,
    ForceStop,
    Delete,
}

/// Result of `Reconciler::reconcile`. Built fresh per call.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub outcome: Outcome,
    pub status: ObservedStatus,
    /// Mutations that completed, in order. Non-empty on a `Failed` result
    /// means the failure happened part way through.
    pub actions: Vec<Action>,
    pub error: Option<ReconcileError>,
}

impl ReconciliationResult {
    pub(crate) fn success(status: ObservedStatus, actions: Vec<Action>) -> Self {
        let outcome = if actions.is_empty() {
            Outcome::Unchanged
        } else {
            Outcome::Changed
        };
        Self {
            outcome,
            status,
            actions,
            error: None,
        }
    }

    pub(crate) fn failed(status: ObservedStatus, actions: Vec<Action>, error: ReconcileError) -> Self {
        Self {
            outcome: Outcome::Failed,
            status,
            actions,
            error: Some(error),
        }
    }

    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_lenient() {
        assert_eq!("running".parse::<ObservedStatus>().unwrap(), ObservedStatus::Running);
        assert_eq!("Stopped".parse::<ObservedStatus>().unwrap(), ObservedStatus::Stopped);
        assert_eq!("paused".parse::<ObservedStatus>().unwrap(), ObservedStatus::Unknown);
    }

    #[test]
    fn test_outcome_follows_actions() {
        let r = ReconciliationResult::success(ObservedStatus::Running, vec![]);
        assert_eq!(r.outcome, Outcome::Unchanged);
        assert!(!r.changed());

        let r = ReconciliationResult::success(ObservedStatus::Running, vec![Action::Start]);
        assert_eq!(r.outcome, Outcome::Changed);
        assert!(r.changed());
    }

    #[test]
    fn test_failed_keeps_partial_actions() {
        let r = ReconciliationResult::failed(
            ObservedStatus::Running,
            vec![Action::Create, Action::Start],
            ReconcileError::Cancelled,
        );
        assert!(r.is_failed());
        assert!(r.changed());
        assert_eq!(r.error.as_ref().map(|e| e.kind()), Some("cancelled"));
    }
}
