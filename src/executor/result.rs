use std::time::Duration;

use serde::Serialize;

use crate::model::{ActionId, RecognitionResult};

/// Lifecycle of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

/// Outcome of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    /// The guard evaluated to false.
    Skipped,
    /// Interrupted by cancellation or the run deadline before it finished.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub action_id: ActionId,
    pub label: String,
    /// Position inside the sequence that holds the action.
    pub index: usize,
    /// Script repetition this result belongs to (0-based).
    pub iteration: u32,
    pub status: ActionStatus,
    pub message: Option<String>,
    pub duration: Duration,
    /// Recognition outcome for image actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition: Option<RecognitionResult>,
    /// Results of nested actions (loop bodies, conditional branches).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ActionResult>,
}

impl ActionResult {
    pub fn is_failure(&self) -> bool {
        self.status == ActionStatus::Failed
    }
}

/// What a caller gets back from an execution. Partial progress is always kept.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub message: Option<String>,
    pub duration: Duration,
    /// Top-level actions that were attempted (succeeded or failed).
    pub actions_executed: usize,
    pub actions_succeeded: usize,
    pub actions_failed: usize,
    pub actions_skipped: usize,
    /// Top-level results in execution order.
    pub action_results: Vec<ActionResult>,
    /// The action that aborted the run, when the status is `Failed`.
    pub failed_action: Option<ActionId>,
    /// Completed script repetitions.
    pub iterations: u32,
}

impl ExecutionResult {
    pub(crate) fn new(status: ExecutionStatus, action_results: Vec<ActionResult>) -> Self {
        let count = |s| action_results.iter().filter(|r| r.status == s).count();
        let actions_succeeded = count(ActionStatus::Succeeded);
        let actions_failed = count(ActionStatus::Failed);
        let actions_skipped = count(ActionStatus::Skipped);
        Self {
            status,
            message: None,
            duration: Duration::ZERO,
            actions_executed: actions_succeeded + actions_failed,
            actions_succeeded,
            actions_failed,
            actions_skipped,
            action_results,
            failed_action: None,
            iterations: 0,
        }
    }

    /// A run refused before anything was attempted.
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(ExecutionStatus::Failed, Vec::new())
        }
    }

    /// Completed, but at least one action failed under continue-on-error.
    pub fn has_failures(&self) -> bool {
        self.actions_failed > 0
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed && !self.has_failures()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: ActionStatus) -> ActionResult {
        ActionResult {
            action_id: ActionId::new(),
            label: "x".into(),
            index: 0,
            iteration: 0,
            status,
            message: None,
            duration: Duration::ZERO,
            recognition: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn counts_ignore_skipped_and_cancelled() {
        let r = ExecutionResult::new(
            ExecutionStatus::Completed,
            vec![
                result(ActionStatus::Succeeded),
                result(ActionStatus::Failed),
                result(ActionStatus::Skipped),
                result(ActionStatus::Cancelled),
            ],
        );
        assert_eq!(r.actions_executed, 2);
        assert_eq!(r.actions_failed, 1);
        assert_eq!(r.actions_skipped, 1);
        assert!(r.has_failures());
        assert!(!r.is_success());
    }

    #[test]
    fn rejected_runs_are_failed_and_empty() {
        let r = ExecutionResult::rejected("busy");
        assert_eq!(r.status, ExecutionStatus::Failed);
        assert!(r.action_results.is_empty());
        assert!(ExecutionStatus::Timeout.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
    }
}
