// Session stage state machine with validation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named point in a research session's ordered workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    PersonasPending,
    WorkerCountSuspended,
    InterviewsRunning,
    ReportDrafting,
    ReportSuspended,
    ReportRewriting,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::PersonasPending => "personas_pending",
            Stage::WorkerCountSuspended => "worker_count_suspended",
            Stage::InterviewsRunning => "interviews_running",
            Stage::ReportDrafting => "report_drafting",
            Stage::ReportSuspended => "report_suspended",
            Stage::ReportRewriting => "report_rewriting",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Setup
    }
}

#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Session already in terminal stage: {0}")]
    AlreadyTerminal(Stage),

    #[error("Pending decision does not match stage {0}")]
    PendingMismatch(Stage),
}

/// Validates if a session can move from one stage to another
pub fn can_transition(from: Stage, to: Stage) -> bool {
    match (from, to) {
        // Terminal stages never move
        (Stage::Completed, _) | (Stage::Failed, _) => false,

        // Any live stage can fail
        (_, Stage::Failed) => true,

        (Stage::Setup, Stage::PersonasPending) => true,
        (Stage::PersonasPending, Stage::WorkerCountSuspended) => true,
        (Stage::WorkerCountSuspended, Stage::InterviewsRunning) => true,
        (Stage::InterviewsRunning, Stage::ReportDrafting) => true,
        (Stage::ReportDrafting, Stage::ReportSuspended) => true,
        (Stage::ReportSuspended, Stage::Completed) => true,
        (Stage::ReportSuspended, Stage::ReportRewriting) => true,
        (Stage::ReportRewriting, Stage::ReportDrafting) => true,

        _ => false,
    }
}

/// Validates and performs a stage transition
pub fn transition_stage(current: Stage, target: Stage) -> Result<Stage, StateTransitionError> {
    if is_terminal_stage(current) {
        return Err(StateTransitionError::AlreadyTerminal(current));
    }

    if !can_transition(current, target) {
        return Err(StateTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// Check if a stage is terminal
pub fn is_terminal_stage(stage: Stage) -> bool {
    matches!(stage, Stage::Completed | Stage::Failed)
}

/// Check if a stage blocks waiting for a client decision
pub fn is_suspension_stage(stage: Stage) -> bool {
    matches!(
        stage,
        Stage::WorkerCountSuspended | Stage::ReportSuspended
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Stage; 9] = [
        Stage::Setup,
        Stage::PersonasPending,
        Stage::WorkerCountSuspended,
        Stage::InterviewsRunning,
        Stage::ReportDrafting,
        Stage::ReportSuspended,
        Stage::ReportRewriting,
        Stage::Completed,
        Stage::Failed,
    ];

    #[test]
    fn test_happy_path_is_valid() {
        let mut stage = Stage::Setup;
        for next in &ALL[1..6] {
            stage = transition_stage(stage, *next).unwrap();
        }
        stage = transition_stage(stage, Stage::Completed).unwrap();
        assert_eq!(stage, Stage::Completed);
    }

    #[test]
    fn test_rewrite_loop() {
        assert!(can_transition(Stage::ReportSuspended, Stage::ReportRewriting));
        assert!(can_transition(Stage::ReportRewriting, Stage::ReportDrafting));
        assert!(can_transition(Stage::ReportDrafting, Stage::ReportSuspended));
        assert!(!can_transition(Stage::ReportRewriting, Stage::Completed));
    }

    #[test]
    fn test_suspensions_cannot_be_skipped() {
        assert!(!can_transition(Stage::PersonasPending, Stage::InterviewsRunning));
        assert!(!can_transition(Stage::ReportDrafting, Stage::Completed));
        assert!(!can_transition(Stage::Setup, Stage::ReportDrafting));
    }

    #[test]
    fn test_any_live_stage_can_fail() {
        for stage in ALL.iter().copied().filter(|s| !is_terminal_stage(*s)) {
            assert!(can_transition(stage, Stage::Failed), "{} -> failed", stage);
        }
    }

    #[test]
    fn test_terminal_stages_are_final() {
        for target in ALL {
            assert!(!can_transition(Stage::Completed, target));
            assert!(!can_transition(Stage::Failed, target));
        }
        assert!(matches!(
            transition_stage(Stage::Completed, Stage::Failed),
            Err(StateTransitionError::AlreadyTerminal(Stage::Completed))
        ));
    }

    #[test]
    fn test_same_stage_not_allowed() {
        assert!(!can_transition(Stage::ReportSuspended, Stage::ReportSuspended));
        assert!(transition_stage(Stage::Setup, Stage::Setup).is_err());
    }

    #[test]
    fn test_suspension_stages() {
        let suspended: Vec<Stage> = ALL.into_iter().filter(|s| is_suspension_stage(*s)).collect();
        assert_eq!(
            suspended,
            vec![Stage::WorkerCountSuspended, Stage::ReportSuspended]
        );
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_string(&Stage::WorkerCountSuspended).unwrap();
        assert_eq!(json, "\"worker_count_suspended\"");
        assert_eq!(Stage::ReportSuspended.to_string(), "report_suspended");
    }
}
