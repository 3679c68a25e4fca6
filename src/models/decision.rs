// Client decisions and the suspension markers that await them

use serde::{Deserialize, Serialize};

use super::stage::Stage;

/// What the client wants done with the current report draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportAction {
    Approve,
    Rewrite,
    #[serde(alias = "view_full")]
    ViewFull,
}

impl ReportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportAction::Approve => "approve",
            ReportAction::Rewrite => "rewrite",
            ReportAction::ViewFull => "viewFull",
        }
    }

    pub fn all() -> &'static [ReportAction] {
        &[
            ReportAction::Approve,
            ReportAction::Rewrite,
            ReportAction::ViewFull,
        ]
    }
}

impl std::fmt::Display for ReportAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a rewrite should treat the previous draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteType {
    /// Revise the prior draft using the feedback
    Feedback,
    /// Draft again from the transcripts only
    Complete,
}

impl Default for RewriteType {
    fn default() -> Self {
        RewriteType::Feedback
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportApproval {
    pub action: ReportAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, alias = "rewrite_type", skip_serializing_if = "Option::is_none")]
    pub rewrite_type: Option<RewriteType>,
}

impl ReportApproval {
    pub fn approve() -> Self {
        Self {
            action: ReportAction::Approve,
            feedback: None,
            rewrite_type: None,
        }
    }

    pub fn rewrite(feedback: impl Into<String>) -> Self {
        Self {
            action: ReportAction::Rewrite,
            feedback: Some(feedback.into()),
            rewrite_type: Some(RewriteType::Feedback),
        }
    }

    pub fn view_full() -> Self {
        Self {
            action: ReportAction::ViewFull,
            feedback: None,
            rewrite_type: None,
        }
    }

    /// Feedback text with surrounding whitespace removed, if any is left
    pub fn trimmed_feedback(&self) -> Option<&str> {
        self.feedback
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

/// A client decision, consumed exactly once by the stage awaiting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Raw requested count; the state machine clamps it
    WorkerCount(i64),
    ReportApproval(ReportApproval),
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::WorkerCount(_) => DecisionKind::WorkerCount,
            Decision::ReportApproval(_) => DecisionKind::ReportApproval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    WorkerCount,
    ReportApproval,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::WorkerCount => write!(f, "worker_count"),
            DecisionKind::ReportApproval => write!(f, "report_approval"),
        }
    }
}

/// Marker for an open suspension point and the input it expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingDecision {
    #[serde(rename_all = "camelCase")]
    WorkerCount { default_count: usize, max_count: usize },
    #[serde(rename_all = "camelCase")]
    ReportApproval { version: u32 },
}

impl PendingDecision {
    /// The suspension stage this marker belongs to
    pub fn stage(&self) -> Stage {
        match self {
            PendingDecision::WorkerCount { .. } => Stage::WorkerCountSuspended,
            PendingDecision::ReportApproval { .. } => Stage::ReportSuspended,
        }
    }

    pub fn expects(&self) -> DecisionKind {
        match self {
            PendingDecision::WorkerCount { .. } => DecisionKind::WorkerCount,
            PendingDecision::ReportApproval { .. } => DecisionKind::ReportApproval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_action_parsing() {
        let a: ReportApproval = serde_json::from_str(r#"{"action": "viewFull"}"#).unwrap();
        assert_eq!(a.action, ReportAction::ViewFull);

        let a: ReportApproval = serde_json::from_str(r#"{"action": "view_full"}"#).unwrap();
        assert_eq!(a.action, ReportAction::ViewFull);

        let a: ReportApproval = serde_json::from_str(
            r#"{"action": "rewrite", "feedback": "add more data", "rewrite_type": "complete"}"#,
        )
        .unwrap();
        assert_eq!(a.action, ReportAction::Rewrite);
        assert_eq!(a.trimmed_feedback(), Some("add more data"));
        assert_eq!(a.rewrite_type, Some(RewriteType::Complete));

        assert!(serde_json::from_str::<ReportApproval>(r#"{"action": "publish"}"#).is_err());
    }

    #[test]
    fn test_blank_feedback_is_none() {
        let a = ReportApproval::rewrite("   ");
        assert_eq!(a.trimmed_feedback(), None);
    }

    #[test]
    fn test_pending_decision_stage() {
        let pending = PendingDecision::WorkerCount {
            default_count: 3,
            max_count: 3,
        };
        assert_eq!(pending.stage(), Stage::WorkerCountSuspended);
        assert_eq!(pending.expects(), DecisionKind::WorkerCount);

        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["kind"], "worker_count");
        assert_eq!(json["defaultCount"], 3);

        let pending = PendingDecision::ReportApproval { version: 1 };
        assert_eq!(pending.stage(), Stage::ReportSuspended);
        assert_eq!(
            Decision::ReportApproval(ReportApproval::approve()).kind(),
            pending.expects()
        );
    }
}
