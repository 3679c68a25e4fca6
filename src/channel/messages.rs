// Wire messages exchanged over a session's realtime channel
//
// Every message is a JSON object with a `type` discriminator and a `data`
// payload. The session id is bound by the connection path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    Decision, InterviewOutcome, Persona, PersonaSummary, ReportAction, ReportApproval,
    ReportPreview, ReportSections, Stage,
};

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Advisory progress; never replayed
    #[serde(rename = "progress")]
    Progress(ProgressData),

    #[serde(rename = "suspend:worker_count")]
    SuspendWorkerCount(WorkerCountPrompt),

    #[serde(rename = "suspend:report_approval")]
    SuspendReportApproval(ReportApprovalPrompt),

    /// Full draft pushed in answer to `viewFull`
    #[serde(rename = "report:full")]
    ReportFull(FullReport),

    #[serde(rename = "result")]
    Result(SessionResult),

    #[serde(rename = "error")]
    Error(ErrorData),
}

impl ServerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Progress(_) => "progress",
            ServerMessage::SuspendWorkerCount(_) => "suspend:worker_count",
            ServerMessage::SuspendReportApproval(_) => "suspend:report_approval",
            ServerMessage::ReportFull(_) => "report:full",
            ServerMessage::Result(_) => "result",
            ServerMessage::Error(_) => "error",
        }
    }

    pub fn is_suspension(&self) -> bool {
        matches!(
            self,
            ServerMessage::SuspendWorkerCount(_) | ServerMessage::SuspendReportApproval(_)
        )
    }

    pub fn progress(stage: Stage, message: impl Into<String>) -> Self {
        ServerMessage::Progress(ProgressData::new(stage, message))
    }

    pub fn advisory(error: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorData {
            error: error.into(),
            fatal: false,
        })
    }

    pub fn fatal(error: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorData {
            error: error.into(),
            fatal: true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    pub message: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressData {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stage,
            sub_activity: None,
            activity: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_sub_activity(mut self, sub_activity: impl Into<String>) -> Self {
        self.sub_activity = Some(sub_activity.into());
        self
    }

    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activity = Some(activity);
        self
    }
}

/// Structured detail attached to a progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personas: Option<Vec<PersonaSummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCountPrompt {
    pub default_count: usize,
    pub max_count: usize,
    pub personas: Vec<PersonaSummary>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportApprovalPrompt {
    pub topic: String,
    pub preview: ReportPreview,
    pub full_report: ReportSections,
    pub options: Vec<ReportAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullReport {
    pub version: u32,
    pub sections: ReportSections,
    /// Sections assembled into one markdown document
    pub markdown: String,
}

/// Terminal artifacts of a completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub topic: String,
    pub personas: Vec<Persona>,
    pub interview_count: usize,
    pub successful_interviews: usize,
    pub transcripts: Vec<InterviewOutcome>,
    pub report: ReportSections,
    pub final_report: String,
    pub report_version: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error: String,
    pub fatal: bool,
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "decision:worker_count")]
    WorkerCount(WorkerCountDecision),

    #[serde(rename = "decision:report_approval")]
    ReportApproval(ReportApproval),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCountDecision {
    #[serde(alias = "count", alias = "worker_count")]
    pub worker_count: i64,
}

impl From<ClientMessage> for Decision {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::WorkerCount(d) => Decision::WorkerCount(d.worker_count),
            ClientMessage::ReportApproval(a) => Decision::ReportApproval(a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportAction;

    #[test]
    fn test_server_message_envelope() {
        let msg = ServerMessage::progress(Stage::InterviewsRunning, "Interviewing");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["data"]["stage"], "interviews_running");
        assert_eq!(json["data"]["message"], "Interviewing");
        assert!(json["data"].get("subActivity").is_none());

        let msg = ServerMessage::SuspendWorkerCount(WorkerCountPrompt {
            default_count: 3,
            max_count: 3,
            personas: vec![],
            message: "How many?".to_string(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "suspend:worker_count");
        assert_eq!(json["data"]["defaultCount"], 3);
        assert_eq!(msg.type_name(), "suspend:worker_count");
        assert!(msg.is_suspension());
    }

    #[test]
    fn test_error_message() {
        let json = serde_json::to_value(ServerMessage::advisory("ignored")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "data": {"error": "ignored", "fatal": false}}));
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "decision:worker_count", "data": {"workerCount": 2}}"#)
                .unwrap();
        assert_eq!(Decision::from(msg), Decision::WorkerCount(2));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "decision:worker_count", "data": {"count": -4}}"#)
                .unwrap();
        assert_eq!(Decision::from(msg), Decision::WorkerCount(-4));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "decision:report_approval", "data": {"action": "rewrite", "feedback": "add more data"}}"#,
        )
        .unwrap();
        match Decision::from(msg) {
            Decision::ReportApproval(a) => {
                assert_eq!(a.action, ReportAction::Rewrite);
                assert_eq!(a.feedback.as_deref(), Some("add more data"));
            }
            other => panic!("unexpected decision: {:?}", other),
        }

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "decision:publish", "data": {}}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }
}
