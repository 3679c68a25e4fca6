//! Research session state and its single-writer state machine
//!
//! [`Session`] holds the mutable workflow state. Only the
//! [`SessionMachine`] task that owns it mutates it; everyone else reads
//! [`SessionSnapshot`]s published over a watch channel.

mod machine;

pub use machine::{MachineOptions, SessionMachine};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::agent_port::AgentError;
use crate::models::{
    is_suspension_stage, is_terminal_stage, transition_stage, InterviewOutcome,
    InterviewTranscript, PendingDecision, Persona, PersonaSummary, ReportDraft, SessionConfig,
    Stage, StateTransitionError,
};

/// Fatal reasons; each one ends the session in `failed`
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Agent call failed: {0}")]
    Agent(#[from] AgentError),

    #[error("No personas were generated for the topic")]
    NoPersonas,

    #[error("All {0} interviews failed")]
    NoSuccessfulInterviews(usize),

    #[error("No decision received within {timeout:?} while in {stage}")]
    SuspensionTimeout { stage: Stage, timeout: Duration },

    #[error("Session cancelled")]
    Cancelled,

    #[error(transparent)]
    Transition(#[from] StateTransitionError),
}

/// Everything the workflow has produced so far
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub outline: Option<String>,
    pub personas: Vec<Persona>,
    /// One per persona, in persona order
    pub outcomes: Vec<InterviewOutcome>,
    pub worker_count: Option<usize>,
    pub draft: Option<ReportDraft>,
    /// Feedback received with each rewrite, oldest first
    pub feedback_history: Vec<String>,
    last_version: u32,
}

impl Artifacts {
    /// Transcripts of usable interviews, in persona order
    pub fn usable_transcripts(&self) -> Vec<InterviewTranscript> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.transcript.clone())
            .collect()
    }

    pub fn successful_interviews(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: Stage,
    pub entered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub topic: String,
    pub config: SessionConfig,
    pub artifacts: Artifacts,
    stage: Stage,
    pending: Option<PendingDecision>,
    history: Vec<StageRecord>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, topic: impl Into<String>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            topic: topic.into(),
            config,
            artifacts: Artifacts::default(),
            stage: Stage::Setup,
            pending: None,
            history: vec![StageRecord {
                stage: Stage::Setup,
                entered_at: now,
            }],
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn pending(&self) -> Option<&PendingDecision> {
        self.pending.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal_stage(self.stage)
    }

    fn enter(&mut self, target: Stage) -> Result<(), StateTransitionError> {
        self.stage = transition_stage(self.stage, target)?;
        self.updated_at = Utc::now();
        self.history.push(StageRecord {
            stage: target,
            entered_at: self.updated_at,
        });
        Ok(())
    }

    /// Move to a non-suspension stage, consuming any open suspension
    pub fn advance(&mut self, target: Stage) -> Result<(), StateTransitionError> {
        if is_suspension_stage(target) {
            return Err(StateTransitionError::PendingMismatch(target));
        }
        self.enter(target)?;
        self.pending = None;
        Ok(())
    }

    /// Enter the suspension stage that `pending` belongs to
    pub fn suspend(&mut self, pending: PendingDecision) -> Result<(), StateTransitionError> {
        self.enter(pending.stage())?;
        self.pending = Some(pending);
        Ok(())
    }

    /// Record a fatal error and move to `failed`
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), StateTransitionError> {
        self.enter(Stage::Failed)?;
        self.pending = None;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Allocate the next report version; versions are never reused
    pub fn next_report_version(&mut self) -> u32 {
        self.artifacts.last_version += 1;
        self.artifacts.last_version
    }

    pub fn stage_history(&self) -> Vec<Stage> {
        self.history.iter().map(|r| r.stage).collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            topic: self.topic.clone(),
            config: self.config.clone(),
            stage: self.stage,
            pending_decision: self.pending.clone(),
            stage_history: self.history.clone(),
            outline: self.artifacts.outline.clone(),
            personas: self.artifacts.personas.iter().map(|p| p.summary()).collect(),
            worker_count: self.artifacts.worker_count,
            interview_count: self.artifacts.outcomes.len(),
            successful_interviews: self.artifacts.successful_interviews(),
            report_version: self.artifacts.draft.as_ref().map(|d| d.version),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only view of a session published after every mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub topic: String,
    pub config: SessionConfig,
    pub stage: Stage,
    pub pending_decision: Option<PendingDecision>,
    pub stage_history: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<String>,
    pub personas: Vec<PersonaSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    pub interview_count: usize,
    pub successful_interviews: usize,
    pub report_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn is_terminal(&self) -> bool {
        is_terminal_stage(self.stage)
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.stage_history.iter().map(|r| r.stage).collect()
    }
}
