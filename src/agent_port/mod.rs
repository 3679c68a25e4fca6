//! Content-generation boundary
//!
//! The session machine never produces research content itself. It asks an
//! [`AgentPort`] for the outline and personas, for each interview turn and
//! for every report draft. Every call may fail or time out; callers treat a
//! failure as a per-call event.

pub mod llm;
pub mod placeholder;

pub use llm::LlmAgent;
pub use placeholder::PlaceholderAgent;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProvidersSettings;
use crate::models::{
    InterviewTranscript, ModelProvider, ModelSelection, Persona, PersonaPlan, ReportDraft,
    ReportSections, Turn,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    #[error("Agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),

    #[error("Agent configuration error: {0}")]
    Configuration(String),

    #[error("Agent call cancelled")]
    Cancelled,
}

/// Reply to a request for the next interview turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnReply {
    /// The conversation continues with this turn
    Next(Turn),
    /// The agent ended the interview, optionally with a final turn
    Closing(Option<Turn>),
}

#[async_trait]
pub trait AgentPort: Send + Sync {
    /// Produce an outline and up to `max_personas` analyst personas
    async fn generate_outline_and_personas(
        &self,
        topic: &str,
        max_personas: usize,
    ) -> Result<PersonaPlan, AgentError>;

    /// Produce the next turn of an interview. The speaker alternates,
    /// starting with the analyst.
    async fn conduct_interview_turn(
        &self,
        transcript: &InterviewTranscript,
        persona: &Persona,
        topic: &str,
    ) -> Result<TurnReply, AgentError>;

    /// Draft report sections from the transcripts. A prior draft and
    /// feedback are passed on rewrites.
    async fn draft_report(
        &self,
        topic: &str,
        transcripts: &[InterviewTranscript],
        prior: Option<&ReportDraft>,
        feedback: Option<&str>,
    ) -> Result<ReportSections, AgentError>;
}

/// Builds the agent a session will talk to
pub trait AgentProvider: Send + Sync {
    fn agent_for(&self, selection: &ModelSelection) -> Result<Arc<dyn AgentPort>, AgentError>;
}

/// Provider backed by the configured model credentials
pub struct DefaultAgentProvider {
    providers: ProvidersSettings,
    client: reqwest::Client,
}

impl DefaultAgentProvider {
    pub fn new(providers: ProvidersSettings, request_timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AgentError::Configuration(format!("Failed to build client: {}", e)))?;
        Ok(Self { providers, client })
    }
}

impl AgentProvider for DefaultAgentProvider {
    fn agent_for(&self, selection: &ModelSelection) -> Result<Arc<dyn AgentPort>, AgentError> {
        match selection.provider {
            ModelProvider::Placeholder => Ok(Arc::new(PlaceholderAgent::new())),
            _ => {
                let agent = LlmAgent::from_selection(selection, &self.providers, self.client.clone())?;
                Ok(Arc::new(agent))
            }
        }
    }
}

/// Bound an agent call by `limit`
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout(limit)),
    }
}
