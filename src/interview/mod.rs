//! A single bounded interview between one persona and the agent
//!
//! An interview ends when the turn cap is reached, when an utterance
//! matches the closing signal, or when the agent closes it. A timeout or an
//! agent failure after the first turn keeps what was said as a partial
//! transcript; a task that produced nothing reports a failure.

use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent_port::{with_timeout, AgentPort, TurnReply};
use crate::config::Settings;
use crate::models::{InterviewOutcome, InterviewStatus, InterviewTranscript, Persona};

/// Case-insensitive closing-intent matcher
#[derive(Debug, Clone)]
pub struct ClosingSignal(Regex);

impl ClosingSignal {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(Self)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct InterviewLimits {
    /// Question/answer exchanges; the utterance cap is twice this
    pub max_turns: usize,
    /// Whole-interview deadline
    pub timeout: Duration,
    /// Per-turn agent call limit
    pub call_timeout: Duration,
    pub closing_signal: ClosingSignal,
}

impl InterviewLimits {
    pub fn from_settings(settings: &Settings, max_turns: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            max_turns,
            timeout: settings.interview.timeout(),
            call_timeout: settings.session.agent_call_timeout(),
            closing_signal: ClosingSignal::new(&settings.interview.closing_signal)?,
        })
    }

    pub fn with_max_turns(&self, max_turns: usize) -> Self {
        Self {
            max_turns,
            ..self.clone()
        }
    }

    pub fn utterance_cap(&self) -> usize {
        self.max_turns.max(1) * 2
    }
}

/// One persona's interview, owned by the task that runs it
pub struct InterviewTask {
    pub index: usize,
    pub persona: Persona,
    pub topic: String,
    agent: Arc<dyn AgentPort>,
    limits: Arc<InterviewLimits>,
}

impl InterviewTask {
    pub fn new(
        index: usize,
        persona: Persona,
        topic: impl Into<String>,
        agent: Arc<dyn AgentPort>,
        limits: Arc<InterviewLimits>,
    ) -> Self {
        Self {
            index,
            persona,
            topic: topic.into(),
            agent,
            limits,
        }
    }

    /// Run the interview to a terminal outcome
    pub async fn run(self, cancel: CancellationToken) -> InterviewOutcome {
        let deadline = Instant::now() + self.limits.timeout;
        let cap = self.limits.utterance_cap();
        let mut transcript = InterviewTranscript::new(&self.persona.name);

        let status = loop {
            if transcript.len() >= cap {
                break InterviewStatus::Completed {
                    closed_early: false,
                };
            }

            let call = with_timeout(
                self.limits.call_timeout,
                self.agent
                    .conduct_interview_turn(&transcript, &self.persona, &self.topic),
            );

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break InterviewStatus::Failed { error: "cancelled".to_string() };
                }
                reply = tokio::time::timeout_at(deadline, call) => reply,
            };

            match reply {
                Err(_) => {
                    log::warn!(
                        "[Interview] {} timed out after {} utterances",
                        self.persona.name,
                        transcript.len()
                    );
                    break InterviewStatus::Partial {
                        reason: format!("interview timed out after {:?}", self.limits.timeout),
                    };
                }
                Ok(Err(e)) => {
                    log::warn!("[Interview] {} agent call failed: {}", self.persona.name, e);
                    if transcript.is_empty() {
                        break InterviewStatus::Failed {
                            error: e.to_string(),
                        };
                    }
                    break InterviewStatus::Partial {
                        reason: e.to_string(),
                    };
                }
                Ok(Ok(TurnReply::Next(turn))) => {
                    let closing = self.limits.closing_signal.matches(&turn.text);
                    transcript.push(turn);
                    if closing {
                        break InterviewStatus::Completed { closed_early: true };
                    }
                }
                Ok(Ok(TurnReply::Closing(turn))) => {
                    if let Some(turn) = turn {
                        transcript.push(turn);
                    }
                    break InterviewStatus::Completed { closed_early: true };
                }
            }
        };

        // Nothing said means nothing usable, whatever the reason
        let status = match status {
            InterviewStatus::Failed { .. } => status,
            _ if transcript.is_empty() => InterviewStatus::Failed {
                error: "interview produced no turns".to_string(),
            },
            _ => status,
        };

        log::debug!(
            "[Interview] {} finished: {:?} ({} utterances)",
            self.persona.name,
            status,
            transcript.len()
        );

        InterviewOutcome {
            index: self.index,
            status,
            transcript,
        }
    }
}
