// Shared scripted collaborators for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storm_session_lib::agent_port::{AgentError, AgentPort, AgentProvider, TurnReply};
use storm_session_lib::channel::{ChannelHandle, ServerMessage};
use storm_session_lib::config::Settings;
use storm_session_lib::models::{
    InterviewTranscript, ModelSelection, Persona, PersonaPlan, ReportDraft, ReportSections,
    Speaker, Turn,
};
use storm_session_lib::registry::{RegistryConfig, SessionRegistry};

/// One recorded `draft_report` call
#[derive(Debug, Clone, PartialEq)]
pub struct DraftCall {
    pub transcripts: Vec<String>,
    pub prior_version: Option<u32>,
    pub feedback: Option<String>,
}

/// Agent with controllable latency and failures that records what it was asked
pub struct ScriptedAgent {
    latency_ms: (u64, u64),
    failing: HashSet<String>,
    fail_all: bool,
    fail_outline: bool,
    fail_draft: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    turn_calls: AtomicUsize,
    drafts: Mutex<Vec<DraftCall>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            latency_ms: (0, 0),
            failing: HashSet::new(),
            fail_all: false,
            fail_outline: false,
            fail_draft: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            turn_calls: AtomicUsize::new(0),
            drafts: Mutex::new(Vec::new()),
        }
    }

    /// Random per-turn latency in `min..=max` milliseconds
    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms);
        self
    }

    /// Interviews with these personas fail on their first turn
    pub fn failing(mut self, names: &[&str]) -> Self {
        self.failing = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Persona generation fails
    pub fn failing_outline(mut self) -> Self {
        self.fail_outline = true;
        self
    }

    /// Every report draft fails
    pub fn failing_draft(mut self) -> Self {
        self.fail_draft = true;
        self
    }

    /// Highest number of interview-turn calls seen running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn turn_calls(&self) -> usize {
        self.turn_calls.load(Ordering::SeqCst)
    }

    pub fn draft_calls(&self) -> Vec<DraftCall> {
        self.drafts.lock().unwrap().clone()
    }

    fn latency(&self) -> Duration {
        let (min, max) = self.latency_ms;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

pub fn persona_name(index: usize) -> String {
    format!("Analyst {}", index + 1)
}

#[async_trait]
impl AgentPort for ScriptedAgent {
    async fn generate_outline_and_personas(
        &self,
        topic: &str,
        max_personas: usize,
    ) -> Result<PersonaPlan, AgentError> {
        if self.fail_outline {
            return Err(AgentError::Provider {
                status: 500,
                message: "outline model unavailable".to_string(),
            });
        }
        let personas = (0..max_personas)
            .map(|i| Persona {
                name: persona_name(i),
                role: "Researcher".to_string(),
                affiliation: "Test Institute".to_string(),
                description: format!("Angle {} on {}", i + 1, topic),
            })
            .collect();
        Ok(PersonaPlan {
            outline: format!("Outline for {}", topic),
            personas,
        })
    }

    async fn conduct_interview_turn(
        &self,
        transcript: &InterviewTranscript,
        persona: &Persona,
        _topic: &str,
    ) -> Result<TurnReply, AgentError> {
        self.turn_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.failing.contains(&persona.name) {
            return Err(AgentError::Provider {
                status: 503,
                message: format!("{} unavailable", persona.name),
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency()).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let speaker = transcript
            .last_speaker()
            .map(|s| s.other())
            .unwrap_or(Speaker::Analyst);
        Ok(TurnReply::Next(Turn::new(
            speaker,
            format!("{} says something ({})", persona.name, transcript.len()),
        )))
    }

    async fn draft_report(
        &self,
        topic: &str,
        transcripts: &[InterviewTranscript],
        prior: Option<&ReportDraft>,
        feedback: Option<&str>,
    ) -> Result<ReportSections, AgentError> {
        self.drafts.lock().unwrap().push(DraftCall {
            transcripts: transcripts.iter().map(|t| t.persona_name.clone()).collect(),
            prior_version: prior.map(|d| d.version),
            feedback: feedback.map(str::to_string),
        });
        if self.fail_draft {
            return Err(AgentError::Provider {
                status: 500,
                message: "writer model unavailable".to_string(),
            });
        }

        Ok(ReportSections {
            introduction: format!("# {}\n\nIntroduction.", topic),
            body: format!(
                "Findings from {} interviews.{}",
                transcripts.len(),
                feedback
                    .map(|f| format!(" Addressed: {}", f))
                    .unwrap_or_default()
            ),
            conclusion: "## Conclusion\n\nDone.".to_string(),
        })
    }
}

/// Hands every session the same agent
pub struct FixedProvider(pub Arc<ScriptedAgent>);

impl AgentProvider for FixedProvider {
    fn agent_for(&self, _selection: &ModelSelection) -> Result<Arc<dyn AgentPort>, AgentError> {
        Ok(self.0.clone())
    }
}

pub fn registry_config() -> RegistryConfig {
    let mut config = RegistryConfig::from_settings(&Settings::default()).unwrap();
    config.machine.suspension_timeout = Duration::from_secs(10);
    config.machine.call_timeout = Duration::from_secs(5);
    config.interview.timeout = Duration::from_secs(10);
    config
}

pub fn registry(agent: Arc<ScriptedAgent>, config: RegistryConfig) -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::new(Arc::new(FixedProvider(agent)), config))
}

/// Receive until a message of type `type_name` arrives
pub async fn next_of(handle: &mut ChannelHandle, type_name: &str) -> Arc<ServerMessage> {
    let wait = async {
        loop {
            match handle.recv().await {
                Some(message) if message.type_name() == type_name => return message,
                Some(_) => continue,
                None => panic!("channel closed while waiting for {}", type_name),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", type_name))
}

/// Receive every remaining message until the channel closes
pub async fn drain(handle: &mut ChannelHandle) -> Vec<Arc<ServerMessage>> {
    let wait = async {
        let mut messages = Vec::new();
        while let Some(message) = handle.recv().await {
            messages.push(message);
        }
        messages
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("channel did not close")
}
