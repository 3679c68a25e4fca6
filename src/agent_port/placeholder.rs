// Offline agent that produces deterministic placeholder content
//
// Used when no model provider is configured, and for local runs of the
// full workflow without network access.

use async_trait::async_trait;

use super::llm::CLOSING_PHRASE;
use super::{AgentError, AgentPort, TurnReply};
use crate::models::{
    InterviewTranscript, Persona, PersonaPlan, ReportDraft, ReportSections, Speaker, Turn,
};

/// Analyst questions asked in order before closing
const QUESTIONS: &[&str] = &[
    "What is the most important recent development in this area?",
    "Which concrete example best illustrates that development?",
    "What risks or open problems do practitioners underestimate?",
];

pub struct PlaceholderAgent;

impl PlaceholderAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlaceholderAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Default analyst angles, in generation order
fn default_personas(topic: &str) -> Vec<Persona> {
    let angles = [
        (
            "Sarah Johnson",
            "Policy Analyst",
            "Public Policy Institute",
            "Regulation, incentives and the political economy",
        ),
        (
            "Michael Chen",
            "Technology Researcher",
            "University Research Lab",
            "Technical maturity, costs and adoption barriers",
        ),
        (
            "Elena Garcia",
            "Industry Strategist",
            "Independent Consultancy",
            "Market dynamics, business models and investment",
        ),
        (
            "David Kim",
            "Social Impact Researcher",
            "Civic Research Foundation",
            "Effects on communities, equity and public acceptance",
        ),
        (
            "Priya Patel",
            "Risk Analyst",
            "Global Risk Forum",
            "Failure modes, security and long-term uncertainty",
        ),
    ];

    angles
        .iter()
        .map(|(name, role, affiliation, focus)| Persona {
            name: name.to_string(),
            role: role.to_string(),
            affiliation: affiliation.to_string(),
            description: format!("{} of {}.", focus, topic),
        })
        .collect()
}

#[async_trait]
impl AgentPort for PlaceholderAgent {
    async fn generate_outline_and_personas(
        &self,
        topic: &str,
        max_personas: usize,
    ) -> Result<PersonaPlan, AgentError> {
        let personas: Vec<Persona> = default_personas(topic)
            .into_iter()
            .take(max_personas)
            .collect();

        let outline = personas
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.description))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(PersonaPlan { outline, personas })
    }

    async fn conduct_interview_turn(
        &self,
        transcript: &InterviewTranscript,
        persona: &Persona,
        topic: &str,
    ) -> Result<TurnReply, AgentError> {
        let speaker = transcript
            .last_speaker()
            .map(|s| s.other())
            .unwrap_or(Speaker::Analyst);

        let asked = transcript
            .turns()
            .iter()
            .filter(|t| t.speaker == Speaker::Analyst)
            .count();

        let turn = match speaker {
            Speaker::Analyst if asked >= QUESTIONS.len() => {
                return Ok(TurnReply::Closing(Some(Turn::new(
                    Speaker::Analyst,
                    CLOSING_PHRASE,
                ))))
            }
            Speaker::Analyst if asked == 0 => Turn::new(
                speaker,
                format!(
                    "Hello, I'm {}, {} at {}. {}",
                    persona.name, persona.role, persona.affiliation, QUESTIONS[0]
                ),
            ),
            Speaker::Analyst => Turn::new(speaker, QUESTIONS[asked]),
            Speaker::Expert => Turn::new(
                speaker,
                format!(
                    "*Placeholder answer - no model provider configured.* On {}, \
                     regarding {}: configure a provider to get a grounded answer.",
                    topic,
                    persona.description.trim_end_matches('.').to_lowercase()
                ),
            ),
        };

        Ok(TurnReply::Next(turn))
    }

    async fn draft_report(
        &self,
        topic: &str,
        transcripts: &[InterviewTranscript],
        prior: Option<&ReportDraft>,
        feedback: Option<&str>,
    ) -> Result<ReportSections, AgentError> {
        let mut body = String::from("## Insights\n");
        for transcript in transcripts {
            body.push_str(&format!(
                "\n### Perspective of {}\n\n{} turns recorded.\n",
                transcript.persona_name,
                transcript.len()
            ));
        }
        if let Some(draft) = prior {
            body.push_str(&format!("\nRevised from version {}.\n", draft.version));
        }
        if let Some(feedback) = feedback {
            body.push_str(&format!("\n### Revision Notes\n\n{}\n", feedback));
        }

        Ok(ReportSections {
            introduction: format!(
                "# {}\n\n## Introduction\n\n*Placeholder report - no model provider configured.* \
                 This report draws on {} interviews.",
                topic,
                transcripts.len()
            ),
            body,
            conclusion: format!(
                "## Conclusion\n\nConfigure a model provider to research {} for real.",
                topic
            ),
        })
    }
}
