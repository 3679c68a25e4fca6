// Chat-completions adapter for hosted model providers

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{AgentError, AgentPort, TurnReply};
use crate::config::providers::{preset_for, DEFAULT_AZURE_API_VERSION};
use crate::config::ProvidersSettings;
use crate::models::{
    excerpt, InterviewTranscript, ModelProvider, ModelSelection, Persona, PersonaPlan,
    ReportDraft, ReportSections, Speaker, Turn,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Phrase the analyst is told to use when it has what it needs
pub const CLOSING_PHRASE: &str = "Thank you so much for your help!";

// ============================================================================
// Prompts
// ============================================================================

const PERSONA_SYSTEM: &str = "You create AI analyst personas for a research topic.\n\
1. Review the research topic.\n\
2. Pick the most interesting sub-themes.\n\
3. Assign one analyst to each sub-theme.\n\n\
Each analyst has: name (English letters only), role, affiliation, and a detailed \
description of their focus, concerns and motives.\n\n\
Reply with JSON only: {\"outline\": \"...\", \"personas\": [{\"name\": \"...\", \
\"role\": \"...\", \"affiliation\": \"...\", \"description\": \"...\"}]}";

const EXPERT_SYSTEM: &str = "You are an expert being interviewed by an analyst.\n\
Answer with specific, well-grounded information. Cite sources as [1], [2] \
and list them at the end of your answer. Do not invent sources.";

const REPORT_WRITER_SYSTEM: &str = "You are a senior research director and technical writer.\n\
Synthesize the interview transcripts into an original, rigorous report body. \
Do not simply list the notes; find cross-cutting themes and actionable insights. \
Use markdown, start with '## Insights' and use '###' headers for each section. \
Cite sources as [1], [2] and end with a '## Sources' section.";

const INTRO_WRITER_SYSTEM: &str = "You write the introduction of a research report.\n\
Include a compelling title as a '#' header, then a '## Introduction' section of \
about 300 words previewing the report. Use markdown.";

const CONCLUSION_WRITER_SYSTEM: &str = "You write the conclusion of a research report.\n\
Include a '## Conclusion' section of about 300 words that summarizes the key \
findings and points to future directions. Use markdown.";

fn analyst_system(persona: &Persona) -> String {
    format!(
        "You are an analyst interviewing an expert about a specific topic.\n\
Your goal is to draw out insights that are interesting (non-obvious) and \
specific (concrete examples from the expert).\n\n\
Your focus and goals:\n{}\n\
Introduce yourself using your persona name, then ask questions. Keep drilling \
down to refine your understanding. When you are satisfied, end the interview \
with \"{}\"\n\
Stay in character throughout.",
        persona.profile(),
        CLOSING_PHRASE
    )
}

fn turn_prompt(topic: &str, transcript: &InterviewTranscript) -> String {
    if transcript.is_empty() {
        return format!(
            "Topic: {}\n\nThe interview is about to begin. Write your opening message only.",
            topic
        );
    }
    format!(
        "Topic: {}\n\nConversation so far:\n{}\n\nWrite your next message only.",
        topic,
        transcript.render()
    )
}

fn render_transcripts(transcripts: &[InterviewTranscript]) -> String {
    transcripts
        .iter()
        .map(|t| format!("## Interview with {}\n{}", t.persona_name, t.render()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn revision_notes(prior: Option<&ReportDraft>, feedback: Option<&str>) -> String {
    let mut notes = String::new();
    if let Some(draft) = prior {
        notes.push_str(&format!(
            "\n\nPrevious draft (version {}):\n{}",
            draft.version,
            draft.sections.assemble()
        ));
    }
    if let Some(feedback) = feedback {
        notes.push_str(&format!(
            "\n\nReviewer feedback to address in this revision:\n{}",
            feedback
        ));
    }
    notes
}

/// Parse the persona JSON out of a free-form model reply
pub fn parse_persona_plan(response: &str, max_personas: usize) -> Result<PersonaPlan, AgentError> {
    let json_str = match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => {
            return Err(AgentError::InvalidResponse(
                "No JSON object in persona response".to_string(),
            ))
        }
    };

    let parsed: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::InvalidResponse(format!("Malformed persona JSON: {}", e)))?;

    let outline = parsed
        .get("outline")
        .and_then(|o| o.as_str())
        .unwrap_or_default()
        .to_string();

    let personas: Vec<Persona> = parsed
        .get("personas")
        .or_else(|| parsed.get("analysts"))
        .and_then(|p| p.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|p| {
                    let name = p.get("name").and_then(|n| n.as_str())?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    let field = |key: &str, fallback: &str| {
                        p.get(key)
                            .and_then(|v| v.as_str())
                            .unwrap_or(fallback)
                            .to_string()
                    };
                    Some(Persona {
                        name: name.to_string(),
                        role: field("role", "Analyst"),
                        affiliation: field("affiliation", "Independent"),
                        description: field("description", ""),
                    })
                })
                .take(max_personas)
                .collect()
        })
        .unwrap_or_default();

    if personas.is_empty() {
        return Err(AgentError::InvalidResponse(
            "Persona response contained no personas".to_string(),
        ));
    }

    Ok(PersonaPlan { outline, personas })
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum ChatApi {
    OpenAi {
        base_url: String,
        model: String,
    },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
    Anthropic {
        base_url: String,
        model: String,
    },
}

/// Agent backed by a hosted chat-completions API
pub struct LlmAgent {
    client: reqwest::Client,
    api: ChatApi,
    api_key: String,
    temperature: f32,
}

fn required(value: Option<String>, what: &str, hint: &str) -> Result<String, AgentError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AgentError::Configuration(format!("{} missing: {}", what, hint)))
}

impl LlmAgent {
    /// Resolve credentials for the selected provider. Per-session overrides
    /// win over configured values.
    pub fn from_selection(
        selection: &ModelSelection,
        providers: &ProvidersSettings,
        client: reqwest::Client,
    ) -> Result<Self, AgentError> {
        let provider = selection.provider;
        let (settings, preset) = match (providers.get(provider), preset_for(provider)) {
            (Some(settings), Some(preset)) => (settings, preset),
            _ => {
                return Err(AgentError::Configuration(format!(
                    "{} has no hosted API",
                    provider
                )))
            }
        };

        let api_key = required(
            selection.api_key.clone().or_else(|| settings.api_key.clone()),
            &format!("{} API key", preset.name),
            &format!("set {} or pass apiKey", preset.api_key_env),
        )?;

        let api = match provider {
            ModelProvider::AzureOpenAi => ChatApi::Azure {
                endpoint: required(
                    selection
                        .azure_endpoint
                        .clone()
                        .or_else(|| settings.base_url.clone()),
                    "Azure OpenAI endpoint",
                    "set AZURE_OPENAI_ENDPOINT or pass azureEndpoint",
                )?,
                deployment: required(
                    selection
                        .azure_deployment
                        .clone()
                        .or_else(|| settings.deployment.clone()),
                    "Azure OpenAI deployment",
                    "set AZURE_OPENAI_DEPLOYMENT or pass azureDeployment",
                )?,
                api_version: settings
                    .api_version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            },
            ModelProvider::Anthropic => ChatApi::Anthropic {
                base_url: required(
                    settings.resolved_base_url(provider),
                    "Anthropic base URL",
                    "set providers.anthropic.base_url",
                )?,
                model: required(
                    settings.resolved_model(provider),
                    "Anthropic model",
                    "set providers.anthropic.model",
                )?,
            },
            _ => ChatApi::OpenAi {
                base_url: required(
                    settings.resolved_base_url(provider),
                    "OpenAI base URL",
                    "set providers.openai.base_url",
                )?,
                model: required(
                    settings.resolved_model(provider),
                    "OpenAI model",
                    "set providers.openai.model",
                )?,
            },
        };

        Ok(Self {
            client,
            api,
            api_key,
            temperature: settings.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        })
    }

    fn endpoint_url(&self) -> String {
        match &self.api {
            ChatApi::OpenAi { base_url, .. } => {
                format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
            }
            ChatApi::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
            ChatApi::Anthropic { base_url, .. } => {
                format!("{}/v1/messages", base_url.trim_end_matches('/'))
            }
        }
    }

    /// Send one system + user exchange and return the reply text
    async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError> {
        let url = self.endpoint_url();
        let messages = json!([
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ]);

        let request = match &self.api {
            ChatApi::OpenAi { model, .. } => self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "model": model,
                    "temperature": self.temperature,
                    "messages": messages,
                })),
            ChatApi::Azure { .. } => self
                .client
                .post(&url)
                .header("api-key", &self.api_key)
                .json(&json!({
                    "temperature": self.temperature,
                    "messages": messages,
                })),
            ChatApi::Anthropic { model, .. } => self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&json!({
                    "model": model,
                    "max_tokens": ANTHROPIC_MAX_TOKENS,
                    "temperature": self.temperature,
                    "system": system,
                    "messages": [{ "role": "user", "content": user }],
                })),
        };

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Transport(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider {
                status: status.as_u16(),
                message: excerpt(&text, 500),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        extract_reply_text(matches!(self.api, ChatApi::Anthropic { .. }), &body)
    }
}

/// Pull the assistant text out of a completion body
fn extract_reply_text(anthropic: bool, body: &Value) -> Result<String, AgentError> {
    let text = if anthropic {
        body["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    } else {
        body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(AgentError::InvalidResponse(
            "Completion contained no text".to_string(),
        ));
    }
    Ok(text.to_string())
}

#[async_trait]
impl AgentPort for LlmAgent {
    async fn generate_outline_and_personas(
        &self,
        topic: &str,
        max_personas: usize,
    ) -> Result<PersonaPlan, AgentError> {
        let user = format!(
            "Research topic: {}\n\nCreate at most {} analysts.",
            topic, max_personas
        );
        let reply = self.complete(PERSONA_SYSTEM, &user).await?;
        parse_persona_plan(&reply, max_personas)
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

        let system = match speaker {
            Speaker::Analyst => analyst_system(persona),
            Speaker::Expert => EXPERT_SYSTEM.to_string(),
        };

        let text = self.complete(&system, &turn_prompt(topic, transcript)).await?;
        Ok(TurnReply::Next(Turn::new(speaker, text)))
    }

    async fn draft_report(
        &self,
        topic: &str,
        transcripts: &[InterviewTranscript],
        prior: Option<&ReportDraft>,
        feedback: Option<&str>,
    ) -> Result<ReportSections, AgentError> {
        let revision = revision_notes(prior, feedback);

        let body = self
            .complete(
                REPORT_WRITER_SYSTEM,
                &format!(
                    "Topic: {}\n\nInterview transcripts:\n\n{}{}",
                    topic,
                    render_transcripts(transcripts),
                    revision
                ),
            )
            .await?;

        let framing = format!("Topic: {}\n\nReport body:\n{}{}", topic, body, revision);
        let (introduction, conclusion) = tokio::try_join!(
            self.complete(INTRO_WRITER_SYSTEM, &framing),
            self.complete(CONCLUSION_WRITER_SYSTEM, &framing)
        )?;

        Ok(ReportSections {
            introduction,
            body,
            conclusion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    fn selection(provider: ModelProvider) -> ModelSelection {
        ModelSelection {
            provider,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_persona_plan_from_chatty_reply() {
        let reply = r#"
        Here are the analysts:
        {
            "outline": "1. Subsidies 2. Grid",
            "personas": [
                {"name": "Sarah Johnson", "role": "Policy analyst", "affiliation": "IEA", "description": "Subsidy design"},
                {"name": "Michael Chen", "role": "Grid engineer", "affiliation": "NREL", "description": "Storage"},
                {"name": "", "role": "ignored"}
            ]
        }
        Let me know if you need more.
        "#;

        let plan = parse_persona_plan(reply, 5).unwrap();
        assert_eq!(plan.outline, "1. Subsidies 2. Grid");
        assert_eq!(plan.personas.len(), 2);
        assert_eq!(plan.personas[1].name, "Michael Chen");
    }

    #[test]
    fn test_parse_persona_plan_caps_count() {
        let reply = r#"{"analysts": [{"name": "A"}, {"name": "B"}, {"name": "C"}]}"#;
        let plan = parse_persona_plan(reply, 2).unwrap();
        assert_eq!(plan.personas.len(), 2);
        assert_eq!(plan.personas[0].role, "Analyst");
        assert_eq!(plan.outline, "");
    }

    #[test]
    fn test_parse_persona_plan_rejects_garbage() {
        assert!(matches!(
            parse_persona_plan("no json here", 3),
            Err(AgentError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_persona_plan(r#"{"personas": []}"#, 3),
            Err(AgentError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_extract_reply_text() {
        let openai = json!({"choices": [{"message": {"content": "  hello  "}}]});
        assert_eq!(extract_reply_text(false, &openai).unwrap(), "hello");

        let anthropic = json!({"content": [
            {"type": "text", "text": "part one, "},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "part two"}
        ]});
        assert_eq!(
            extract_reply_text(true, &anthropic).unwrap(),
            "part one, part two"
        );

        assert!(extract_reply_text(false, &json!({"choices": []})).is_err());
    }

    #[test]
    fn test_azure_requires_endpoint_and_deployment() {
        let mut providers = ProvidersSettings::default();
        providers.azure_openai.api_key = Some("key".to_string());

        let err = LlmAgent::from_selection(
            &selection(ModelProvider::AzureOpenAi),
            &providers,
            reqwest::Client::new(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("AZURE_OPENAI_ENDPOINT"));

        let mut sel = selection(ModelProvider::AzureOpenAi);
        sel.azure_endpoint = Some("https://res.openai.azure.com/".to_string());
        sel.azure_deployment = Some("gpt-4o".to_string());
        let agent = LlmAgent::from_selection(&sel, &providers, reqwest::Client::new()).unwrap();
        assert_eq!(
            agent.endpoint_url(),
            format!(
                "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version={}",
                DEFAULT_AZURE_API_VERSION
            )
        );
    }

    #[test]
    fn test_session_api_key_overrides_config() {
        let mut providers = ProvidersSettings::default();
        providers.anthropic = ProviderSettings {
            base_url: Some("http://localhost:9999/".to_string()),
            ..Default::default()
        };

        let mut sel = selection(ModelProvider::Anthropic);
        assert!(LlmAgent::from_selection(&sel, &providers, reqwest::Client::new()).is_err());

        sel.api_key = Some("sk-session".to_string());
        let agent = LlmAgent::from_selection(&sel, &providers, reqwest::Client::new()).unwrap();
        assert_eq!(agent.api_key, "sk-session");
        assert_eq!(agent.endpoint_url(), "http://localhost:9999/v1/messages");
    }

    #[test]
    fn test_turn_prompt_and_revision_notes() {
        let mut transcript = InterviewTranscript::new("Sarah");
        assert!(turn_prompt("solar", &transcript).contains("opening message"));

        transcript.push(Turn::new(Speaker::Analyst, "Hi"));
        assert!(turn_prompt("solar", &transcript).contains("analyst: Hi"));

        let notes = revision_notes(None, Some("add more data"));
        assert!(notes.contains("add more data"));
        assert_eq!(revision_notes(None, None), "");
    }
}
