// Session creation request and per-session configuration

use serde::{Deserialize, Serialize};

/// Language-model provider backing a session's agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    Anthropic,
    /// Offline deterministic content, no credentials needed
    Placeholder,
}

impl ModelProvider {
    pub fn all() -> &'static [ModelProvider] {
        &[
            ModelProvider::OpenAi,
            ModelProvider::AzureOpenAi,
            ModelProvider::Anthropic,
            ModelProvider::Placeholder,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "openai",
            ModelProvider::AzureOpenAi => "azure_openai",
            ModelProvider::Anthropic => "anthropic",
            ModelProvider::Placeholder => "placeholder",
        }
    }
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ModelProvider::OpenAi),
            "azure_openai" | "azure" => Ok(ModelProvider::AzureOpenAi),
            "anthropic" => Ok(ModelProvider::Anthropic),
            "placeholder" | "offline" => Ok(ModelProvider::Placeholder),
            _ => Err(format!(
                "Unknown model provider: '{}'. Expected one of: openai, azure_openai, anthropic, placeholder",
                s
            )),
        }
    }
}

/// Azure OpenAI when a request names no provider
impl Default for ModelProvider {
    fn default() -> Self {
        ModelProvider::AzureOpenAi
    }
}

/// Provider selection plus optional per-session credential overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelection {
    pub provider: ModelProvider,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_deployment: Option<String>,
}

fn default_max_analysts() -> usize {
    3
}

fn default_max_interview_turns() -> usize {
    3
}

fn default_true() -> bool {
    true
}

/// Body of `POST /api/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub topic: String,
    /// Upper bound offered to the user at the worker-count suspension
    #[serde(default = "default_max_analysts", alias = "max_analysts")]
    pub max_analysts: usize,
    #[serde(default = "default_max_interview_turns", alias = "max_interview_turns")]
    pub max_interview_turns: usize,
    #[serde(default = "default_true", alias = "parallel_interviews")]
    pub parallel_interviews: bool,
    #[serde(default, alias = "model_provider")]
    pub model_provider: ModelProvider,
    #[serde(default, alias = "api_key", skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default, alias = "azure_endpoint")]
    pub azure_endpoint: Option<String>,
    #[serde(default, alias = "azure_deployment")]
    pub azure_deployment: Option<String>,
    /// Repeated creates with the same key return the same session
    #[serde(default, alias = "idempotency_key")]
    pub idempotency_key: Option<String>,
}

impl CreateSessionRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            max_analysts: default_max_analysts(),
            max_interview_turns: default_max_interview_turns(),
            parallel_interviews: true,
            model_provider: ModelProvider::default(),
            api_key: None,
            azure_endpoint: None,
            azure_deployment: None,
            idempotency_key: None,
        }
    }

    /// Validate against the server's configured limits
    pub fn validate(&self, max_analysts_limit: usize, max_turns_limit: usize) -> Result<(), String> {
        if self.topic.trim().is_empty() {
            return Err("Topic must not be empty".to_string());
        }
        if self.max_analysts < 1 || self.max_analysts > max_analysts_limit {
            return Err(format!(
                "maxAnalysts must be between 1 and {} (got {})",
                max_analysts_limit, self.max_analysts
            ));
        }
        if self.max_interview_turns < 1 || self.max_interview_turns > max_turns_limit {
            return Err(format!(
                "maxInterviewTurns must be between 1 and {} (got {})",
                max_turns_limit, self.max_interview_turns
            ));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_analysts: self.max_analysts,
            max_interview_turns: self.max_interview_turns,
            parallel_interviews: self.parallel_interviews,
            model_provider: self.model_provider,
        }
    }

    pub fn model_selection(&self) -> ModelSelection {
        ModelSelection {
            provider: self.model_provider,
            api_key: self.api_key.clone(),
            azure_endpoint: self.azure_endpoint.clone(),
            azure_deployment: self.azure_deployment.clone(),
        }
    }
}

/// Immutable per-session settings fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub max_analysts: usize,
    pub max_interview_turns: usize,
    pub parallel_interviews: bool,
    pub model_provider: ModelProvider,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_analysts: default_max_analysts(),
            max_interview_turns: default_max_interview_turns(),
            parallel_interviews: true,
            model_provider: ModelProvider::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: CreateSessionRequest =
            serde_json::from_str(r#"{"topic": "renewable energy policy"}"#).unwrap();
        assert_eq!(req.max_analysts, 3);
        assert_eq!(req.max_interview_turns, 3);
        assert!(req.parallel_interviews);
        assert_eq!(req.model_provider, ModelProvider::AzureOpenAi);
        assert!(req.idempotency_key.is_none());
    }

    #[test]
    fn test_constructed_and_parsed_requests_share_provider_default() {
        let parsed: CreateSessionRequest = serde_json::from_str(r#"{"topic": "t"}"#).unwrap();
        let built = CreateSessionRequest::new("t");
        assert_eq!(built.model_provider, parsed.model_provider);
        assert_eq!(SessionConfig::default().model_provider, parsed.model_provider);
        assert_eq!(built.model_selection().provider, ModelProvider::AzureOpenAi);
    }

    #[test]
    fn test_request_accepts_snake_case() {
        let req: CreateSessionRequest = serde_json::from_str(
            r#"{"topic": "t", "max_analysts": 5, "parallel_interviews": false, "model_provider": "anthropic"}"#,
        )
        .unwrap();
        assert_eq!(req.max_analysts, 5);
        assert!(!req.parallel_interviews);
        assert_eq!(req.model_provider, ModelProvider::Anthropic);
    }

    #[test]
    fn test_validate_limits() {
        let mut req = CreateSessionRequest::new("topic");
        assert!(req.validate(10, 10).is_ok());

        req.max_analysts = 0;
        assert!(req.validate(10, 10).is_err());
        req.max_analysts = 11;
        assert!(req.validate(10, 10).unwrap_err().contains("maxAnalysts"));

        req.max_analysts = 3;
        req.max_interview_turns = 42;
        assert!(req.validate(10, 10).unwrap_err().contains("maxInterviewTurns"));

        let blank = CreateSessionRequest::new("   ");
        assert!(blank.validate(10, 10).is_err());
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut req = CreateSessionRequest::new("topic");
        req.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("sk-secret"));

        let json = serde_json::to_string(&req.model_selection()).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_model_provider_from_str() {
        assert_eq!("openai".parse::<ModelProvider>(), Ok(ModelProvider::OpenAi));
        assert_eq!("Azure".parse::<ModelProvider>(), Ok(ModelProvider::AzureOpenAi));
        assert!("gemini".parse::<ModelProvider>().is_err());
        assert_eq!(
            serde_json::to_string(&ModelProvider::AzureOpenAi).unwrap(),
            "\"azure_openai\""
        );
    }
}
