// Model provider presets and per-provider credentials
//
// Credentials come from the config file first, then from the usual
// provider environment variables.

use serde::{Deserialize, Serialize};

use crate::models::ModelProvider;

/// Builtin defaults for a hosted chat-completions API
#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub provider: ModelProvider,
    /// Display name
    pub name: &'static str,
    /// Base URL for the API (Azure has no global one)
    pub base_url: Option<&'static str>,
    pub default_model: Option<&'static str>,
    /// Environment variable holding the API key
    pub api_key_env: &'static str,
}

/// Builtin provider presets
pub static PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        provider: ModelProvider::OpenAi,
        name: "OpenAI",
        base_url: Some("https://api.openai.com"),
        default_model: Some("gpt-4o-mini"),
        api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        provider: ModelProvider::AzureOpenAi,
        name: "Azure OpenAI",
        base_url: None,
        default_model: None,
        api_key_env: "AZURE_OPENAI_API_KEY",
    },
    ProviderPreset {
        provider: ModelProvider::Anthropic,
        name: "Anthropic",
        base_url: Some("https://api.anthropic.com"),
        default_model: Some("claude-3-5-haiku-latest"),
        api_key_env: "ANTHROPIC_API_KEY",
    },
];

/// Look up the preset for a provider
pub fn preset_for(provider: ModelProvider) -> Option<&'static ProviderPreset> {
    PRESETS.iter().find(|p| p.provider == provider)
}

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

/// Settings for one provider; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    /// Base URL, or the resource endpoint for Azure
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Azure deployment name
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub temperature: Option<f32>,
}

impl ProviderSettings {
    /// Base URL from settings, falling back to the preset
    pub fn resolved_base_url(&self, provider: ModelProvider) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| preset_for(provider).and_then(|p| p.base_url.map(String::from)))
    }

    pub fn resolved_model(&self, provider: ModelProvider) -> Option<String> {
        self.model
            .clone()
            .or_else(|| preset_for(provider).and_then(|p| p.default_model.map(String::from)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersSettings {
    pub openai: ProviderSettings,
    pub azure_openai: ProviderSettings,
    pub anthropic: ProviderSettings,
}

impl ProvidersSettings {
    /// Settings for a hosted provider; `None` for the offline placeholder
    pub fn get(&self, provider: ModelProvider) -> Option<&ProviderSettings> {
        match provider {
            ModelProvider::OpenAi => Some(&self.openai),
            ModelProvider::AzureOpenAi => Some(&self.azure_openai),
            ModelProvider::Anthropic => Some(&self.anthropic),
            ModelProvider::Placeholder => None,
        }
    }

    /// Fill unset fields from environment variables
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.openai.api_key.is_none() {
            self.openai.api_key = non_empty("OPENAI_API_KEY");
        }
        if self.anthropic.api_key.is_none() {
            self.anthropic.api_key = non_empty("ANTHROPIC_API_KEY");
        }

        let azure = &mut self.azure_openai;
        if azure.api_key.is_none() {
            azure.api_key = non_empty("AZURE_OPENAI_API_KEY");
        }
        if azure.base_url.is_none() {
            azure.base_url = non_empty("AZURE_OPENAI_ENDPOINT");
        }
        if azure.deployment.is_none() {
            azure.deployment = non_empty("AZURE_OPENAI_DEPLOYMENT");
        }
        if azure.api_version.is_none() {
            azure.api_version = non_empty("AZURE_OPENAI_API_VERSION");
        }
    }
}
