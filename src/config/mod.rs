// Server configuration
//
// Priority order: CLI flags -> environment -> config file -> defaults.
// The file lives at <config dir>/storm-session/config.toml unless --config is given.

pub mod providers;

pub use providers::{ProviderSettings, ProvidersSettings};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::PreviewLimits;

/// Default closing phrase an interviewer uses to end an interview
pub const DEFAULT_CLOSING_SIGNAL: &str = r"thank you so much for your help|정말 도움이 되었습니다";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub interview: InterviewSettings,
    pub report: ReportSettings,
    pub providers: ProvidersSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
    /// Allowed CORS origins; empty means any origin
    pub cors_origins: Vec<String>,
    /// Fixed bearer token; a random one is generated when unset
    pub auth_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8002,
            cors_origins: Vec::new(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// How long a suspension waits for a human decision
    pub suspension_timeout_secs: u64,
    /// How long a finished session survives with no client attached
    pub reconnect_grace_secs: u64,
    /// How long a live session survives with no client attached
    pub inactivity_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub max_analysts_limit: usize,
    pub max_interview_turns_limit: usize,
    /// Per-call limit for single-shot agent calls and interview turns
    pub agent_call_timeout_secs: u64,
    /// Broadcast buffer per session
    pub channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            suspension_timeout_secs: 1800,
            reconnect_grace_secs: 120,
            inactivity_timeout_secs: 900,
            cleanup_interval_secs: 30,
            max_analysts_limit: 10,
            max_interview_turns_limit: 10,
            agent_call_timeout_secs: 180,
            channel_capacity: 256,
        }
    }
}

impl SessionSettings {
    pub fn suspension_timeout(&self) -> Duration {
        Duration::from_secs(self.suspension_timeout_secs)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn agent_call_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_call_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewSettings {
    /// Whole-interview limit; expiry keeps the partial transcript
    pub timeout_secs: u64,
    /// Case-insensitive regex matched against every utterance
    pub closing_signal: String,
}

impl Default for InterviewSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            closing_signal: DEFAULT_CLOSING_SIGNAL.to_string(),
        }
    }
}

impl InterviewSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub introduction_preview_chars: usize,
    pub body_preview_chars: usize,
    pub conclusion_preview_chars: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        let limits = PreviewLimits::default();
        Self {
            introduction_preview_chars: limits.introduction,
            body_preview_chars: limits.body,
            conclusion_preview_chars: limits.conclusion,
        }
    }
}

impl ReportSettings {
    pub fn preview_limits(&self) -> PreviewLimits {
        PreviewLimits {
            introduction: self.introduction_preview_chars,
            body: self.body_preview_chars,
            conclusion: self.conclusion_preview_chars,
        }
    }
}

impl Settings {
    /// Default config file path (<config dir>/storm-session/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("storm-session").join("config.toml"))
    }

    /// Load settings from an explicit path, or the default path if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::load_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_file(&path)?,
                _ => Self::default(),
            },
        };
        Ok(settings)
    }

    /// Parse a TOML config file; missing keys keep their defaults
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

        let settings: Settings = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

        log::info!("Loaded config from: {}", path.display());
        Ok(settings)
    }

    /// Fill provider credentials from the process environment
    pub fn apply_env(&mut self) {
        self.providers.apply_env_from(|key| std::env::var(key).ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8002);
        assert_eq!(settings.server.bind, "127.0.0.1");
        assert_eq!(settings.session.suspension_timeout(), Duration::from_secs(1800));
        assert_eq!(settings.session.max_analysts_limit, 10);
        assert_eq!(settings.interview.timeout(), Duration::from_secs(300));
        assert_eq!(settings.report.preview_limits(), PreviewLimits::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9100
cors_origins = ["http://localhost:5173"]

[session]
suspension_timeout_secs = 60

[providers.azure_openai]
base_url = "https://example.openai.azure.com"
deployment = "gpt-4o"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.bind, "127.0.0.1");
        assert_eq!(settings.server.cors_origins, vec!["http://localhost:5173"]);
        assert_eq!(settings.session.suspension_timeout_secs, 60);
        assert_eq!(settings.session.reconnect_grace_secs, 120);
        assert_eq!(
            settings.providers.azure_openai.deployment.as_deref(),
            Some("gpt-4o")
        );
        assert_eq!(settings.interview.closing_signal, DEFAULT_CLOSING_SIGNAL);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a number\"").unwrap();

        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Settings::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_cleanup_interval_never_zero() {
        let session = SessionSettings {
            cleanup_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(session.cleanup_interval(), Duration::from_secs(1));
    }
}
