//! Session registry
//!
//! Owns every live session: creates them (idempotently when the client
//! supplies a key), hands out channel attachments, and disposes of them
//! explicitly or through the periodic sweep. A finished session survives
//! for a reconnect grace period once its last client detaches; a live one
//! with nobody attached is cancelled after the inactivity timeout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::agent_port::{AgentError, AgentPort, AgentProvider};
use crate::channel::{ChannelHandle, SessionChannel};
use crate::config::Settings;
use crate::interview::InterviewLimits;
use crate::models::{CreateSessionRequest, Stage};
use crate::session::{MachineOptions, Session, SessionMachine, SessionSnapshot};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Server is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_analysts_limit: usize,
    pub max_turns_limit: usize,
    pub channel_capacity: usize,
    pub reconnect_grace: Duration,
    pub inactivity_timeout: Duration,
    pub cleanup_interval: Duration,
    pub machine: MachineOptions,
    /// Base interview limits; each session overrides the turn cap
    pub interview: InterviewLimits,
}

impl RegistryConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, regex::Error> {
        Ok(Self {
            max_analysts_limit: settings.session.max_analysts_limit,
            max_turns_limit: settings.session.max_interview_turns_limit,
            channel_capacity: settings.session.channel_capacity,
            reconnect_grace: settings.session.reconnect_grace(),
            inactivity_timeout: settings.session.inactivity_timeout(),
            cleanup_interval: settings.session.cleanup_interval(),
            machine: MachineOptions::from_settings(settings),
            interview: InterviewLimits::from_settings(settings, 1)?,
        })
    }
}

/// Result of a create call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
    /// False when an idempotency key matched an existing session
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub topic: String,
    pub stage: Stage,
    pub attached_clients: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct SessionEntry {
    channel: Arc<SessionChannel>,
    snapshot: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
    idempotency_key: Option<String>,
}

impl SessionEntry {
    fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    fn summary(&self) -> SessionSummary {
        let snapshot = self.snapshot.borrow();
        SessionSummary {
            id: snapshot.id.clone(),
            topic: snapshot.topic.clone(),
            stage: snapshot.stage,
            attached_clients: self.channel.attachments(),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<SessionEntry>>,
    idempotency: HashMap<String, String>,
}

pub struct SessionRegistry {
    inner: RwLock<Inner>,
    provider: Arc<dyn AgentProvider>,
    config: RegistryConfig,
    root_cancel: CancellationToken,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn AgentProvider>, config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            provider,
            config,
            root_cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a session, or return the one already bound to the request's
    /// idempotency key
    pub async fn get_or_create(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, RegistryError> {
        if self.root_cancel.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }
        request
            .validate(self.config.max_analysts_limit, self.config.max_turns_limit)
            .map_err(RegistryError::InvalidRequest)?;

        // Held across the check and the insert so two creates with one key
        // cannot both spawn
        let mut inner = self.inner.write().await;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = inner.idempotency.get(key) {
                if inner.sessions.contains_key(existing) {
                    log::info!(
                        "[Registry] Idempotency key matched session {}",
                        existing
                    );
                    return Ok(CreatedSession {
                        session_id: existing.clone(),
                        created: false,
                    });
                }
            }
        }

        let agent = self.provider.agent_for(&request.model_selection())?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let entry = self.spawn_session(&session_id, &request, agent);

        inner.sessions.insert(session_id.clone(), Arc::new(entry));
        if let Some(key) = request.idempotency_key {
            inner.idempotency.insert(key, session_id.clone());
        }

        log::info!(
            "[Registry] Created session {} ({} active, provider {})",
            session_id,
            inner.sessions.len(),
            request.model_provider
        );

        Ok(CreatedSession {
            session_id,
            created: true,
        })
    }

    fn spawn_session(
        &self,
        session_id: &str,
        request: &CreateSessionRequest,
        agent: Arc<dyn AgentPort>,
    ) -> SessionEntry {
        let (channel, inbox) = SessionChannel::new(session_id, self.config.channel_capacity);
        let cancel = self.root_cancel.child_token();
        let limits = Arc::new(
            self.config
                .interview
                .with_max_turns(request.max_interview_turns),
        );
        let session = Session::new(session_id, request.topic.trim(), request.session_config());

        let (machine, snapshot) = SessionMachine::new(
            session,
            agent,
            limits,
            channel.clone(),
            inbox,
            cancel.clone(),
            self.config.machine,
        );

        let id = session_id.to_string();
        tokio::spawn(async move {
            let last = machine.run().await;
            log::debug!("[Registry] Session {} machine exited in {}", id, last.stage);
        });

        SessionEntry {
            channel,
            snapshot,
            cancel,
            idempotency_key: request.idempotency_key.clone(),
        }
    }

    async fn entry(&self, session_id: &str) -> Result<Arc<SessionEntry>, RegistryError> {
        self.inner
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(session_id.to_string()))
    }

    /// Attach a client to a session's channel
    pub async fn attach(&self, session_id: &str) -> Result<ChannelHandle, RegistryError> {
        Ok(self.entry(session_id).await?.channel.attach())
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, RegistryError> {
        Ok(self.entry(session_id).await?.snapshot())
    }

    /// Watch a session's snapshots as they are published
    pub async fn watch(
        &self,
        session_id: &str,
    ) -> Result<watch::Receiver<SessionSnapshot>, RegistryError> {
        Ok(self.entry(session_id).await?.snapshot.clone())
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<SessionSummary> =
            inner.sessions.values().map(|e| e.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cancel a session and forget it; returns its last snapshot
    pub async fn dispose(&self, session_id: &str) -> Result<SessionSnapshot, RegistryError> {
        let entry = self
            .remove(session_id)
            .await
            .ok_or_else(|| RegistryError::NotFound(session_id.to_string()))?;
        log::info!("[Registry] Disposed session {}", session_id);
        Ok(entry.snapshot())
    }

    async fn remove(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        let mut inner = self.inner.write().await;
        let entry = inner.sessions.remove(session_id)?;
        if let Some(key) = &entry.idempotency_key {
            inner.idempotency.remove(key);
        }
        entry.cancel.cancel();
        Some(entry)
    }

    /// Remove sessions nobody is attached to for too long; returns how many
    pub async fn sweep(&self) -> usize {
        let expired: Vec<(String, &'static str)> = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .iter()
                .filter_map(|(id, entry)| {
                    let idle = entry.channel.detached_for()?;
                    let terminal = entry.snapshot.borrow().is_terminal();
                    if terminal && idle >= self.config.reconnect_grace {
                        Some((id.clone(), "finished"))
                    } else if !terminal && idle >= self.config.inactivity_timeout {
                        Some((id.clone(), "inactive"))
                    } else {
                        None
                    }
                })
                .collect()
        };

        let mut removed = 0;
        for (id, reason) in expired {
            if self.remove(&id).await.is_some() {
                log::info!("[Registry] Swept {} session {}", reason, id);
                removed += 1;
            }
        }
        removed
    }

    /// Start the periodic sweep; it stops when the registry shuts down
    pub fn start_cleanup_task(registry: Arc<Self>) {
        let interval = registry.config.cleanup_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = registry.root_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let removed = registry.sweep().await;
                if removed > 0 {
                    log::debug!("[Registry] Cleanup removed {} sessions", removed);
                }
            }
            log::debug!("[Registry] Cleanup task stopped");
        });
    }

    /// Cancel every live session and refuse new ones
    pub async fn shutdown(&self) {
        let active = self.len().await;
        log::info!("[Registry] Shutting down, cancelling {} sessions", active);
        self.root_cancel.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root_cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_port::DefaultAgentProvider;
    use crate::config::ProvidersSettings;
    use crate::models::ModelProvider;

    fn registry(settings: &Settings) -> SessionRegistry {
        let provider =
            DefaultAgentProvider::new(ProvidersSettings::default(), Duration::from_secs(5))
                .unwrap();
        SessionRegistry::new(
            Arc::new(provider),
            RegistryConfig::from_settings(settings).unwrap(),
        )
    }

    fn offline(topic: &str) -> CreateSessionRequest {
        let mut request = CreateSessionRequest::new(topic);
        request.model_provider = ModelProvider::Placeholder;
        request
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_request() {
        let registry = registry(&Settings::default());

        let err = registry
            .get_or_create(offline("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRequest(_)));

        let mut request = offline("topic");
        request.max_analysts = 11;
        assert!(registry.get_or_create(request).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_credentials_reject_creation() {
        let registry = registry(&Settings::default());
        let mut request = offline("topic");
        request.model_provider = ModelProvider::OpenAi;

        let err = registry.get_or_create(request).await.unwrap_err();
        assert!(matches!(err, RegistryError::Agent(AgentError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_idempotency_key_returns_same_session() {
        let registry = registry(&Settings::default());
        let mut request = offline("renewable energy policy");
        request.idempotency_key = Some("abc".to_string());

        let first = registry.get_or_create(request.clone()).await.unwrap();
        let second = registry.get_or_create(request).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(registry.len().await, 1);

        let other = registry
            .get_or_create(offline("renewable energy policy"))
            .await
            .unwrap();
        assert_ne!(other.session_id, first.session_id);
    }

    #[tokio::test]
    async fn test_dispose_forgets_session() {
        let registry = registry(&Settings::default());
        let created = registry
            .get_or_create(offline("topic"))
            .await
            .unwrap();

        registry.dispose(&created.session_id).await.unwrap();
        assert!(matches!(
            registry.snapshot(&created.session_id).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.dispose(&created.session_id).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_spares_attached_sessions() {
        let mut settings = Settings::default();
        settings.session.inactivity_timeout_secs = 0;
        let registry = registry(&settings);

        let kept = registry
            .get_or_create(offline("kept"))
            .await
            .unwrap();
        let _handle = registry.attach(&kept.session_id).await.unwrap();
        registry
            .get_or_create(offline("abandoned"))
            .await
            .unwrap();

        assert_eq!(registry.sweep().await, 1);
        assert_eq!(registry.len().await, 1);
        assert!(registry.snapshot(&kept.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_sessions() {
        let registry = registry(&Settings::default());
        registry.shutdown().await;
        assert!(registry.is_shutting_down());
        assert!(matches!(
            registry
                .get_or_create(offline("topic"))
                .await,
            Err(RegistryError::ShuttingDown)
        ));
    }
}
