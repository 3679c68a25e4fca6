// Session state machine
//
// One task per session owns the Session and is the only writer. Long
// operations run inside `run_op`, which keeps watching the inbox and the
// cancellation token so a stray decision is answered and a disposal stops
// the work. Suspensions park on the inbox until a matching decision, the
// deadline, or cancellation.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Session, SessionError, SessionSnapshot};
use crate::agent_port::{with_timeout, AgentPort};
use crate::channel::{
    Activity, FullReport, ProgressData, ReportApprovalPrompt, ServerMessage, SessionChannel,
    SessionResult, WorkerCountPrompt,
};
use crate::config::Settings;
use crate::coordinator::{InterviewEvent, ParallelCoordinator};
use crate::interview::InterviewLimits;
use crate::models::{
    Decision, PendingDecision, Persona, PersonaSummary, PreviewLimits, ReportAction,
    ReportApproval, ReportDraft, RewriteType, Stage,
};

#[derive(Debug, Clone, Copy)]
pub struct MachineOptions {
    pub suspension_timeout: Duration,
    pub call_timeout: Duration,
    pub preview_limits: PreviewLimits,
}

impl MachineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            suspension_timeout: settings.session.suspension_timeout(),
            call_timeout: settings.session.agent_call_timeout(),
            preview_limits: settings.report.preview_limits(),
        }
    }
}

pub struct SessionMachine {
    session: Session,
    agent: Arc<dyn AgentPort>,
    coordinator: ParallelCoordinator,
    channel: Arc<SessionChannel>,
    inbox: mpsc::Receiver<Decision>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
    options: MachineOptions,
}

impl SessionMachine {
    /// Build a machine and the watch receiver that follows its snapshots
    pub fn new(
        session: Session,
        agent: Arc<dyn AgentPort>,
        limits: Arc<InterviewLimits>,
        channel: Arc<SessionChannel>,
        inbox: mpsc::Receiver<Decision>,
        cancel: CancellationToken,
        options: MachineOptions,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let coordinator = ParallelCoordinator::new(agent.clone(), limits);
        let machine = Self {
            session,
            agent,
            coordinator,
            channel,
            inbox,
            snapshot_tx,
            cancel,
            options,
        };
        (machine, snapshot_rx)
    }

    /// Drive the session to a terminal stage and return its final snapshot
    pub async fn run(mut self) -> SessionSnapshot {
        log::info!(
            "[SessionMachine] Session {} started for topic '{}'",
            self.session.id,
            self.session.topic
        );

        if let Err(e) = self.drive().await {
            self.abort(e);
        }

        self.session.snapshot()
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        self.generate_personas().await?;
        let worker_count = self.await_worker_count().await?;
        self.run_interviews(worker_count).await?;
        self.review_reports().await
    }

    async fn generate_personas(&mut self) -> Result<(), SessionError> {
        self.advance(Stage::PersonasPending)?;
        self.emit(
            self.progress(format!(
                "Generating research outline and analyst personas for '{}'",
                self.session.topic
            ))
            .with_sub_activity("personas"),
        );

        let agent = self.agent.clone();
        let topic = self.session.topic.clone();
        let max_analysts = self.session.config.max_analysts;
        let limit = self.options.call_timeout;
        let plan = self
            .run_op(async move {
                with_timeout(limit, agent.generate_outline_and_personas(&topic, max_analysts))
                    .await
                    .map_err(SessionError::from)
            })
            .await?;

        let mut personas = plan.personas;
        if personas.len() > max_analysts {
            log::warn!(
                "[SessionMachine] Agent returned {} personas for {}, keeping {}",
                personas.len(),
                self.session.id,
                max_analysts
            );
            personas.truncate(max_analysts);
        }
        if personas.is_empty() {
            return Err(SessionError::NoPersonas);
        }

        self.session.artifacts.outline = Some(plan.outline);
        self.session.artifacts.personas = personas;
        self.publish();

        let summaries = self.persona_summaries();
        self.emit(
            self.progress(format!("Generated {} analyst personas", summaries.len()))
                .with_activity(Activity {
                    action: "personas_generated".to_string(),
                    details: None,
                    personas: Some(summaries),
                }),
        );
        Ok(())
    }

    async fn await_worker_count(&mut self) -> Result<usize, SessionError> {
        let persona_count = self.session.artifacts.personas.len();
        let prompt = ServerMessage::SuspendWorkerCount(WorkerCountPrompt {
            default_count: persona_count,
            max_count: persona_count,
            personas: self.persona_summaries(),
            message: format!(
                "{} analysts are ready. How many interviews should run at once (1-{})?",
                persona_count, persona_count
            ),
        });
        self.suspend(
            PendingDecision::WorkerCount {
                default_count: persona_count,
                max_count: persona_count,
            },
            prompt,
        )?;

        let deadline = deadline_after(self.options.suspension_timeout);
        let requested = loop {
            match self.await_decision(deadline).await? {
                Decision::WorkerCount(count) => break count,
                other => self.reject(&other),
            }
        };
        self.channel.clear_suspension();

        let effective = requested.clamp(1, persona_count as i64) as usize;
        if effective as i64 != requested {
            log::warn!(
                "[SessionMachine] Worker count {} for {} is outside 1..={}, using {}",
                requested,
                self.session.id,
                persona_count,
                effective
            );
        }
        self.session.artifacts.worker_count = Some(effective);
        self.advance(Stage::InterviewsRunning)?;
        Ok(effective)
    }

    async fn run_interviews(&mut self, worker_count: usize) -> Result<(), SessionError> {
        let personas: Vec<Persona> = self.session.artifacts.personas.clone();
        let total = personas.len();
        let concurrency = if self.session.config.parallel_interviews {
            worker_count
        } else {
            1
        };

        self.emit(
            self.progress(format!(
                "Running {} interviews with {} worker{}",
                total,
                concurrency,
                if concurrency == 1 { "" } else { "s" }
            ))
            .with_sub_activity("interviews")
            .with_activity(Activity {
                action: "interviews_started".to_string(),
                details: Some(format!("workerCount={}", concurrency)),
                personas: None,
            }),
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_interview_events(
            self.channel.clone(),
            total,
            events_rx,
        ));

        let coordinator = self.coordinator.clone();
        let topic = self.session.topic.clone();
        let cancel = self.cancel.child_token();
        let outcomes = self
            .run_op(async move {
                Ok(coordinator
                    .run(&topic, &personas, concurrency, cancel, Some(events_tx))
                    .await)
            })
            .await?;

        // Let queued interview progress go out before drafting starts
        let _ = forwarder.await;

        self.session.artifacts.outcomes = outcomes;
        self.publish();

        let succeeded = self.session.artifacts.successful_interviews();
        if succeeded == 0 {
            return Err(SessionError::NoSuccessfulInterviews(total));
        }

        self.emit(
            self.progress(format!("{} of {} interviews usable", succeeded, total))
                .with_sub_activity("interviews"),
        );
        Ok(())
    }

    async fn review_reports(&mut self) -> Result<(), SessionError> {
        let transcripts = self.session.artifacts.usable_transcripts();
        let mut prior: Option<ReportDraft> = None;
        let mut feedback: Option<String> = None;

        loop {
            self.advance(Stage::ReportDrafting)?;
            let message = match &prior {
                Some(draft) => format!("Revising report version {}", draft.version),
                None => format!("Drafting report from {} interviews", transcripts.len()),
            };
            self.emit(self.progress(message).with_sub_activity("report"));

            let agent = self.agent.clone();
            let topic = self.session.topic.clone();
            let call_transcripts = transcripts.clone();
            let call_prior = prior.take();
            let call_feedback = feedback.take();
            let limit = self.options.call_timeout;
            let sections = self
                .run_op(async move {
                    with_timeout(
                        limit,
                        agent.draft_report(
                            &topic,
                            &call_transcripts,
                            call_prior.as_ref(),
                            call_feedback.as_deref(),
                        ),
                    )
                    .await
                    .map_err(SessionError::from)
                })
                .await?;

            let draft = ReportDraft {
                version: self.session.next_report_version(),
                sections,
            };
            self.session.artifacts.draft = Some(draft.clone());

            let prompt = ServerMessage::SuspendReportApproval(ReportApprovalPrompt {
                topic: self.session.topic.clone(),
                preview: draft.preview(&self.options.preview_limits),
                full_report: draft.sections.clone(),
                options: ReportAction::all().to_vec(),
            });
            self.suspend(
                PendingDecision::ReportApproval {
                    version: draft.version,
                },
                prompt,
            )?;

            // One deadline per suspension; viewFull does not extend it
            let deadline = deadline_after(self.options.suspension_timeout);
            let approval = loop {
                match self.await_decision(deadline).await? {
                    Decision::ReportApproval(approval)
                        if approval.action == ReportAction::ViewFull =>
                    {
                        log::debug!(
                            "[SessionMachine] Sending full report v{} for {}",
                            draft.version,
                            self.session.id
                        );
                        self.channel.send(ServerMessage::ReportFull(FullReport {
                            version: draft.version,
                            sections: draft.sections.clone(),
                            markdown: draft.sections.assemble(),
                        }));
                    }
                    Decision::ReportApproval(approval) => break approval,
                    other => self.reject(&other),
                }
            };
            self.channel.clear_suspension();

            if approval.action == ReportAction::Approve {
                return self.complete(draft);
            }

            self.start_rewrite(&approval, draft, &mut prior, &mut feedback)?;
        }
    }

    fn start_rewrite(
        &mut self,
        approval: &ReportApproval,
        draft: ReportDraft,
        prior: &mut Option<ReportDraft>,
        feedback: &mut Option<String>,
    ) -> Result<(), SessionError> {
        self.advance(Stage::ReportRewriting)?;

        let text = approval.trimmed_feedback().map(str::to_string);
        if let Some(text) = &text {
            self.session.artifacts.feedback_history.push(text.clone());
        }

        let rewrite_type = approval.rewrite_type.unwrap_or_default();
        log::info!(
            "[SessionMachine] Rewrite of v{} requested for {} ({:?}, feedback: {})",
            draft.version,
            self.session.id,
            rewrite_type,
            text.is_some()
        );

        // Only a feedback rewrite with actual feedback revises the prior draft
        match (rewrite_type, text) {
            (RewriteType::Feedback, Some(text)) => {
                *prior = Some(draft);
                *feedback = Some(text);
            }
            _ => {
                *prior = None;
                *feedback = None;
            }
        }

        self.publish();
        self.emit(
            self.progress("Rewrite requested")
                .with_sub_activity("report"),
        );
        Ok(())
    }

    fn complete(&mut self, draft: ReportDraft) -> Result<(), SessionError> {
        self.advance(Stage::Completed)?;

        let artifacts = &self.session.artifacts;
        let result = SessionResult {
            topic: self.session.topic.clone(),
            personas: artifacts.personas.clone(),
            interview_count: artifacts.outcomes.len(),
            successful_interviews: artifacts.successful_interviews(),
            transcripts: artifacts.outcomes.clone(),
            report: draft.sections.clone(),
            final_report: draft.sections.assemble(),
            report_version: draft.version,
            completed_at: Utc::now(),
        };

        log::info!(
            "[SessionMachine] Session {} completed with report v{}",
            self.session.id,
            draft.version
        );
        self.channel.finish(ServerMessage::Result(result));
        Ok(())
    }

    /// Move the session to `failed` and close the channel with a fatal error
    fn abort(&mut self, error: SessionError) {
        let reason = error.to_string();
        match error {
            SessionError::Cancelled => {
                log::info!("[SessionMachine] Session {} cancelled", self.session.id)
            }
            _ => log::error!(
                "[SessionMachine] Session {} failed in {}: {}",
                self.session.id,
                self.session.stage(),
                reason
            ),
        }

        if !self.session.is_terminal() {
            if let Err(e) = self.session.fail(reason.clone()) {
                log::error!(
                    "[SessionMachine] Could not mark {} failed: {}",
                    self.session.id,
                    e
                );
            }
            self.publish();
        }
        self.channel.finish(ServerMessage::fatal(reason));
    }

    fn advance(&mut self, stage: Stage) -> Result<(), SessionError> {
        let from = self.session.stage();
        self.session.advance(stage)?;
        log::info!(
            "[SessionMachine] Session {}: {} -> {}",
            self.session.id,
            from,
            stage
        );
        self.publish();
        Ok(())
    }

    /// Enter a suspension and publish its prompt for replay
    fn suspend(
        &mut self,
        pending: PendingDecision,
        prompt: ServerMessage,
    ) -> Result<(), SessionError> {
        let from = self.session.stage();
        self.session.suspend(pending)?;
        log::info!(
            "[SessionMachine] Session {}: {} -> {} (awaiting {})",
            self.session.id,
            from,
            self.session.stage(),
            prompt.type_name()
        );
        self.publish();
        self.channel.suspend(prompt);
        Ok(())
    }

    async fn await_decision(&mut self, deadline: Instant) -> Result<Decision, SessionError> {
        let stage = self.session.stage();
        let timeout = self.options.suspension_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            decision = self.inbox.recv() => decision.ok_or(SessionError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                Err(SessionError::SuspensionTimeout { stage, timeout })
            }
        }
    }

    /// Await `op` while answering decisions that arrive outside a suspension
    async fn run_op<T, F>(&mut self, op: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        tokio::pin!(op);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                result = &mut op => return result,
                Some(decision) = self.inbox.recv() => self.reject(&decision),
            }
        }
    }

    fn reject(&self, decision: &Decision) {
        let stage = self.session.stage();
        log::warn!(
            "[SessionMachine] Ignoring {} decision for {} in stage {}",
            decision.kind(),
            self.session.id,
            stage
        );
        self.channel.send(ServerMessage::advisory(format!(
            "Decision {} ignored: session is in stage {}",
            decision.kind(),
            stage
        )));
    }

    fn progress(&self, message: impl Into<String>) -> ProgressData {
        ProgressData::new(self.session.stage(), message)
    }

    fn emit(&self, progress: ProgressData) {
        self.channel.send(ServerMessage::Progress(progress));
    }

    fn persona_summaries(&self) -> Vec<PersonaSummary> {
        self.session
            .artifacts
            .personas
            .iter()
            .map(|p| p.summary())
            .collect()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.session.snapshot());
    }
}

/// Longest wait a single suspension can be given
const MAX_SUSPENSION_WAIT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_SUSPENSION_WAIT)).unwrap_or(now)
}

async fn forward_interview_events(
    channel: Arc<SessionChannel>,
    total: usize,
    mut events: mpsc::UnboundedReceiver<InterviewEvent>,
) {
    while let Some(event) = events.recv().await {
        let progress = match event {
            InterviewEvent::Started { index, persona } => ProgressData::new(
                Stage::InterviewsRunning,
                format!("Interview {}/{} started with {}", index + 1, total, persona),
            ),
            InterviewEvent::Finished {
                index,
                persona,
                status,
                utterances,
            } => ProgressData::new(
                Stage::InterviewsRunning,
                format!(
                    "Interview {}/{} with {} {} ({} utterances)",
                    index + 1,
                    total,
                    persona,
                    status,
                    utterances
                ),
            ),
        };
        channel.send(ServerMessage::Progress(progress.with_sub_activity("interview")));
    }
}
