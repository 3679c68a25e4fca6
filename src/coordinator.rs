//! Parallel interview coordinator
//!
//! Every persona gets its task handle up front. A counting semaphore admits
//! at most `concurrency` of them at once, so later interviews start as
//! earlier ones finish. The coordinator waits for all of them and returns
//! one outcome per persona, in persona order, whatever the completion
//! order was. A failed, panicked or cancelled task becomes a failure marker
//! in its slot and never aborts its siblings.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::agent_port::AgentPort;
use crate::interview::{InterviewLimits, InterviewTask};
use crate::models::{InterviewOutcome, Persona};

/// Lifecycle notifications for progress reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterviewEvent {
    Started {
        index: usize,
        persona: String,
    },
    Finished {
        index: usize,
        persona: String,
        status: &'static str,
        utterances: usize,
    },
}

#[derive(Clone)]
pub struct ParallelCoordinator {
    agent: Arc<dyn AgentPort>,
    limits: Arc<InterviewLimits>,
}

impl ParallelCoordinator {
    pub fn new(agent: Arc<dyn AgentPort>, limits: Arc<InterviewLimits>) -> Self {
        Self { agent, limits }
    }

    /// Run one interview per persona with at most `concurrency` in flight
    pub async fn run(
        &self,
        topic: &str,
        personas: &[Persona],
        concurrency: usize,
        cancel: CancellationToken,
        events: Option<mpsc::UnboundedSender<InterviewEvent>>,
    ) -> Vec<InterviewOutcome> {
        let concurrency = concurrency.clamp(1, personas.len().max(1));
        let gate = Arc::new(Semaphore::new(concurrency));

        log::info!(
            "[Coordinator] Starting {} interviews with {} workers",
            personas.len(),
            concurrency
        );

        let mut handles = Vec::with_capacity(personas.len());
        for (index, persona) in personas.iter().enumerate() {
            let task = InterviewTask::new(
                index,
                persona.clone(),
                topic,
                self.agent.clone(),
                self.limits.clone(),
            );
            let gate = gate.clone();
            let cancel = cancel.clone();
            let events = events.clone();

            handles.push(tokio::spawn(async move {
                let name = task.persona.name.clone();

                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return InterviewOutcome::failed(index, &name, "cancelled");
                    }
                    permit = gate.acquire_owned() => permit,
                };
                let _permit = match permit {
                    Ok(permit) => permit,
                    Err(_) => return InterviewOutcome::failed(index, &name, "admission gate closed"),
                };

                if let Some(tx) = &events {
                    let _ = tx.send(InterviewEvent::Started {
                        index,
                        persona: name.clone(),
                    });
                }

                let outcome = task.run(cancel).await;

                if let Some(tx) = &events {
                    let _ = tx.send(InterviewEvent::Finished {
                        index,
                        persona: name,
                        status: outcome.status_label(),
                        utterances: outcome.transcript.len(),
                    });
                }

                outcome
            }));
        }

        // Pre-sized slot array indexed by persona position
        let mut slots: Vec<Option<InterviewOutcome>> = vec![None; personas.len()];
        for (index, result) in join_all(handles).await.into_iter().enumerate() {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("[Coordinator] Interview task {} panicked: {}", index, e);
                    InterviewOutcome::failed(
                        index,
                        &personas[index].name,
                        format!("interview task panicked: {}", e),
                    )
                }
            };
            let slot = outcome.index;
            slots[slot] = Some(outcome);
        }

        let outcomes: Vec<InterviewOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    InterviewOutcome::failed(index, &personas[index].name, "no outcome reported")
                })
            })
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        log::info!(
            "[Coordinator] Interviews finished: {}/{} usable",
            succeeded,
            outcomes.len()
        );

        outcomes
    }
}
