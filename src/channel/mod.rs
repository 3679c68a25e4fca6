//! Per-session realtime channel
//!
//! Outbound messages fan out to every attached client over a broadcast
//! channel. The channel retains the last suspension event and the terminal
//! message so that a client attaching later, or reconnecting, is brought
//! back in sync. Progress is never retained. Inbound decisions go into a
//! single-slot queue read only by the session machine.

mod messages;

pub use messages::{
    Activity, ClientMessage, ErrorData, FullReport, ProgressData, ReportApprovalPrompt,
    ServerMessage, SessionResult, WorkerCountDecision, WorkerCountPrompt,
};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};

use crate::models::Decision;

/// Queue depth for inbound decisions
const INBOX_CAPACITY: usize = 1;

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(Arc<ServerMessage>),
    /// The session reached a terminal state; no more messages follow
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("A decision is already queued for this session")]
    Busy,
    #[error("Session is no longer accepting decisions")]
    Closed,
}

#[derive(Debug, Default)]
struct Retained {
    suspension: Option<Arc<ServerMessage>>,
    terminal: Option<Arc<ServerMessage>>,
    closed: bool,
    attachments: usize,
    detached_since: Option<Instant>,
}

impl Retained {
    fn replay(&self) -> Vec<Arc<ServerMessage>> {
        self.suspension
            .iter()
            .chain(self.terminal.iter())
            .cloned()
            .collect()
    }
}

pub struct SessionChannel {
    session_id: String,
    tx: broadcast::Sender<ChannelEvent>,
    inbox: mpsc::Sender<Decision>,
    // Publishing and subscribing happen under this lock so a replay
    // is never duplicated by, or missing from, the live stream
    retained: Mutex<Retained>,
}

impl SessionChannel {
    /// Create a channel and the decision receiver owned by the session machine
    pub fn new(session_id: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Decision>) {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (inbox, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let channel = Arc::new(Self {
            session_id: session_id.into(),
            tx,
            inbox,
            retained: Mutex::new(Retained {
                detached_since: Some(Instant::now()),
                ..Default::default()
            }),
        });
        (channel, inbox_rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn lock(&self) -> MutexGuard<'_, Retained> {
        self.retained.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Best-effort delivery of a transient message
    pub fn send(&self, message: ServerMessage) {
        let _ = self.tx.send(ChannelEvent::Message(Arc::new(message)));
    }

    /// Publish a suspension event and keep it for replay
    pub fn suspend(&self, message: ServerMessage) {
        let message = Arc::new(message);
        let mut retained = self.lock();
        retained.suspension = Some(message.clone());
        let _ = self.tx.send(ChannelEvent::Message(message));
    }

    /// Drop the retained suspension once its decision has been consumed
    pub fn clear_suspension(&self) {
        self.lock().suspension = None;
    }

    /// Publish the terminal message and close the stream
    pub fn finish(&self, message: ServerMessage) {
        let message = Arc::new(message);
        let mut retained = self.lock();
        if retained.closed {
            return;
        }
        retained.suspension = None;
        retained.terminal = Some(message.clone());
        retained.closed = true;
        let _ = self.tx.send(ChannelEvent::Message(message));
        let _ = self.tx.send(ChannelEvent::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Messages a newly attached client receives first
    pub fn replay(&self) -> Vec<Arc<ServerMessage>> {
        self.lock().replay()
    }

    /// Discard whatever a lagged receiver still has buffered and return the
    /// retained messages in its place, plus whether the stream has closed.
    /// Holding the lock keeps suspend/finish out while the buffer drains.
    fn resync(&self, receiver: &mut broadcast::Receiver<ChannelEvent>) -> (Vec<Arc<ServerMessage>>, bool) {
        let retained = self.lock();
        loop {
            match receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        (retained.replay(), retained.closed)
    }

    /// Attach a client. The handle replays retained messages, then follows
    /// the live stream. Dropping it detaches.
    pub fn attach(self: &Arc<Self>) -> ChannelHandle {
        let mut retained = self.lock();
        retained.attachments += 1;
        retained.detached_since = None;

        let handle = ChannelHandle {
            channel: self.clone(),
            pending: retained.replay().into(),
            receiver: self.tx.subscribe(),
            closed: retained.closed,
        };

        log::info!(
            "[SessionChannel] Client attached to {} ({} attached, {} replayed)",
            self.session_id,
            retained.attachments,
            handle.pending.len()
        );
        handle
    }

    fn detach(&self) {
        let mut retained = self.lock();
        retained.attachments = retained.attachments.saturating_sub(1);
        if retained.attachments == 0 {
            retained.detached_since = Some(Instant::now());
        }
        log::info!(
            "[SessionChannel] Client detached from {} ({} attached)",
            self.session_id,
            retained.attachments
        );
    }

    pub fn attachments(&self) -> usize {
        self.lock().attachments
    }

    /// How long the channel has had no client attached
    pub fn detached_for(&self) -> Option<Duration> {
        let retained = self.lock();
        if retained.attachments > 0 {
            return None;
        }
        retained.detached_since.map(|since| since.elapsed())
    }

    /// Queue a decision for the session machine
    pub fn submit(&self, decision: Decision) -> Result<(), SubmitError> {
        self.inbox.try_send(decision).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Busy,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }
}

/// A client's view of a session channel
pub struct ChannelHandle {
    channel: Arc<SessionChannel>,
    pending: VecDeque<Arc<ServerMessage>>,
    receiver: broadcast::Receiver<ChannelEvent>,
    closed: bool,
}

impl ChannelHandle {
    pub fn session_id(&self) -> &str {
        self.channel.session_id()
    }

    pub fn channel(&self) -> &Arc<SessionChannel> {
        &self.channel
    }

    /// Next message for this client; `None` once the session has closed
    pub async fn recv(&mut self) -> Option<Arc<ServerMessage>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }
            if self.closed {
                return None;
            }
            match self.receiver.recv().await {
                Ok(ChannelEvent::Message(message)) => return Some(message),
                Ok(ChannelEvent::Close) | Err(RecvError::Closed) => {
                    self.closed = true;
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Resync from retained state; skipped progress is lost
                    log::warn!(
                        "[SessionChannel] Client of {} lagged by {} messages, resyncing",
                        self.channel.session_id(),
                        skipped
                    );
                    let (replay, closed) = self.channel.resync(&mut self.receiver);
                    self.pending.extend(replay);
                    self.closed = closed;
                }
            }
        }
    }

    pub fn submit(&self, decision: Decision) -> Result<(), SubmitError> {
        self.channel.submit(decision)
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.channel.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;

    fn suspension() -> ServerMessage {
        ServerMessage::SuspendWorkerCount(WorkerCountPrompt {
            default_count: 2,
            max_count: 3,
            personas: vec![],
            message: "How many workers?".to_string(),
        })
    }

    #[tokio::test]
    async fn test_late_attach_replays_suspension_only() {
        let (channel, _inbox) = SessionChannel::new("s1", 16);
        channel.send(ServerMessage::progress(Stage::PersonasPending, "working"));
        channel.suspend(suspension());

        let mut handle = channel.attach();
        let first = handle.recv().await.unwrap();
        assert_eq!(*first, suspension());

        channel.send(ServerMessage::progress(Stage::InterviewsRunning, "live"));
        let live = handle.recv().await.unwrap();
        assert_eq!(live.type_name(), "progress");
    }

    #[tokio::test]
    async fn test_reconnect_gets_identical_suspension() {
        let (channel, _inbox) = SessionChannel::new("s1", 16);
        let mut first = channel.attach();
        channel.suspend(suspension());
        let original = first.recv().await.unwrap();
        drop(first);

        let mut second = channel.attach();
        let replayed = second.recv().await.unwrap();
        assert_eq!(
            serde_json::to_string(&*original).unwrap(),
            serde_json::to_string(&*replayed).unwrap()
        );
    }

    #[tokio::test]
    async fn test_cleared_suspension_is_not_replayed() {
        let (channel, _inbox) = SessionChannel::new("s1", 16);
        channel.suspend(suspension());
        channel.clear_suspension();
        assert!(channel.replay().is_empty());
    }

    #[tokio::test]
    async fn test_finish_closes_and_replays_terminal() {
        let (channel, _inbox) = SessionChannel::new("s1", 16);
        let mut live = channel.attach();
        channel.suspend(suspension());
        channel.finish(ServerMessage::fatal("suspension timed out"));

        assert_eq!(live.recv().await.unwrap().type_name(), "suspend:worker_count");
        assert_eq!(live.recv().await.unwrap().type_name(), "error");
        assert!(live.recv().await.is_none());

        // Late attach after close gets the terminal message, then ends
        let mut late = channel.attach();
        assert_eq!(late.recv().await.unwrap().type_name(), "error");
        assert!(late.recv().await.is_none());

        // A second finish is ignored
        channel.finish(ServerMessage::fatal("again"));
        assert_eq!(channel.replay().len(), 1);
    }

    #[tokio::test]
    async fn test_lagged_client_resyncs() {
        let (channel, _inbox) = SessionChannel::new("s1", 2);
        let mut handle = channel.attach();
        channel.suspend(suspension());
        for i in 0..5 {
            channel.send(ServerMessage::progress(Stage::PersonasPending, format!("p{}", i)));
        }

        // Oldest messages were dropped; the retained suspension comes back
        let first = handle.recv().await.unwrap();
        assert!(first.is_suspension());
    }

    fn approval_prompt(version: u32) -> ServerMessage {
        let sections = crate::models::ReportSections {
            introduction: "# Topic".to_string(),
            body: format!("Draft {}", version),
            conclusion: "## Conclusion".to_string(),
        };
        let draft = crate::models::ReportDraft {
            version,
            sections: sections.clone(),
        };
        ServerMessage::SuspendReportApproval(ReportApprovalPrompt {
            topic: "topic".to_string(),
            preview: draft.preview(&crate::models::PreviewLimits::default()),
            full_report: sections,
            options: crate::models::ReportAction::all().to_vec(),
        })
    }

    async fn collect(handle: &mut ChannelHandle) -> Vec<&'static str> {
        let mut seen = Vec::new();
        while let Some(message) = handle.recv().await {
            seen.push(message.type_name());
        }
        seen
    }

    #[tokio::test]
    async fn test_lagged_resync_does_not_repeat_buffered_suspension() {
        let (channel, _inbox) = SessionChannel::new("s1", 2);
        let mut handle = channel.attach();
        for i in 0..3 {
            channel.send(ServerMessage::progress(Stage::ReportDrafting, format!("p{}", i)));
        }
        channel.suspend(approval_prompt(1));
        channel.send(ServerMessage::progress(Stage::ReportSuspended, "after"));

        let first = handle.recv().await.unwrap();
        assert_eq!(first.type_name(), "suspend:report_approval");

        channel.finish(ServerMessage::fatal("done"));
        assert_eq!(collect(&mut handle).await, vec!["error"]);
    }

    #[tokio::test]
    async fn test_lagged_resync_skips_superseded_suspension() {
        let (channel, _inbox) = SessionChannel::new("s1", 2);
        let mut handle = channel.attach();
        for i in 0..3 {
            channel.send(ServerMessage::progress(Stage::PersonasPending, format!("p{}", i)));
        }
        channel.suspend(suspension());
        channel.clear_suspension();
        channel.suspend(approval_prompt(1));

        let first = handle.recv().await.unwrap();
        assert_eq!(*first, approval_prompt(1));

        channel.finish(ServerMessage::fatal("done"));
        assert_eq!(collect(&mut handle).await, vec!["error"]);
    }

    #[tokio::test]
    async fn test_lagged_resync_after_close_ends_stream() {
        let (channel, _inbox) = SessionChannel::new("s1", 2);
        let mut handle = channel.attach();
        for i in 0..4 {
            channel.send(ServerMessage::progress(Stage::InterviewsRunning, format!("p{}", i)));
        }
        channel.finish(ServerMessage::fatal("boom"));

        assert_eq!(collect(&mut handle).await, vec!["error"]);
    }

    #[test]
    fn test_attachment_tracking() {
        let (channel, _inbox) = SessionChannel::new("s1", 4);
        assert!(channel.detached_for().is_some());

        let a = channel.attach();
        let b = channel.attach();
        assert_eq!(channel.attachments(), 2);
        assert!(channel.detached_for().is_none());

        drop(a);
        assert!(channel.detached_for().is_none());
        drop(b);
        assert!(channel.detached_for().is_some());
    }

    #[tokio::test]
    async fn test_single_slot_inbox() {
        let (channel, mut inbox) = SessionChannel::new("s1", 4);
        assert_eq!(channel.submit(Decision::WorkerCount(2)), Ok(()));
        assert_eq!(channel.submit(Decision::WorkerCount(3)), Err(SubmitError::Busy));

        assert_eq!(inbox.recv().await, Some(Decision::WorkerCount(2)));
        assert_eq!(channel.submit(Decision::WorkerCount(3)), Ok(()));

        drop(inbox);
        assert_eq!(channel.submit(Decision::WorkerCount(1)), Err(SubmitError::Closed));
    }
}
