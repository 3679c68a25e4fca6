// Data models shared by the session machine, the channel protocol and the REST API

pub mod decision;
pub mod request;
pub mod research;
pub mod stage;

pub use decision::{
    Decision, DecisionKind, PendingDecision, ReportAction, ReportApproval, RewriteType,
};
pub use request::{CreateSessionRequest, ModelProvider, ModelSelection, SessionConfig};
pub use research::{
    excerpt, InterviewOutcome, InterviewStatus, InterviewTranscript, Persona, PersonaPlan,
    PersonaSummary, PreviewLimits, ReportDraft, ReportPreview, ReportSections, Speaker, Turn,
};
pub use stage::{
    can_transition, is_suspension_stage, is_terminal_stage, transition_stage, Stage,
    StateTransitionError,
};
