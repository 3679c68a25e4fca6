// Research artifacts: personas, interview transcripts and report drafts

use serde::{Deserialize, Serialize};

// ============================================================================
// Personas
// ============================================================================

/// A generated analyst profile that drives one interview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub name: String,
    pub role: String,
    pub affiliation: String,
    /// One-paragraph description of the analyst's focus and motivations
    pub description: String,
}

impl Persona {
    /// Render the persona as a prompt fragment
    pub fn profile(&self) -> String {
        format!(
            "Name: {}\nRole: {}\nAffiliation: {}\nDescription: {}\n",
            self.name, self.role, self.affiliation, self.description
        )
    }

    pub fn summary(&self) -> PersonaSummary {
        PersonaSummary {
            name: self.name.clone(),
            role: self.role.clone(),
            affiliation: self.affiliation.clone(),
        }
    }
}

/// Short persona view used in progress and suspension events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSummary {
    pub name: String,
    pub role: String,
    pub affiliation: String,
}

/// Output of the outline stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaPlan {
    pub outline: String,
    pub personas: Vec<Persona>,
}

// ============================================================================
// Interviews
// ============================================================================

/// Who produced an interview turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Analyst,
    Expert,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Analyst => "analyst",
            Speaker::Expert => "expert",
        }
    }

    pub fn other(&self) -> Speaker {
        match self {
            Speaker::Analyst => Speaker::Expert,
            Speaker::Expert => Speaker::Analyst,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

/// Append-only record of one interview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewTranscript {
    pub persona_name: String,
    turns: Vec<Turn>,
}

impl InterviewTranscript {
    pub fn new(persona_name: impl Into<String>) -> Self {
        Self {
            persona_name: persona_name.into(),
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_speaker(&self) -> Option<Speaker> {
        self.turns.last().map(|t| t.speaker)
    }

    /// Plain-text rendering used as drafting context
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.speaker, t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Terminal status of a single interview task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InterviewStatus {
    /// Interview reached its turn cap or the closing signal
    Completed { closed_early: bool },
    /// Interview was cut short but kept its turns
    Partial { reason: String },
    /// Interview produced nothing usable
    Failed { error: String },
}

/// Result slot for one persona's interview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewOutcome {
    /// Position of the persona in generation order
    pub index: usize,
    #[serde(flatten)]
    pub status: InterviewStatus,
    pub transcript: InterviewTranscript,
}

impl InterviewOutcome {
    pub fn failed(index: usize, persona_name: &str, error: impl Into<String>) -> Self {
        Self {
            index,
            status: InterviewStatus::Failed {
                error: error.into(),
            },
            transcript: InterviewTranscript::new(persona_name),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, InterviewStatus::Failed { .. })
    }

    pub fn status_label(&self) -> &'static str {
        match self.status {
            InterviewStatus::Completed { .. } => "completed",
            InterviewStatus::Partial { .. } => "partial",
            InterviewStatus::Failed { .. } => "failed",
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Structured report body as returned by the drafting agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSections {
    pub introduction: String,
    pub body: String,
    pub conclusion: String,
}

impl ReportSections {
    pub fn total_length(&self) -> usize {
        self.introduction.chars().count()
            + self.body.chars().count()
            + self.conclusion.chars().count()
    }

    /// Join the sections into one markdown document
    pub fn assemble(&self) -> String {
        let body = self.body.trim();

        // Drafts sometimes come back as a complete report already
        let has_title = body.starts_with("# ") || body.contains("\n# ");
        let has_conclusion = body.to_lowercase().contains("## conclusion");
        if has_title && has_conclusion {
            return body.to_string();
        }

        let body = body
            .strip_prefix("## Insights")
            .map(str::trim)
            .unwrap_or(body);

        format!(
            "{}\n\n---\n\n## Main Findings\n\n{}\n\n---\n\n{}",
            self.introduction.trim(),
            body,
            self.conclusion.trim()
        )
    }
}

/// A versioned report draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
    /// Starts at 1, never reused within a session
    pub version: u32,
    pub sections: ReportSections,
}

impl ReportDraft {
    pub fn preview(&self, limits: &PreviewLimits) -> ReportPreview {
        ReportPreview {
            version: self.version,
            introduction_preview: excerpt(&self.sections.introduction, limits.introduction),
            body_preview: excerpt(&self.sections.body, limits.body),
            conclusion_preview: excerpt(&self.sections.conclusion, limits.conclusion),
            total_length: self.sections.total_length(),
        }
    }
}

/// Character budgets for report previews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewLimits {
    pub introduction: usize,
    pub body: usize,
    pub conclusion: usize,
}

impl Default for PreviewLimits {
    fn default() -> Self {
        Self {
            introduction: 200,
            body: 300,
            conclusion: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPreview {
    pub version: u32,
    pub introduction_preview: String,
    pub body_preview: String,
    pub conclusion_preview: String,
    pub total_length: usize,
}

/// Take at most `max_chars` characters without splitting a code point
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
