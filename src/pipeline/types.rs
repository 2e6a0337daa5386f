//! Core types for the annotation pipeline.
//!
//! These types model the lifecycle:
//! Record → Pairing Unit → Classification Result → Enriched Record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{InteractionRecord, LearnerLabel, RecordKey, SocraticLabel};

/// Maximum characters of a failure reason kept in a sentinel result.
pub const MAX_ERROR_REASON_CHARS: usize = 50;

// ═══════════════════════════════════════════
// Modes and kinds
// ═══════════════════════════════════════════

/// Which classification pass a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Every tutor turn is classified on its own.
    AgentOnly,
    /// Tutor turns are paired with the learner's reply; the reply is classified.
    StudentPairs,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentOnly => "agent_only",
            Self::StudentPairs => "student_pairs",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent_only" | "agent" | "bot" => Some(Self::AgentOnly),
            "student_pairs" | "student" | "pairs" => Some(Self::StudentPairs),
            _ => None,
        }
    }

    pub fn unit_kind(&self) -> UnitKind {
        match self {
            Self::AgentOnly => UnitKind::AgentTurn,
            Self::StudentPairs => UnitKind::Pair,
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    AgentTurn,
    Pair,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentTurn => "bot",
            Self::Pair => "student",
        }
    }
}

// ═══════════════════════════════════════════
// Pairing Unit (input to the classifier)
// ═══════════════════════════════════════════

/// The turns a unit is built from. Records are borrowed from the store.
#[derive(Debug, Clone, Copy)]
pub enum UnitTurns<'a> {
    Solo {
        agent: &'a InteractionRecord,
    },
    Pair {
        agent: &'a InteractionRecord,
        learner: &'a InteractionRecord,
    },
}

/// One unit of classification work.
#[derive(Debug, Clone, Copy)]
pub struct PairingUnit<'a> {
    pub participant_id: &'a str,
    /// 1-based, per participant.
    pub pair_index: u32,
    pub turns: UnitTurns<'a>,
}

impl<'a> PairingUnit<'a> {
    pub fn solo(agent: &'a InteractionRecord, pair_index: u32) -> Self {
        Self {
            participant_id: &agent.participant_id,
            pair_index,
            turns: UnitTurns::Solo { agent },
        }
    }

    pub fn pair(agent: &'a InteractionRecord, learner: &'a InteractionRecord, pair_index: u32) -> Self {
        Self {
            participant_id: &learner.participant_id,
            pair_index,
            turns: UnitTurns::Pair { agent, learner },
        }
    }

    pub fn kind(&self) -> UnitKind {
        match self.turns {
            UnitTurns::Solo { .. } => UnitKind::AgentTurn,
            UnitTurns::Pair { .. } => UnitKind::Pair,
        }
    }

    pub fn agent(&self) -> &'a InteractionRecord {
        match self.turns {
            UnitTurns::Solo { agent } | UnitTurns::Pair { agent, .. } => agent,
        }
    }

    pub fn learner(&self) -> Option<&'a InteractionRecord> {
        match self.turns {
            UnitTurns::Solo { .. } => None,
            UnitTurns::Pair { learner, .. } => Some(learner),
        }
    }

    /// The record this unit's result is merged onto.
    pub fn target(&self) -> &'a InteractionRecord {
        self.learner().unwrap_or_else(|| self.agent())
    }

    pub fn key(&self) -> RecordKey {
        self.target().key()
    }

    /// Text shown to the classifier.
    pub fn combined_text(&self) -> String {
        match self.turns {
            UnitTurns::Solo { agent } => agent.text.clone(),
            UnitTurns::Pair { agent, learner } => format!(
                "Bot Response: {}\n\nStudent Query: {}",
                agent.text, learner.text
            ),
        }
    }
}

// ═══════════════════════════════════════════
// Classification Result (output of the classifier)
// ═══════════════════════════════════════════

/// Judgment on a single tutor turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentTurnResult {
    pub non_question_part: String,
    pub question_part: String,
    pub label: SocraticLabel,
    pub rationale: String,
    /// Clamped to 0.0–1.0.
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedLabel {
    pub label: LearnerLabel,
    pub reasoning: String,
}

/// Judgment on a learner reply in the context of the preceding tutor turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairResult {
    pub bot_message: String,
    pub student_response: String,
    pub assigned_labels: Vec<AssignedLabel>,
}

/// Placeholder for a unit whose classification failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResult {
    pub kind: UnitKind,
    /// Failure description, at most [`MAX_ERROR_REASON_CHARS`] characters.
    pub reason: String,
    pub original_text: String,
}

impl ErrorResult {
    pub fn new(kind: UnitKind, reason: &str, original_text: impl Into<String>) -> Self {
        Self {
            kind,
            reason: truncate_chars(reason, MAX_ERROR_REASON_CHARS),
            original_text: original_text.into(),
        }
    }

    /// Reason as rendered into output columns.
    pub fn diagnostic(&self) -> String {
        format!("Processing error: {}", self.reason)
    }
}

/// Outcome of classifying one unit. Every unit yields exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationResult {
    AgentTurn(AgentTurnResult),
    Pair(PairResult),
    Error(ErrorResult),
}

impl ClassificationResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn kind(&self) -> UnitKind {
        match self {
            Self::AgentTurn(_) => UnitKind::AgentTurn,
            Self::Pair(_) => UnitKind::Pair,
            Self::Error(e) => e.kind,
        }
    }
}

/// Results keyed by the record each one describes.
pub type ResultMap = HashMap<RecordKey, ClassificationResult>;

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
