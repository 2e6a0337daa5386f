//! Interaction log records — one row per logged dialogue turn.

use serde::{Deserialize, Serialize};

/// The two recognized turn kinds in a tutoring log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    /// Message written by the automated tutor.
    AgentTurn,
    /// Message written by the human learner.
    LearnerTurn,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentTurn => "agent_turn",
            Self::LearnerTurn => "learner_turn",
        }
    }

    /// Parse a turn-type cell. Accepts the canonical names and the labels
    /// used by the tutoring platform's export ("Bot Response", "Student Query").
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent_turn" | "agentturn" | "agent" | "bot response" | "bot" => Some(Self::AgentTurn),
            "learner_turn" | "learnerturn" | "learner" | "student query" | "student" => {
                Some(Self::LearnerTurn)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a record: interaction ids are only unique within a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub participant_id: String,
    pub interaction_id: String,
}

impl RecordKey {
    pub fn new(participant_id: impl Into<String>, interaction_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            interaction_id: interaction_id.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.participant_id, self.interaction_id)
    }
}

/// One logged event. Created once at load time and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRecord {
    pub participant_id: String,
    pub interaction_id: String,
    pub interaction_type: InteractionType,
    pub text: String,
    pub timestamp: Option<String>,
    /// Source columns outside the core schema, carried through to the output.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InteractionRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.participant_id, &self.interaction_id)
    }

    pub fn is_agent_turn(&self) -> bool {
        self.interaction_type == InteractionType::AgentTurn
    }

    pub fn is_learner_turn(&self) -> bool {
        self.interaction_type == InteractionType::LearnerTurn
    }
}

// ═══════════════════════════════════════════
// Output schema
// ═══════════════════════════════════════════

/// Header names and turn-type values for the core columns, as resolved from
/// the source, so an enriched export keeps the layout it was loaded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreColumns {
    pub participant_id: String,
    pub interaction_id: String,
    pub interaction_type: String,
    pub text: String,
    /// `None` when the source had no timestamp column.
    pub timestamp: Option<String>,
    pub agent_turn_value: String,
    pub learner_turn_value: String,
}

impl Default for CoreColumns {
    fn default() -> Self {
        Self {
            participant_id: "participant_id".into(),
            interaction_id: "interaction_id".into(),
            interaction_type: "interaction_type".into(),
            text: "text".into(),
            timestamp: Some("timestamp".into()),
            agent_turn_value: InteractionType::AgentTurn.as_str().into(),
            learner_turn_value: InteractionType::LearnerTurn.as_str().into(),
        }
    }
}

impl CoreColumns {
    /// The cell value written for a turn type.
    pub fn turn_value(&self, t: InteractionType) -> &str {
        match t {
            InteractionType::AgentTurn => &self.agent_turn_value,
            InteractionType::LearnerTurn => &self.learner_turn_value,
        }
    }

    /// Core header names in output order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![
            self.participant_id.as_str(),
            self.interaction_id.as_str(),
            self.interaction_type.as_str(),
            self.text.as_str(),
        ];
        names.extend(self.timestamp.as_deref());
        names
    }
}
