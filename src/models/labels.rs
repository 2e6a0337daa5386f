//! Closed label sets shared by prompt construction, reply parsing, and merge.
//!
//! The classifier is told which labels exist; whatever it answers is mapped
//! back onto these enums. Unknown labels collapse to `Other` so nothing
//! outside the set ever reaches the output. `Error` is never parsed from a
//! reply: it is only produced for failed units.

use serde::{Deserialize, Serialize};

/// Lowercase a label and collapse every run of non-alphanumerics to `_`.
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

// ═══════════════════════════════════════════
// Tutor question types
// ═══════════════════════════════════════════

/// Socratic question types (Paul & Elder, 2006) for a tutor turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocraticLabel {
    Clarification,
    Assumptions,
    #[serde(rename = "Reasons_Evidence")]
    ReasonsEvidence,
    Viewpoints,
    Implications,
    Meta,
    Other,
    Error,
}

impl SocraticLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clarification => "Clarification",
            Self::Assumptions => "Assumptions",
            Self::ReasonsEvidence => "Reasons_Evidence",
            Self::Viewpoints => "Viewpoints",
            Self::Implications => "Implications",
            Self::Meta => "Meta",
            Self::Other => "Other",
            Self::Error => "Error",
        }
    }

    /// Parse a classifier-supplied label. Never yields `Error`.
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "clarification" | "clarify" => Some(Self::Clarification),
            "assumptions" | "assumption" => Some(Self::Assumptions),
            "reasons_evidence" | "reasons_and_evidence" | "reasons" | "evidence" => {
                Some(Self::ReasonsEvidence)
            }
            "viewpoints" | "viewpoint" | "perspectives" | "viewpoints_perspectives" => {
                Some(Self::Viewpoints)
            }
            "implications" | "implication" | "consequences" | "implications_consequences" => {
                Some(Self::Implications)
            }
            "meta" | "meta_question" | "questions_about_the_question" => Some(Self::Meta),
            "other" | "none" | "no_question" => Some(Self::Other),
            _ => None,
        }
    }

    /// The six classifiable types, in prompt order.
    pub fn classifiable() -> &'static [SocraticLabel] {
        &[
            Self::Clarification,
            Self::Assumptions,
            Self::ReasonsEvidence,
            Self::Viewpoints,
            Self::Implications,
            Self::Meta,
        ]
    }
}

impl std::fmt::Display for SocraticLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Learner response dimensions
// ═══════════════════════════════════════════

/// Reasoning dimensions a learner response can engage with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearnerLabel {
    Clarification,
    Assumptions,
    #[serde(rename = "Reasons_Evidence")]
    ReasonsEvidence,
    Viewpoints,
    Implications,
    Meta,
    #[serde(rename = "Non_Responsive")]
    NonResponsive,
    Other,
    Error,
}

impl LearnerLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clarification => "Clarification",
            Self::Assumptions => "Assumptions",
            Self::ReasonsEvidence => "Reasons_Evidence",
            Self::Viewpoints => "Viewpoints",
            Self::Implications => "Implications",
            Self::Meta => "Meta",
            Self::NonResponsive => "Non_Responsive",
            Self::Other => "Other",
            Self::Error => "Error",
        }
    }

    /// Parse a classifier-supplied label. Never yields `Error`.
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "clarification" | "clarify" => Some(Self::Clarification),
            "assumptions" | "assumption" => Some(Self::Assumptions),
            "reasons_evidence" | "reasons_and_evidence" | "reasons" | "evidence" => {
                Some(Self::ReasonsEvidence)
            }
            "viewpoints" | "viewpoint" | "perspectives" => Some(Self::Viewpoints),
            "implications" | "implication" | "consequences" => Some(Self::Implications),
            "meta" | "metacognition" | "metacognitive" => Some(Self::Meta),
            "non_responsive" | "nonresponsive" | "off_topic" | "no_response" => {
                Some(Self::NonResponsive)
            }
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn classifiable() -> &'static [LearnerLabel] {
        &[
            Self::Clarification,
            Self::Assumptions,
            Self::ReasonsEvidence,
            Self::Viewpoints,
            Self::Implications,
            Self::Meta,
            Self::NonResponsive,
        ]
    }
}

impl std::fmt::Display for LearnerLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
