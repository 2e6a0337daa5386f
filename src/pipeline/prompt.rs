//! Prompt construction for the classifier.
//!
//! The pipeline only depends on [`PromptBuilder`]; the wording below is the
//! default and can be swapped without touching pairing or merge.

use super::types::{PairingUnit, UnitTurns};
use crate::models::{LearnerLabel, SocraticLabel};

/// Turns a unit into the text sent to the classifier. Must be pure.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, unit: &PairingUnit<'_>) -> String;
}

const AGENT_TURN_INSTRUCTIONS: &str = r#"
You are a trained discourse analyst specializing in Socratic dialogue and critical thinking.

Analyze the tutor turn below. It may contain explanatory statements and one or more questions.

STEP 1: Separate question and non-question parts.
- Every segment ending in "?" belongs to question_part; everything else to non_question_part.
- Preserve the wording exactly.

STEP 2: Classify the question part as a whole using the Socratic question types
(Paul & Elder, 2006). Choose ONE label for its dominant intent:
- Clarification: seeks meaning, definitions, or examples.
- Assumptions: probes underlying beliefs or premises.
- Reasons_Evidence: requests justification, explanation, or proof.
- Viewpoints: explores alternative perspectives.
- Implications: examines logical or practical consequences.
- Meta: reflects on the question itself or on the thinking process.
If the turn contains no question, use Other.

STEP 3: Give a one-sentence rationale (10–25 words) and a confidence between 0 and 1.
"#;

const PAIR_INSTRUCTIONS: &str = r#"
You are a trained discourse analyst specializing in Socratic dialogue and critical thinking.

Below is a tutor message followed by the learner's reply. Decide which reasoning
dimensions the learner's reply engages with. Assign every label that applies
(zero or more), each with a one-sentence reasoning:
- Clarification: restates, defines, or gives an example.
- Assumptions: states or questions an underlying premise.
- Reasons_Evidence: justifies a claim or cites evidence.
- Viewpoints: considers another perspective.
- Implications: follows a claim to its consequences.
- Meta: reflects on their own thinking or the question itself.
- Non_Responsive: does not engage with the tutor's question.
"#;

/// Default prompts for the Socratic tutoring study.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocraticPromptBuilder;

impl SocraticPromptBuilder {
    pub fn new() -> Self {
        Self
    }

    fn label_list<T: std::fmt::Display>(labels: &[T]) -> String {
        labels.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(" | ")
    }

    fn agent_turn_prompt(text: &str) -> String {
        let labels = Self::label_list(SocraticLabel::classifiable());
        format!(
            r#"{AGENT_TURN_INSTRUCTIONS}
Respond with a single JSON object and nothing else:
{{
  "non_question_part": "...",
  "question_part": "...",
  "label": "{labels} | Other",
  "rationale": "...",
  "confidence": 0.0
}}

<tutor_turn>
{text}
</tutor_turn>
"#
        )
    }

    fn pair_prompt(agent_text: &str, learner_text: &str) -> String {
        let labels = Self::label_list(LearnerLabel::classifiable());
        format!(
            r#"{PAIR_INSTRUCTIONS}
Respond with a single JSON object and nothing else:
{{
  "bot_message": "...",
  "student_response": "...",
  "assigned_labels": [
    {{"label": "{labels}", "reasoning": "..."}}
  ]
}}

<tutor_message>
{agent_text}
</tutor_message>

<learner_reply>
{learner_text}
</learner_reply>
"#
        )
    }
}

impl PromptBuilder for SocraticPromptBuilder {
    fn build(&self, unit: &PairingUnit<'_>) -> String {
        match unit.turns {
            UnitTurns::Solo { agent } => Self::agent_turn_prompt(&agent.text),
            UnitTurns::Pair { agent, learner } => Self::pair_prompt(&agent.text, &learner.text),
        }
    }
}
