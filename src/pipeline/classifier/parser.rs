//! Tolerant parsing of classifier replies into typed results.

use serde::Deserialize;
use serde_json::Value;

use super::ClassificationError;
use crate::models::{LearnerLabel, SocraticLabel};
use crate::pipeline::types::{
    AgentTurnResult, AssignedLabel, ClassificationResult, PairResult, PairingUnit, UnitTurns,
};

/// Parse a reply as a JSON object. If the whole text is not one, salvage the
/// span from the first `{` to the last `}` (code fences, chatter around the
/// payload) and parse that instead.
pub fn parse_json_payload(raw: &str) -> Result<Value, ClassificationError> {
    let trimmed = raw.trim();

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => return Ok(Value::Object(map)),
        // A reply that is itself a JSON string wrapping the payload.
        Ok(Value::String(inner)) if inner.trim_start().starts_with('{') => {
            return parse_json_payload(&inner);
        }
        _ => {}
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str::<Value>(&trimmed[start..=end])
            .map_err(|e| ClassificationError::JsonParsing(e.to_string()))
            .and_then(|v| match v {
                Value::Object(_) => Ok(v),
                _ => Err(ClassificationError::MalformedReply("expected a JSON object".into())),
            }),
        _ => Err(ClassificationError::MalformedReply(
            "No JSON object found in reply".into(),
        )),
    }
}

/// Parse a raw reply into the result shape for `unit`'s kind.
pub fn parse_reply(unit: &PairingUnit<'_>, raw: &str) -> Result<ClassificationResult, ClassificationError> {
    let payload = parse_json_payload(raw)?;
    match unit.turns {
        UnitTurns::Solo { .. } => parse_agent_turn(payload).map(ClassificationResult::AgentTurn),
        UnitTurns::Pair { agent, learner } => {
            parse_pair(payload, &agent.text, &learner.text).map(ClassificationResult::Pair)
        }
    }
}

// ═══════════════════════════════════════════
// Tutor turn
// ═══════════════════════════════════════════

#[derive(Deserialize)]
struct RawAgentReply {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    socratic_label: Option<String>,
    #[serde(default)]
    non_question_part: Option<String>,
    #[serde(default)]
    question_part: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
}

fn parse_confidence(value: Option<&Value>) -> f32 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0) as f32,
        _ => 0.0,
    }
}

fn parse_agent_turn(payload: Value) -> Result<AgentTurnResult, ClassificationError> {
    let raw: RawAgentReply =
        serde_json::from_value(payload).map_err(|e| ClassificationError::JsonParsing(e.to_string()))?;

    let present = |l: &String| !l.trim().is_empty();
    let raw_label = raw
        .label
        .filter(present)
        .or(raw.socratic_label.filter(present))
        .ok_or_else(|| ClassificationError::MissingField("label".into()))?;

    let label = SocraticLabel::parse(&raw_label).unwrap_or_else(|| {
        tracing::warn!(label = %raw_label, "Unrecognized question label, recording as Other");
        SocraticLabel::Other
    });

    Ok(AgentTurnResult {
        non_question_part: raw.non_question_part.unwrap_or_default(),
        question_part: raw.question_part.unwrap_or_default(),
        label,
        rationale: raw.rationale.unwrap_or_default(),
        confidence: parse_confidence(raw.confidence.as_ref()),
    })
}

// ═══════════════════════════════════════════
// Tutor/learner pair
// ═══════════════════════════════════════════

#[derive(Deserialize)]
struct RawPairReply {
    #[serde(default)]
    bot_message: Option<String>,
    #[serde(default)]
    student_response: Option<String>,
    #[serde(default)]
    assigned_labels: Option<Vec<Value>>,
}

/// Entries are parsed leniently: a bare string is a label without
/// reasoning, and entries without a label are skipped.
fn parse_assigned_label(entry: &Value) -> Option<AssignedLabel> {
    let (raw_label, reasoning) = match entry {
        Value::String(s) => (s.as_str(), String::new()),
        Value::Object(map) => (
            map.get("label").and_then(Value::as_str)?,
            map.get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        _ => return None,
    };

    if raw_label.trim().is_empty() {
        return None;
    }

    let label = LearnerLabel::parse(raw_label).unwrap_or_else(|| {
        tracing::warn!(label = %raw_label, "Unrecognized learner label, recording as Other");
        LearnerLabel::Other
    });
    Some(AssignedLabel { label, reasoning })
}

fn parse_pair(payload: Value, agent_text: &str, learner_text: &str) -> Result<PairResult, ClassificationError> {
    let raw: RawPairReply =
        serde_json::from_value(payload).map_err(|e| ClassificationError::JsonParsing(e.to_string()))?;

    let entries = raw
        .assigned_labels
        .ok_or_else(|| ClassificationError::MissingField("assigned_labels".into()))?;

    let assigned_labels: Vec<AssignedLabel> = entries.iter().filter_map(parse_assigned_label).collect();
    if assigned_labels.len() < entries.len() {
        tracing::debug!(
            dropped = entries.len() - assigned_labels.len(),
            "Skipped assigned_labels entries without a label"
        );
    }

    Ok(PairResult {
        bot_message: raw.bot_message.unwrap_or_else(|| agent_text.to_string()),
        student_response: raw.student_response.unwrap_or_else(|| learner_text.to_string()),
        assigned_labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InteractionRecord, InteractionType};

    fn rec(id: &str, t: InteractionType, text: &str) -> InteractionRecord {
        InteractionRecord {
            participant_id: "u1".into(),
            interaction_id: id.into(),
            interaction_type: t,
            text: text.into(),
            timestamp: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn salvages_json_from_code_fence() {
        let value = parse_json_payload("Sure! ```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[test]
    fn parses_clean_json_directly() {
        let value = parse_json_payload(r#"  {"label": "Meta"}  "#).unwrap();
        assert_eq!(value["label"], "Meta");
    }

    #[test]
    fn unwraps_json_encoded_string_reply() {
        let value = parse_json_payload(r#""{\"a\": 2}""#).unwrap();
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn text_without_braces_is_malformed() {
        let err = parse_json_payload("I cannot classify this.").unwrap_err();
        assert!(matches!(err, ClassificationError::MalformedReply(_)));
    }

    #[test]
    fn reversed_braces_are_malformed() {
        let err = parse_json_payload("} nothing here {").unwrap_err();
        assert!(matches!(err, ClassificationError::MalformedReply(_)));
    }

    #[test]
    fn broken_salvage_span_is_json_error() {
        let err = parse_json_payload("Here: {\"a\": } done").unwrap_err();
        assert!(matches!(err, ClassificationError::JsonParsing(_)));
    }

    #[test]
    fn agent_reply_maps_fields_and_clamps_confidence() {
        let a = rec("a1", InteractionType::AgentTurn, "Why?");
        let unit = PairingUnit::solo(&a, 1);
        let raw = r#"{"non_question_part": "Great.", "question_part": "Why?", "label": "Reasons & Evidence", "rationale": "Asks for justification.", "confidence": 1.7}"#;

        let result = parse_reply(&unit, raw).unwrap();

        match result {
            ClassificationResult::AgentTurn(r) => {
                assert_eq!(r.label, SocraticLabel::ReasonsEvidence);
                assert_eq!(r.non_question_part, "Great.");
                assert_eq!(r.question_part, "Why?");
                assert_eq!(r.confidence, 1.0);
            }
            other => panic!("expected agent result, got {other:?}"),
        }
    }

    #[test]
    fn agent_reply_accepts_socratic_label_alias_and_string_confidence() {
        let a = rec("a1", InteractionType::AgentTurn, "Why?");
        let unit = PairingUnit::solo(&a, 1);
        let raw = r#"{"socratic_label": "Viewpoints", "confidence": "0.86"}"#;

        let ClassificationResult::AgentTurn(r) = parse_reply(&unit, raw).unwrap() else {
            panic!("expected agent result");
        };
        assert_eq!(r.label, SocraticLabel::Viewpoints);
        assert!((r.confidence - 0.86).abs() < 1e-6);
        assert_eq!(r.rationale, "");
    }

    #[test]
    fn agent_reply_with_both_label_keys_prefers_label() {
        let a = rec("a1", InteractionType::AgentTurn, "Why?");
        let unit = PairingUnit::solo(&a, 1);

        let raw = r#"{"label": "Clarification", "socratic_label": "Viewpoints"}"#;
        let ClassificationResult::AgentTurn(r) = parse_reply(&unit, raw).unwrap() else {
            panic!("expected agent result");
        };
        assert_eq!(r.label, SocraticLabel::Clarification);

        let raw = r#"{"label": "", "socratic_label": "Viewpoints"}"#;
        let ClassificationResult::AgentTurn(r) = parse_reply(&unit, raw).unwrap() else {
            panic!("expected agent result");
        };
        assert_eq!(r.label, SocraticLabel::Viewpoints);
    }

    #[test]
    fn agent_reply_without_label_is_missing_field() {
        let a = rec("a1", InteractionType::AgentTurn, "Why?");
        let unit = PairingUnit::solo(&a, 1);

        let err = parse_reply(&unit, r#"{"rationale": "x"}"#).unwrap_err();
        assert_eq!(err, ClassificationError::MissingField("label".into()));
    }

    #[test]
    fn unknown_agent_label_becomes_other() {
        let a = rec("a1", InteractionType::AgentTurn, "Why?");
        let unit = PairingUnit::solo(&a, 1);

        let ClassificationResult::AgentTurn(r) = parse_reply(&unit, r#"{"label": "Rhetorical"}"#).unwrap() else {
            panic!("expected agent result");
        };
        assert_eq!(r.label, SocraticLabel::Other);
    }

    #[test]
    fn pair_reply_parses_labels_leniently() {
        let a = rec("a1", InteractionType::AgentTurn, "Why?");
        let s = rec("s2", InteractionType::LearnerTurn, "Because light.");
        let unit = PairingUnit::pair(&a, &s, 1);
        let raw = r#"Result:
        {"assigned_labels": [
            {"label": "Reasons_Evidence", "reasoning": "Gives a cause."},
            "meta",
            {"reasoning": "no label"},
            {"label": "Guessing", "reasoning": "?"}
        ]}"#;

        let ClassificationResult::Pair(r) = parse_reply(&unit, raw).unwrap() else {
            panic!("expected pair result");
        };
        let labels: Vec<_> = r.assigned_labels.iter().map(|l| l.label).collect();
        assert_eq!(labels, vec![LearnerLabel::ReasonsEvidence, LearnerLabel::Meta, LearnerLabel::Other]);
        assert_eq!(r.assigned_labels[0].reasoning, "Gives a cause.");
        assert_eq!(r.bot_message, "Why?");
        assert_eq!(r.student_response, "Because light.");
    }

    #[test]
    fn pair_reply_with_empty_labels_is_valid() {
        let a = rec("a1", InteractionType::AgentTurn, "Why?");
        let s = rec("s2", InteractionType::LearnerTurn, "ok");
        let unit = PairingUnit::pair(&a, &s, 1);

        let ClassificationResult::Pair(r) = parse_reply(&unit, r#"{"assigned_labels": []}"#).unwrap() else {
            panic!("expected pair result");
        };
        assert!(r.assigned_labels.is_empty());
    }

    #[test]
    fn pair_reply_without_labels_is_missing_field() {
        let a = rec("a1", InteractionType::AgentTurn, "Why?");
        let s = rec("s2", InteractionType::LearnerTurn, "ok");
        let unit = PairingUnit::pair(&a, &s, 1);

        let err = parse_reply(&unit, r#"{"bot_message": "Why?"}"#).unwrap_err();
        assert_eq!(err, ClassificationError::MissingField("assigned_labels".into()));
    }
}
