//! Records with analysis columns attached by the reconciler.

use serde::Serialize;
use serde_json::{Map, Value};

use super::record::{CoreColumns, InteractionRecord};

/// Analysis columns for a tutor-turn classification run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentColumns {
    pub original_text: String,
    pub non_question_part: String,
    pub question_part: String,
    pub label: String,
    pub rationale: String,
    pub confidence: f32,
}

/// Analysis columns for a learner-response classification run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearnerColumns {
    pub labels: String,
    pub reasoning: String,
    pub label_count: u32,
}

/// One run attaches exactly one column family to every record, so the
/// output schema stays uniform across the dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisColumns {
    Agent(AgentColumns),
    Learner(LearnerColumns),
}

impl AnalysisColumns {
    /// Whether the columns still hold their empty defaults.
    pub fn is_default(&self) -> bool {
        match self {
            Self::Agent(c) => *c == AgentColumns::default(),
            Self::Learner(c) => *c == LearnerColumns::default(),
        }
    }

    /// Column names of this family, in output order.
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            Self::Agent(_) => &[
                "original_text",
                "non_question_part",
                "question_part",
                "label",
                "rationale",
                "confidence",
            ],
            Self::Learner(_) => &["labels", "reasoning", "label_count"],
        }
    }

    fn write_into(&self, row: &mut Map<String, Value>) {
        let value = match self {
            Self::Agent(c) => serde_json::to_value(c),
            Self::Learner(c) => serde_json::to_value(c),
        };
        if let Ok(Value::Object(columns)) = value {
            row.extend(columns);
        }
    }
}

/// A base record plus the analysis columns of one run. Borrows the record.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord<'a> {
    pub record: &'a InteractionRecord,
    pub analysis: AnalysisColumns,
}

impl EnrichedRecord<'_> {
    /// Flatten into an output row: core columns under the headers they were
    /// loaded from, untouched extra source columns, then analysis columns.
    pub fn to_row(&self, columns: &CoreColumns) -> Map<String, Value> {
        let r = self.record;
        let mut row = Map::new();
        row.insert(columns.participant_id.clone(), Value::String(r.participant_id.clone()));
        row.insert(columns.interaction_id.clone(), Value::String(r.interaction_id.clone()));
        row.insert(
            columns.interaction_type.clone(),
            Value::String(columns.turn_value(r.interaction_type).to_string()),
        );
        row.insert(columns.text.clone(), Value::String(r.text.clone()));
        if let Some(name) = &columns.timestamp {
            row.insert(
                name.clone(),
                r.timestamp.clone().map(Value::String).unwrap_or(Value::Null),
            );
        }
        for (k, v) in &r.extra {
            row.insert(k.clone(), v.clone());
        }
        self.analysis.write_into(&mut row);
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionType;

    fn record() -> InteractionRecord {
        let mut extra = Map::new();
        extra.insert("Course".into(), Value::String("BIO 100".into()));
        InteractionRecord {
            participant_id: "u1".into(),
            interaction_id: "s2".into(),
            interaction_type: InteractionType::LearnerTurn,
            text: "Because of sunlight".into(),
            timestamp: None,
            extra,
        }
    }

    #[test]
    fn row_contains_core_extra_and_analysis_columns() {
        let rec = record();
        let enriched = EnrichedRecord {
            record: &rec,
            analysis: AnalysisColumns::Learner(LearnerColumns {
                labels: "Reasons_Evidence".into(),
                reasoning: "Cites a cause".into(),
                label_count: 1,
            }),
        };
        let row = enriched.to_row(&CoreColumns::default());
        assert_eq!(row["participant_id"], "u1");
        assert_eq!(row["interaction_type"], "learner_turn");
        assert_eq!(row["timestamp"], Value::Null);
        assert_eq!(row["Course"], "BIO 100");
        assert_eq!(row["labels"], "Reasons_Evidence");
        assert_eq!(row["label_count"], 1);
    }

    #[test]
    fn default_columns_are_present_not_missing() {
        let rec = record();
        let enriched = EnrichedRecord {
            record: &rec,
            analysis: AnalysisColumns::Agent(AgentColumns::default()),
        };
        assert!(enriched.analysis.is_default());
        let row = enriched.to_row(&CoreColumns::default());
        for column in ["original_text", "non_question_part", "question_part", "label", "rationale"] {
            assert_eq!(row[column], "", "column {column} should default to empty");
        }
        assert_eq!(row["confidence"], 0.0);
    }

    #[test]
    fn row_uses_resolved_headers_and_turn_values() {
        let rec = record();
        let enriched = EnrichedRecord {
            record: &rec,
            analysis: AnalysisColumns::Learner(LearnerColumns::default()),
        };
        let columns = CoreColumns {
            participant_id: "Asurite".into(),
            interaction_id: "Interaction ID".into(),
            interaction_type: "Interaction Type".into(),
            text: "Text".into(),
            timestamp: None,
            agent_turn_value: "Bot Response".into(),
            learner_turn_value: "Student Query".into(),
        };

        let row = enriched.to_row(&columns);

        assert_eq!(row["Asurite"], "u1");
        assert_eq!(row["Interaction ID"], "s2");
        assert_eq!(row["Interaction Type"], "Student Query");
        assert_eq!(row["Text"], "Because of sunlight");
        for canonical in ["participant_id", "interaction_id", "interaction_type", "text", "timestamp"] {
            assert!(!row.contains_key(canonical), "unexpected column {canonical}");
        }
        assert_eq!(row.len(), 4 + 1 + 3);
    }
}
