//! ResultReconciler — folds keyed classification results onto base records.
//!
//! Merge is keyed by the record a result describes, never by position, so
//! skipped participants, dropped turns and out-of-order completion cannot
//! shift a result onto the wrong row.

use std::collections::HashSet;

use thiserror::Error;

use super::types::{AnalysisMode, ClassificationResult, ResultMap};
use crate::models::{
    AgentColumns, AnalysisColumns, EnrichedRecord, InteractionRecord, LearnerColumns, RecordKey,
    SocraticLabel,
};

const NO_LABELS: &str = "No labels assigned";
const NO_REASONING: &str = "No reasoning provided";
const LIST_SEPARATOR: &str = "; ";

/// A result whose key matches no base record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeKeyError {
    #[error("Result for {0} has no matching record")]
    OrphanedResult(RecordKey),
}

/// Anything that wraps a base record. Lets merge accept already-enriched
/// output and re-derive from the underlying records.
pub trait RecordView {
    fn record(&self) -> &InteractionRecord;
}

impl RecordView for InteractionRecord {
    fn record(&self) -> &InteractionRecord {
        self
    }
}

impl RecordView for EnrichedRecord<'_> {
    fn record(&self) -> &InteractionRecord {
        self.record
    }
}

impl<T: RecordView + ?Sized> RecordView for &T {
    fn record(&self) -> &InteractionRecord {
        (**self).record()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResultReconciler {
    mode: AnalysisMode,
}

impl ResultReconciler {
    pub fn new(mode: AnalysisMode) -> Self {
        Self { mode }
    }

    /// Empty columns for this run's column family.
    pub fn default_columns(&self) -> AnalysisColumns {
        match self.mode {
            AnalysisMode::AgentOnly => AnalysisColumns::Agent(AgentColumns::default()),
            AnalysisMode::StudentPairs => AnalysisColumns::Learner(LearnerColumns::default()),
        }
    }

    /// One enriched record per base record, in base order. Records without a
    /// result keep default columns.
    pub fn merge<'a, V: RecordView>(&self, base: &'a [V], results: &ResultMap) -> Vec<EnrichedRecord<'a>> {
        base.iter()
            .map(|view| {
                let record = view.record();
                let analysis = results
                    .get(&record.key())
                    .map(|result| self.render(record, result))
                    .unwrap_or_else(|| self.default_columns());
                EnrichedRecord { record, analysis }
            })
            .collect()
    }

    /// Result keys that match no base record. Logged, never fatal.
    pub fn orphaned_keys<V: RecordView>(&self, base: &[V], results: &ResultMap) -> Vec<MergeKeyError> {
        let known: HashSet<RecordKey> = base.iter().map(|v| v.record().key()).collect();
        let mut orphans: Vec<&RecordKey> = results.keys().filter(|k| !known.contains(*k)).collect();
        orphans.sort();

        orphans
            .into_iter()
            .map(|key| {
                let err = MergeKeyError::OrphanedResult(key.clone());
                tracing::warn!(key = %key, "Ignoring result with no matching record");
                err
            })
            .collect()
    }

    /// Render a result into this run's column family.
    pub fn render(&self, record: &InteractionRecord, result: &ClassificationResult) -> AnalysisColumns {
        match self.mode {
            AnalysisMode::AgentOnly => AnalysisColumns::Agent(render_agent(record, result)),
            AnalysisMode::StudentPairs => AnalysisColumns::Learner(render_learner(result)),
        }
    }
}

fn render_agent(record: &InteractionRecord, result: &ClassificationResult) -> AgentColumns {
    match result {
        ClassificationResult::AgentTurn(r) => AgentColumns {
            original_text: record.text.clone(),
            non_question_part: r.non_question_part.clone(),
            question_part: r.question_part.clone(),
            label: r.label.as_str().to_string(),
            rationale: r.rationale.clone(),
            confidence: r.confidence,
        },
        ClassificationResult::Error(e) => AgentColumns {
            original_text: record.text.clone(),
            label: SocraticLabel::Error.as_str().to_string(),
            rationale: e.diagnostic(),
            ..AgentColumns::default()
        },
        // A pair result in an agent-only run cannot come from this
        // pipeline; keep the record untouched.
        ClassificationResult::Pair(_) => AgentColumns::default(),
    }
}

fn render_learner(result: &ClassificationResult) -> LearnerColumns {
    match result {
        ClassificationResult::Pair(r) if r.assigned_labels.is_empty() => LearnerColumns {
            labels: NO_LABELS.to_string(),
            reasoning: NO_REASONING.to_string(),
            label_count: 0,
        },
        ClassificationResult::Pair(r) => LearnerColumns {
            labels: r
                .assigned_labels
                .iter()
                .map(|l| l.label.as_str())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            reasoning: r
                .assigned_labels
                .iter()
                .map(|l| l.reasoning.as_str())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            label_count: r.assigned_labels.len() as u32,
        },
        ClassificationResult::Error(e) => LearnerColumns {
            labels: SocraticLabel::Error.as_str().to_string(),
            reasoning: e.diagnostic(),
            label_count: 1,
        },
        ClassificationResult::AgentTurn(_) => LearnerColumns::default(),
    }
}
