//! Run-level statistics, computed from the enriched output.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::AnalysisMode;
use crate::models::{AnalysisColumns, EnrichedRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// Learner-turn labelling for one participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantCoverage {
    pub participant_id: String,
    pub learner_turns: usize,
    pub labelled_turns: usize,
    pub average_labels: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: AnalysisMode,
    pub records: usize,

    pub participants_total: usize,
    pub participants_paired: usize,
    pub participants_skipped: usize,
    pub participants_malformed: usize,

    pub units_total: usize,
    pub units_classified: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    pub units_not_attempted: usize,

    pub records_enriched: usize,
    pub orphaned_keys: usize,

    /// Most common first; ties by label name.
    pub label_distribution: Vec<LabelCount>,
    pub learners_with_labels: usize,
    pub average_labels_per_learner: f64,
    pub participant_coverage: Vec<ParticipantCoverage>,

    pub cancelled: bool,
    pub halted_empty: bool,
    pub duration_ms: u64,
}

impl BatchSummary {
    /// A summary with every counter at zero.
    pub fn new(mode: AnalysisMode, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            mode,
            records: 0,
            participants_total: 0,
            participants_paired: 0,
            participants_skipped: 0,
            participants_malformed: 0,
            units_total: 0,
            units_classified: 0,
            units_succeeded: 0,
            units_failed: 0,
            units_not_attempted: 0,
            records_enriched: 0,
            orphaned_keys: 0,
            label_distribution: Vec::new(),
            learners_with_labels: 0,
            average_labels_per_learner: 0.0,
            participant_coverage: Vec::new(),
            cancelled: false,
            halted_empty: false,
            duration_ms: 0,
        }
    }

    /// Fill the output-derived fields from the enriched records.
    pub fn record_output(&mut self, enriched: &[EnrichedRecord<'_>]) {
        self.records = enriched.len();
        self.records_enriched = enriched.iter().filter(|e| !e.analysis.is_default()).count();

        let mut counts: HashMap<String, usize> = HashMap::new();
        // participant -> (learner turns, labelled turns, label total), first-seen order
        let mut coverage: Vec<(String, usize, usize, u64)> = Vec::new();
        let mut learner_turns = 0usize;
        let mut learners_with_labels = 0usize;
        let mut label_total = 0u64;

        for e in enriched {
            match &e.analysis {
                AnalysisColumns::Agent(c) => {
                    if !c.label.is_empty() {
                        *counts.entry(c.label.clone()).or_default() += 1;
                    }
                }
                AnalysisColumns::Learner(c) => {
                    if !e.record.is_learner_turn() {
                        continue;
                    }
                    learner_turns += 1;
                    label_total += u64::from(c.label_count);
                    if c.label_count > 0 {
                        learners_with_labels += 1;
                        for label in c.labels.split(';').map(str::trim).filter(|l| !l.is_empty()) {
                            *counts.entry(label.to_string()).or_default() += 1;
                        }
                    }

                    let pid = &e.record.participant_id;
                    let idx = match coverage.iter().position(|(p, ..)| p == pid) {
                        Some(idx) => idx,
                        None => {
                            coverage.push((pid.clone(), 0, 0, 0));
                            coverage.len() - 1
                        }
                    };
                    let entry = &mut coverage[idx];
                    entry.1 += 1;
                    if c.label_count > 0 {
                        entry.2 += 1;
                    }
                    entry.3 += u64::from(c.label_count);
                }
            }
        }

        self.learners_with_labels = learners_with_labels;
        self.average_labels_per_learner = if learner_turns > 0 {
            label_total as f64 / learner_turns as f64
        } else {
            0.0
        };

        let mut distribution: Vec<LabelCount> = counts
            .into_iter()
            .map(|(label, count)| LabelCount { label, count })
            .collect();
        distribution.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
        self.label_distribution = distribution;

        self.participant_coverage = coverage
            .into_iter()
            .map(|(participant_id, turns, labelled, total)| ParticipantCoverage {
                participant_id,
                learner_turns: turns,
                labelled_turns: labelled,
                average_labels: total as f64 / turns as f64,
            })
            .collect();
    }

    /// Emit the summary as structured log lines.
    pub fn log(&self) {
        tracing::info!(
            run_id = %self.run_id,
            mode = %self.mode,
            records = self.records,
            participants = self.participants_total,
            participants_paired = self.participants_paired,
            participants_skipped = self.participants_skipped,
            participants_malformed = self.participants_malformed,
            units = self.units_total,
            succeeded = self.units_succeeded,
            failed = self.units_failed,
            not_attempted = self.units_not_attempted,
            records_enriched = self.records_enriched,
            orphaned_keys = self.orphaned_keys,
            cancelled = self.cancelled,
            halted_empty = self.halted_empty,
            duration_ms = self.duration_ms,
            "Batch complete"
        );

        if self.mode == AnalysisMode::StudentPairs {
            tracing::info!(
                learners_with_labels = self.learners_with_labels,
                average_labels = format!("{:.1}", self.average_labels_per_learner),
                "Learner label coverage"
            );
            for c in &self.participant_coverage {
                tracing::info!(
                    participant = %c.participant_id,
                    labelled = c.labelled_turns,
                    learner_turns = c.learner_turns,
                    average_labels = format!("{:.1}", c.average_labels),
                    "Participant coverage"
                );
            }
        }

        for entry in self.label_distribution.iter().take(10) {
            tracing::info!(label = %entry.label, count = entry.count, "Label distribution");
        }
    }
}
