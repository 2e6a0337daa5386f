//! RecordStore — the typed, immutable interaction log.
//!
//! Loaded once from a [`RecordSource`]; enrichment never mutates it, it
//! produces borrowed [`crate::models::EnrichedRecord`]s instead, so the
//! original dataset stays available for diffing.

pub mod sink;
pub mod source;

pub use sink::{CsvRecordSink, JsonRecordSink, RecordSink, RowFormat};
pub use source::{CsvRecordSource, JsonRecordSource, RecordSource, RowsSource};

use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{CoreColumns, InteractionRecord, InteractionType};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Input is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Row {row}: missing value for required column '{column}'")]
    MissingValue { row: usize, column: String },

    #[error("Row {row}: column '{column}' has an unsupported value: {value}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Row {row}: unknown interaction type '{value}'")]
    UnknownTurnType { row: usize, value: String },

    #[error("Line {line}: row is not a JSON object")]
    NotAnObject { line: usize },

    #[error("JSON parsing error: {0}")]
    Json(String),

    #[error("CSV parsing error: {0}")]
    Csv(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV writing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source for `path`, chosen by extension: `.csv` is read as CSV, anything
/// else as JSON (array, or lines for `.jsonl` / `.ndjson`).
pub fn open_source(path: &Path) -> Box<dyn RecordSource> {
    match RowFormat::for_path(path) {
        RowFormat::Csv => Box::new(CsvRecordSource::new(path)),
        RowFormat::JsonArray | RowFormat::JsonLines => Box::new(JsonRecordSource::new(path)),
    }
}

/// Sink for `path`, chosen by extension the same way as [`open_source`].
pub fn open_sink(path: &Path, columns: CoreColumns) -> Box<dyn RecordSink> {
    match RowFormat::for_path(path) {
        RowFormat::Csv => Box::new(CsvRecordSink::new(path, columns)),
        RowFormat::JsonArray | RowFormat::JsonLines => Box::new(JsonRecordSink::new(path, columns)),
    }
}

// ═══════════════════════════════════════════
// Column resolution
// ═══════════════════════════════════════════

/// Accepted header names per core column; the first is the canonical name.
const PARTICIPANT_COLUMNS: &[&str] = &["participant_id", "Asurite", "participant", "user_id"];
const INTERACTION_ID_COLUMNS: &[&str] = &["interaction_id", "Interaction ID"];
const INTERACTION_TYPE_COLUMNS: &[&str] = &["interaction_type", "Interaction Type"];
const TEXT_COLUMNS: &[&str] = &["text", "Text"];
const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "Timestamp"];
const LEGACY_TEXT_COLUMNS: &[&str] = &["Bot Response", "bot_response", "text", "Text"];

/// Participant id assigned to every row of a legacy flat export.
pub const LEGACY_PARTICIPANT: &str = "legacy";

fn resolve<'c>(columns: &std::collections::HashSet<&str>, aliases: &[&'c str]) -> Option<&'c str> {
    aliases.iter().copied().find(|a| columns.contains(a))
}

fn cell_to_string(row: usize, column: &str, value: &Value) -> Result<Option<String>, LoadError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(LoadError::InvalidValue {
            row,
            column: column.to_string(),
            value: other.to_string(),
        }),
    }
}

fn required_cell(row_idx: usize, row: &Map<String, Value>, column: &str) -> Result<String, LoadError> {
    let value = row.get(column).unwrap_or(&Value::Null);
    match cell_to_string(row_idx, column, value)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(LoadError::MissingValue {
            row: row_idx,
            column: column.to_string(),
        }),
    }
}

fn optional_cell(row_idx: usize, row: &Map<String, Value>, column: Option<&str>) -> Result<Option<String>, LoadError> {
    match column.and_then(|c| row.get(c).map(|v| (c, v))) {
        Some((c, v)) => cell_to_string(row_idx, c, v),
        None => Ok(None),
    }
}

fn extra_columns(row: &Map<String, Value>, consumed: &[&str]) -> Map<String, Value> {
    row.iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// ═══════════════════════════════════════════
// RecordStore
// ═══════════════════════════════════════════

/// Ordered interaction log with participant grouping.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<InteractionRecord>,
    participants: Vec<String>,
    by_participant: HashMap<String, Vec<usize>>,
    columns: CoreColumns,
}

impl RecordStore {
    /// Build a store from already-typed records, preserving their order.
    pub fn from_records(records: Vec<InteractionRecord>) -> Self {
        let mut participants = Vec::new();
        let mut by_participant: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let slot = by_participant
                .entry(record.participant_id.clone())
                .or_insert_with(|| {
                    participants.push(record.participant_id.clone());
                    Vec::new()
                });
            slot.push(idx);
        }
        Self {
            records,
            participants,
            by_participant,
            columns: CoreColumns::default(),
        }
    }

    fn with_columns(mut self, columns: CoreColumns) -> Self {
        self.columns = columns;
        self
    }

    /// Load the interaction log. Fails fast if any required column is absent
    /// from the source schema (the union of all row keys).
    pub fn load(source: &dyn RecordSource) -> Result<Self, LoadError> {
        let rows = source.read_rows()?;
        if rows.is_empty() {
            tracing::warn!(source = %source.describe(), "Input source contains no rows");
            return Ok(Self::default());
        }

        let columns: std::collections::HashSet<&str> =
            rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();

        let participant_col = resolve(&columns, PARTICIPANT_COLUMNS);
        let id_col = resolve(&columns, INTERACTION_ID_COLUMNS);
        let type_col = resolve(&columns, INTERACTION_TYPE_COLUMNS);
        let text_col = resolve(&columns, TEXT_COLUMNS);
        let timestamp_col = resolve(&columns, TIMESTAMP_COLUMNS);

        let (participant_col, id_col, type_col, text_col) =
            match (participant_col, id_col, type_col, text_col) {
                (Some(p), Some(i), Some(t), Some(x)) => (p, i, t, x),
                (p, i, t, x) => {
                    let missing = [
                        (p, PARTICIPANT_COLUMNS[0]),
                        (i, INTERACTION_ID_COLUMNS[0]),
                        (t, INTERACTION_TYPE_COLUMNS[0]),
                        (x, TEXT_COLUMNS[0]),
                    ]
                    .into_iter()
                    .filter(|(found, _)| found.is_none())
                    .map(|(_, name)| name.to_string())
                    .collect();
                    return Err(LoadError::MissingColumns(missing));
                }
            };

        let mut consumed = vec![participant_col, id_col, type_col, text_col];
        consumed.extend(timestamp_col);

        let mut core = CoreColumns {
            participant_id: participant_col.to_string(),
            interaction_id: id_col.to_string(),
            interaction_type: type_col.to_string(),
            text: text_col.to_string(),
            timestamp: timestamp_col.map(str::to_string),
            ..CoreColumns::default()
        };
        let (mut agent_value, mut learner_value) = (None, None);

        let mut records = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let raw_type = required_cell(idx, row, type_col)?;
            let interaction_type = InteractionType::from_str(&raw_type).ok_or_else(|| {
                LoadError::UnknownTurnType {
                    row: idx,
                    value: raw_type.clone(),
                }
            })?;
            let seen = match interaction_type {
                InteractionType::AgentTurn => &mut agent_value,
                InteractionType::LearnerTurn => &mut learner_value,
            };
            if seen.is_none() {
                *seen = Some(raw_type);
            }

            records.push(InteractionRecord {
                participant_id: required_cell(idx, row, participant_col)?,
                // A blank id is not fatal here: pairing reports it as a
                // malformed id and skips only that participant.
                interaction_id: optional_cell(idx, row, Some(id_col))?
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_default(),
                interaction_type,
                text: optional_cell(idx, row, Some(text_col))?.unwrap_or_default(),
                timestamp: optional_cell(idx, row, timestamp_col)?.filter(|t| !t.is_empty()),
                extra: extra_columns(row, &consumed),
            });
        }

        if let Some(value) = agent_value {
            core.agent_turn_value = value;
        }
        if let Some(value) = learner_value {
            core.learner_turn_value = value;
        }

        let store = Self::from_records(records).with_columns(core);
        tracing::info!(
            source = %source.describe(),
            records = store.len(),
            participants = store.participants().len(),
            "Loaded interaction log"
        );
        Ok(store)
    }

    /// Load the old flat export where every row is a tutor turn with only a
    /// text column. Rows become agent turns of participant `legacy`, keyed
    /// `response_<n>` (1-based), so they flow through the keyed merge.
    pub fn load_legacy_agent_rows(source: &dyn RecordSource) -> Result<Self, LoadError> {
        let rows = source.read_rows()?;
        if rows.is_empty() {
            return Ok(Self::default());
        }

        let columns: std::collections::HashSet<&str> =
            rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
        let text_col = resolve(&columns, LEGACY_TEXT_COLUMNS)
            .ok_or_else(|| LoadError::MissingColumns(vec![LEGACY_TEXT_COLUMNS[0].to_string()]))?;

        let mut records = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            records.push(InteractionRecord {
                participant_id: LEGACY_PARTICIPANT.to_string(),
                interaction_id: format!("response_{}", idx + 1),
                interaction_type: InteractionType::AgentTurn,
                text: optional_cell(idx, row, Some(text_col))?.unwrap_or_default(),
                timestamp: None,
                extra: extra_columns(row, &[text_col]),
            });
        }

        tracing::info!(
            source = %source.describe(),
            records = records.len(),
            "Loaded legacy flat export as agent turns"
        );
        let columns = CoreColumns {
            text: text_col.to_string(),
            timestamp: None,
            ..CoreColumns::default()
        };
        Ok(Self::from_records(records).with_columns(columns))
    }

    pub fn records(&self) -> &[InteractionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Core column headers as resolved at load time.
    pub fn columns(&self) -> &CoreColumns {
        &self.columns
    }

    /// Participant ids in first-seen order.
    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    /// A participant's records in their relative source order.
    pub fn records_by_participant(&self, participant_id: &str) -> Vec<&InteractionRecord> {
        self.by_participant
            .get(participant_id)
            .map(|idxs| idxs.iter().map(|&i| &self.records[i]).collect())
            .unwrap_or_default()
    }
}
