//! Output sinks for enriched records.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::models::{CoreColumns, EnrichedRecord};

use super::WriteError;

/// Persists an enriched dataset.
pub trait RecordSink {
    fn write(&self, records: &[EnrichedRecord<'_>]) -> Result<(), WriteError>;

    /// Human-readable destination, for logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// Pretty-printed JSON array.
    JsonArray,
    /// One compact JSON object per line.
    JsonLines,
    /// Comma-separated values with a header row.
    Csv,
}

impl RowFormat {
    /// Pick the format from a file extension (`.jsonl` / `.ndjson` → lines,
    /// `.csv` → CSV, anything else → array).
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") => Self::JsonLines,
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::JsonArray,
        }
    }
}

fn create_parent(path: &Path) -> Result<(), WriteError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Writes enriched rows as JSON, creating parent directories as needed.
pub struct JsonRecordSink {
    path: PathBuf,
    lines: bool,
    columns: CoreColumns,
}

impl JsonRecordSink {
    pub fn new(path: impl Into<PathBuf>, columns: CoreColumns) -> Self {
        let path = path.into();
        let lines = RowFormat::for_path(&path) == RowFormat::JsonLines;
        Self { path, lines, columns }
    }
}

impl RecordSink for JsonRecordSink {
    fn write(&self, records: &[EnrichedRecord<'_>]) -> Result<(), WriteError> {
        create_parent(&self.path)?;

        let mut out = BufWriter::new(std::fs::File::create(&self.path)?);
        if self.lines {
            for record in records {
                serde_json::to_writer(&mut out, &record.to_row(&self.columns))?;
                out.write_all(b"\n")?;
            }
        } else {
            let rows: Vec<_> = records.iter().map(|r| r.to_row(&self.columns)).collect();
            serde_json::to_writer_pretty(&mut out, &rows)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;

        tracing::info!(path = %self.path.display(), rows = records.len(), "Enriched data saved");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Writes enriched rows as CSV. Header order is core columns, extra source
/// columns in first-seen order, then analysis columns.
pub struct CsvRecordSink {
    path: PathBuf,
    columns: CoreColumns,
}

impl CsvRecordSink {
    pub fn new(path: impl Into<PathBuf>, columns: CoreColumns) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }

    fn header(&self, records: &[EnrichedRecord<'_>]) -> Vec<String> {
        let analysis = records.first().map(|r| r.analysis.names()).unwrap_or(&[]);
        let mut header: Vec<String> = self.columns.names().into_iter().map(str::to_string).collect();

        for record in records {
            for name in record.record.extra.keys() {
                if !header.contains(name) && !analysis.contains(&name.as_str()) {
                    header.push(name.clone());
                }
            }
        }
        header.extend(analysis.iter().map(|s| s.to_string()));
        header
    }
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl RecordSink for CsvRecordSink {
    fn write(&self, records: &[EnrichedRecord<'_>]) -> Result<(), WriteError> {
        create_parent(&self.path)?;

        let header = self.header(records);
        let mut out = csv::Writer::from_writer(BufWriter::new(std::fs::File::create(&self.path)?));
        out.write_record(&header)?;
        for record in records {
            let row = record.to_row(&self.columns);
            out.write_record(header.iter().map(|name| csv_cell(row.get(name))))?;
        }
        out.flush()?;

        tracing::info!(path = %self.path.display(), rows = records.len(), "Enriched data saved");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
