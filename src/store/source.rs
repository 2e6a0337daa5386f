//! Tabular input sources. Rows are JSON objects keyed by column name.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use serde_json::{Map, Value};

use super::{LoadError, RowFormat};

/// Produces the raw rows of an interaction log, in source order.
pub trait RecordSource {
    fn read_rows(&self) -> Result<Vec<Map<String, Value>>, LoadError>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Reads a JSON array of row objects, or JSON Lines when the file extension
/// is `.jsonl` / `.ndjson`.
pub struct JsonRecordSource {
    path: PathBuf,
}

impl JsonRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_array(&self) -> Result<Vec<Map<String, Value>>, LoadError> {
        let file = std::fs::File::open(&self.path)?;
        let value: Value = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| LoadError::Json(e.to_string()))?;

        let items = match value {
            Value::Array(items) => items,
            _ => return Err(LoadError::Json("expected a top-level array of rows".into())),
        };

        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                _ => Err(LoadError::NotAnObject { line: i + 1 }),
            })
            .collect()
    }

    fn read_lines(&self) -> Result<Vec<Map<String, Value>>, LoadError> {
        let file = std::fs::File::open(&self.path)?;
        let mut rows = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(map)) => rows.push(map),
                Ok(_) => return Err(LoadError::NotAnObject { line: i + 1 }),
                Err(e) => return Err(LoadError::Json(format!("line {}: {e}", i + 1))),
            }
        }
        Ok(rows)
    }
}

impl RecordSource for JsonRecordSource {
    fn read_rows(&self) -> Result<Vec<Map<String, Value>>, LoadError> {
        if RowFormat::for_path(&self.path) == RowFormat::JsonLines {
            self.read_lines()
        } else {
            self.read_array()
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Reads a CSV file with a header row. Every cell is a string; empty cells
/// become null so optional columns read as absent.
pub struct CsvRecordSource {
    path: PathBuf,
}

impl CsvRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for CsvRecordSource {
    fn read_rows(&self) -> Result<Vec<Map<String, Value>>, LoadError> {
        let file = std::fs::File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::new(file));

        let headers = reader
            .headers()
            .map_err(|e| LoadError::Csv(e.to_string()))?
            .clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| LoadError::Csv(e.to_string()))?;
            let row = headers
                .iter()
                .zip(record.iter())
                .map(|(name, cell)| {
                    let value = if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::String(cell.to_string())
                    };
                    (name.to_string(), value)
                })
                .collect();
            rows.push(row);
        }
        Ok(rows)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory rows, for callers that already hold the table.
pub struct RowsSource {
    rows: Vec<Map<String, Value>>,
}

impl RowsSource {
    pub fn new(rows: Vec<Map<String, Value>>) -> Self {
        Self { rows }
    }
}

impl RecordSource for RowsSource {
    fn read_rows(&self) -> Result<Vec<Map<String, Value>>, LoadError> {
        Ok(self.rows.clone())
    }

    fn describe(&self) -> String {
        format!("<{} in-memory rows>", self.rows.len())
    }
}
