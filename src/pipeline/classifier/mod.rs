//! ClassifierGateway — one classifier call per unit, never fails outward.
//!
//! ```text
//! PromptBuilder → ClassifierService (retry + sleeps) → parser (salvage) → ClassificationResult
//! ```
//! Every failure mode (transport, timeout, malformed text, missing fields,
//! cancellation) ends in an error-sentinel result for that unit.

pub mod client;
pub mod gateway;
pub mod parser;
pub mod retry;

pub use client::*;
pub use gateway::ClassifierGateway;
pub use parser::{parse_json_payload, parse_reply};
pub use retry::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("Classifier is not reachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Classifier returned error (status {status}): {body}")]
    Service { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Malformed classifier reply: {0}")]
    MalformedReply(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Reply is missing required field '{0}'")]
    MissingField(String),

    #[error("Classification cancelled")]
    Cancelled,

    #[error("No attempts were made (retry budget is zero)")]
    NoAttempts,
}
