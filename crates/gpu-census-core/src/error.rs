//! Error taxonomy for a census run.
//!
//! Per-university problems ([`RecordError`]) are isolated: they drop one
//! university from the run and are reported in the audit. Reference table
//! problems ([`ReferenceError`]) are fatal to the whole run.

use chrono::NaiveDateTime;
use thiserror::Error;

/// A problem with one university's input document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("malformed input for {university}: {reason}")]
    MalformedInput { university: String, reason: String },

    #[error("ambiguous duplicate for {university}: {count} documents retrieved at {retrieved_at}")]
    AmbiguousDuplicate {
        university: String,
        count: usize,
        retrieved_at: NaiveDateTime,
    },
}

impl RecordError {
    pub fn malformed(university: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordError::MalformedInput {
            university: university.into(),
            reason: reason.into(),
        }
    }

    /// The university (id or document name) the error belongs to
    pub fn university(&self) -> &str {
        match self {
            RecordError::MalformedInput { university, .. } => university,
            RecordError::AmbiguousDuplicate { university, .. } => university,
        }
    }
}

/// A structurally invalid reference table.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("price table is empty")]
    EmptyPriceTable,

    #[error("price table has no price for reference model {0}")]
    MissingReferencePrice(String),

    #[error("invalid price for {model}: {price}")]
    InvalidPrice { model: String, price: f64 },

    #[error("roster is empty")]
    EmptyRoster,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
