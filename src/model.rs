//! Core data model for the annotation pipeline.
//!
//! The serialized shapes here are load-bearing: `Annotation` is exactly the
//! per-file entry the report renderer reads back from the aggregate artifact.

use serde::{Deserialize, Serialize};

/// One unit of analysis, identified by a corpus-relative file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub filename: String,
    /// Short summary carried through from extraction, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_summary: Option<String>,
}

impl WorkItem {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            code_summary: None,
        }
    }
}

fn unknown() -> String {
    "Unknown".to_string()
}

/// One detected data-sink mention. Fields the model omits default to
/// "Unknown" rather than failing the whole item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRecord {
    #[serde(default = "unknown")]
    pub service: String,
    #[serde(default = "unknown")]
    pub evidence: String,
    #[serde(default = "unknown")]
    pub reasoning: String,
}

/// The structured-answer payload of a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationMessage {
    pub detected_data_sink_services: Vec<SinkRecord>,
}

/// Parsed model output for one file: the free-text reasoning trace plus the
/// decoded sink list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub filename: String,
    pub message: AnnotationMessage,
    pub reasoning: String,
}

/// Why a work item produced no annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The file could not be read from the corpus; no completion call is made.
    NotFound,
    /// The completion endpoint call failed or the unit crashed.
    CallFailed,
    /// The model response did not match the expected two-segment contract.
    ParseFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub identifier: String,
    pub cause: FailureCause,
}

impl FailureRecord {
    pub fn new(identifier: impl Into<String>, cause: FailureCause) -> Self {
        Self {
            identifier: identifier.into(),
            cause,
        }
    }
}

/// Everything the pipeline produced, finalized once after the last batch.
///
/// Every work item contributes exactly one entry across the two lists.
/// Successes keep batch dispatch order; failures keep discovery order.
#[derive(Debug, Default)]
pub struct AggregateResult {
    pub annotations: Vec<Annotation>,
    pub failures: Vec<FailureRecord>,
}

impl AggregateResult {
    pub fn failure_count(&self, cause: FailureCause) -> usize {
        self.failures.iter().filter(|f| f.cause == cause).count()
    }

    /// Identifiers of items whose file was missing from the corpus.
    pub fn missing_files(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter(|f| f.cause == FailureCause::NotFound)
            .map(|f| f.identifier.as_str())
            .collect()
    }
}
