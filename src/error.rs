//! Pipeline error taxonomy.
//!
//! Every failure that crosses a stage boundary is an [`AgentError`] carrying a
//! machine-stable [`ErrorCode`], a severity, and a recoverability flag. The
//! same struct serializes into plan, progress, and manifest files so external
//! observers see exactly what the pipeline saw.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-stable error codes. The serialized form is the SCREAMING_SNAKE
/// string and must never change once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DocPlanNotFound,
    DocPlanInvalid,
    DocPlanStale,
    DocDbConnectionLost,
    DocWorkUnitFailed,
    DocTableExtractionFailed,
    DocColumnExtractionFailed,
    DocSamplingTimeout,
    DocSamplingFailed,
    DocLlmTimeout,
    DocLlmFailed,
    DocLlmParseFailed,
    DocTemplateNotFound,
    DocFileWriteFailed,
    DocManifestWriteFailed,
    IdxManifestNotFound,
    IdxManifestInvalid,
    IdxFileFailed,
    IdxEmbeddingFailed,
    IdxFatalError,
}

impl ErrorCode {
    /// The stable wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DocPlanNotFound => "DOC_PLAN_NOT_FOUND",
            ErrorCode::DocPlanInvalid => "DOC_PLAN_INVALID",
            ErrorCode::DocPlanStale => "DOC_PLAN_STALE",
            ErrorCode::DocDbConnectionLost => "DOC_DB_CONNECTION_LOST",
            ErrorCode::DocWorkUnitFailed => "DOC_WORK_UNIT_FAILED",
            ErrorCode::DocTableExtractionFailed => "DOC_TABLE_EXTRACTION_FAILED",
            ErrorCode::DocColumnExtractionFailed => "DOC_COLUMN_EXTRACTION_FAILED",
            ErrorCode::DocSamplingTimeout => "DOC_SAMPLING_TIMEOUT",
            ErrorCode::DocSamplingFailed => "DOC_SAMPLING_FAILED",
            ErrorCode::DocLlmTimeout => "DOC_LLM_TIMEOUT",
            ErrorCode::DocLlmFailed => "DOC_LLM_FAILED",
            ErrorCode::DocLlmParseFailed => "DOC_LLM_PARSE_FAILED",
            ErrorCode::DocTemplateNotFound => "DOC_TEMPLATE_NOT_FOUND",
            ErrorCode::DocFileWriteFailed => "DOC_FILE_WRITE_FAILED",
            ErrorCode::DocManifestWriteFailed => "DOC_MANIFEST_WRITE_FAILED",
            ErrorCode::IdxManifestNotFound => "IDX_MANIFEST_NOT_FOUND",
            ErrorCode::IdxManifestInvalid => "IDX_MANIFEST_INVALID",
            ErrorCode::IdxFileFailed => "IDX_FILE_FAILED",
            ErrorCode::IdxEmbeddingFailed => "IDX_EMBEDDING_FAILED",
            ErrorCode::IdxFatalError => "IDX_FATAL_ERROR",
        }
    }

    /// Default severity for the code. Individual errors may override.
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCode::DocPlanStale
            | ErrorCode::DocSamplingTimeout
            | ErrorCode::DocSamplingFailed
            | ErrorCode::DocLlmTimeout => Severity::Warning,
            ErrorCode::DocPlanNotFound
            | ErrorCode::DocPlanInvalid
            | ErrorCode::DocManifestWriteFailed
            | ErrorCode::IdxManifestNotFound
            | ErrorCode::IdxManifestInvalid
            | ErrorCode::IdxFatalError => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Default recoverability for the code.
    pub fn default_recoverable(&self) -> bool {
        !matches!(self.default_severity(), Severity::Fatal)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

/// A classified pipeline error. Clone-able and serde-able so it can be both
/// propagated as a Rust error and recorded in progress/plan files.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct AgentError {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl AgentError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: code.default_severity(),
            recoverable: code.default_recoverable(),
            timestamp: Utc::now(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
