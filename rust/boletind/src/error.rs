use serde::Serialize;
use thiserror::Error;

use crate::model::{CohortYear, GradeField};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures that abort a report.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The data provider could not supply `what`.
    #[error("failed to load {what}: {source}")]
    DataProvider {
        what: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{0}")]
    BadParams(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl EngineError {
    pub fn provider(what: &'static str, source: impl Into<BoxError>) -> Self {
        EngineError::DataProvider {
            what,
            source: source.into(),
        }
    }

    /// Stable code used in IPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::DataProvider { .. } => "data_provider_failed",
            EngineError::BadParams(_) => "bad_params",
            EngineError::NotFound { .. } => "not_found",
        }
    }
}

/// Non-fatal findings collected while building a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Diagnostic {
    /// A label matched none of the cohort's ordering entries.
    #[serde(rename_all = "camelCase")]
    ResolutionFailure { label: String, cohort_year: CohortYear },
    #[serde(rename_all = "camelCase")]
    MissingCohortOrder { cohort_year: CohortYear },
    /// A grade slot held text that is not a number.
    #[serde(rename_all = "camelCase")]
    InconsistentGradeInput {
        subject_id: String,
        field: GradeField,
        value: String,
    },
    /// A grade row points at a subject the curriculum does not have.
    #[serde(rename_all = "camelCase")]
    OrphanGrade { subject_id: String },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::ResolutionFailure { label, cohort_year } => {
                tracing::warn!(%label, cohort_year, "subject label matched no ordering entry");
            }
            Diagnostic::MissingCohortOrder { cohort_year } => {
                tracing::info!(cohort_year, "no ordering table for cohort year; sorting alphabetically");
            }
            Diagnostic::InconsistentGradeInput {
                subject_id,
                field,
                value,
            } => {
                tracing::warn!(%subject_id, field = field.as_str(), %value, "non-numeric grade ignored");
            }
            Diagnostic::OrphanGrade { subject_id } => {
                tracing::warn!(%subject_id, "grade row references an unknown subject");
            }
        }
        self.0.push(diagnostic);
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
