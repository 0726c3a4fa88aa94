//! Idempotent storage of analysis results, one record per task id
//!
//! The [`AnalysisStore`] trait is the seam between the dispatcher and the
//! backing store. [`postgres::PostgresStore`] is the production backend;
//! [`memory::MemoryStore`] serves runs with the database disabled and tests.

use crate::protocol::TaskAction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Storage vocabulary for analysis kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisKind {
    PloAlignment,
    VersionDiff,
    Summary,
}

impl AnalysisKind {
    /// Fixed renaming from wire action to stored kind
    pub fn from_action(action: TaskAction) -> Self {
        match action {
            TaskAction::MapCloPlo => AnalysisKind::PloAlignment,
            TaskAction::CompareVersions => AnalysisKind::VersionDiff,
            TaskAction::SummarizeSyllabus => AnalysisKind::Summary,
        }
    }

    pub fn storage_name(&self) -> &'static str {
        match self {
            AnalysisKind::PloAlignment => "PLO_ALIGNMENT",
            AnalysisKind::VersionDiff => "VERSION_DIFF",
            AnalysisKind::Summary => "SUMMARY",
        }
    }

    pub fn from_storage_name(name: &str) -> Option<Self> {
        match name {
            "PLO_ALIGNMENT" => Some(AnalysisKind::PloAlignment),
            "VERSION_DIFF" => Some(AnalysisKind::VersionDiff),
            "SUMMARY" => Some(AnalysisKind::Summary),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_name())
    }
}

/// `status` value marking a result document written for a failed attempt
pub const ERROR_STATUS: &str = "ERROR";

/// Whether a result document records a failed attempt
pub fn is_error_result(result: &Value) -> bool {
    result.get("status").and_then(Value::as_str) == Some(ERROR_STATUS)
}

/// One write to the store
///
/// On conflict only `result`, `confidence`, and `duration_ms` replace the
/// stored values; the id, subject reference, kind and creation time stay.
/// The attribution is kept too, unless the stored row records a failed
/// attempt, in which case the new write's attribution replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisUpsert {
    pub id: String,
    pub subject_ref: String,
    pub action: TaskAction,
    pub result: Value,
    /// Strategy or engine that produced the result
    pub attribution: String,
    /// 0.0 to 1.0
    pub confidence: Option<f64>,
    pub duration_ms: Option<u64>,
}

impl AnalysisUpsert {
    pub fn kind(&self) -> AnalysisKind {
        AnalysisKind::from_action(self.action)
    }

    /// Reject writes the table would refuse or silently mangle
    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.id.trim().is_empty() {
            return Err(PersistenceError::InvalidRecord(
                "analysis id must not be empty".to_string(),
            ));
        }
        if self.subject_ref.trim().is_empty() {
            return Err(PersistenceError::InvalidRecord(format!(
                "subject reference missing for analysis {}",
                self.id
            )));
        }
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(PersistenceError::InvalidRecord(format!(
                    "confidence {confidence} outside 0.0..=1.0"
                )));
            }
        }
        Ok(())
    }
}

/// A stored analysis record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub subject_ref: String,
    pub kind: AnalysisKind,
    pub result: Value,
    pub model_used: String,
    pub confidence_score: Option<f64>,
    pub processing_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database connection failed")]
    Connect(#[source] sqlx::Error),
    #[error("Migration failed")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("Query '{operation}' failed")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Analysis result store
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &str;

    /// Insert, or update the mutable fields when the id exists
    async fn upsert(&self, write: &AnalysisUpsert) -> Result<(), PersistenceError>;

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>, PersistenceError>;

    /// All records for one subject, newest first
    async fn list_for_subject(
        &self,
        subject_ref: &str,
    ) -> Result<Vec<AnalysisRecord>, PersistenceError>;
}
