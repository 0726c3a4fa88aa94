//! Postgres analysis store
//!
//! Writes go through a single `INSERT ... ON CONFLICT (id) DO UPDATE` so a
//! redelivered task replaces its own row instead of adding one.

use super::{
    AnalysisKind, AnalysisRecord, AnalysisStore, AnalysisUpsert, PersistenceError, ERROR_STATUS,
};
use crate::config::DatabaseSection;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

const TABLE: &str = "syllabus_ai_analysis";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    table: String,
}

impl PostgresStore {
    /// Open a pool with the configured size and statement timeout
    pub async fn connect(url: &str, section: &DatabaseSection) -> Result<Self, PersistenceError> {
        validate_identifier(&section.schema)?;

        let statement_timeout_ms = section.statement_timeout_secs.saturating_mul(1_000);
        let options = PgConnectOptions::from_str(url)
            .map_err(PersistenceError::Connect)?
            .options([("statement_timeout", statement_timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .min_connections(section.min_connections)
            .max_connections(section.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(PersistenceError::Connect)?;

        info!(
            schema = %section.schema,
            min_connections = section.min_connections,
            max_connections = section.max_connections,
            "Connected to analysis database"
        );
        Self::from_pool(pool, &section.schema)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, schema: &str) -> Result<Self, PersistenceError> {
        validate_identifier(schema)?;
        Ok(Self {
            pool,
            table: format!("{schema}.{TABLE}"),
        })
    }

    /// Apply the bundled migrations
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PersistenceError::Migration)?;
        info!("Analysis database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} AS existing (id, syllabus_version_id, analysis_type, result, \
             model_used, confidence_score, processing_time_ms, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) \
             ON CONFLICT (id) DO UPDATE SET \
             model_used = CASE WHEN existing.result->>'status' = '{ERROR_STATUS}' \
             THEN EXCLUDED.model_used ELSE existing.model_used END, \
             result = EXCLUDED.result, \
             confidence_score = EXCLUDED.confidence_score, \
             processing_time_ms = EXCLUDED.processing_time_ms, \
             updated_at = NOW()",
            self.table
        )
    }

    fn select_sql(&self, filter: &str) -> String {
        format!(
            "SELECT id, syllabus_version_id, analysis_type, result, model_used, \
             confidence_score, processing_time_ms, created_at, updated_at \
             FROM {} WHERE {filter}",
            self.table
        )
    }

    fn record_from_row(row: &PgRow) -> Result<AnalysisRecord, PersistenceError> {
        let read = |source: sqlx::Error| PersistenceError::Query {
            operation: "decode_row",
            source,
        };

        let kind_name: String = row.try_get("analysis_type").map_err(read)?;
        let kind = AnalysisKind::from_storage_name(&kind_name).ok_or_else(|| {
            PersistenceError::InvalidRecord(format!("unknown analysis_type '{kind_name}'"))
        })?;

        Ok(AnalysisRecord {
            id: row.try_get("id").map_err(read)?,
            subject_ref: row.try_get("syllabus_version_id").map_err(read)?,
            kind,
            result: row.try_get("result").map_err(read)?,
            model_used: row.try_get("model_used").map_err(read)?,
            confidence_score: row.try_get("confidence_score").map_err(read)?,
            processing_time_ms: row.try_get("processing_time_ms").map_err(read)?,
            created_at: row.try_get("created_at").map_err(read)?,
            updated_at: row.try_get("updated_at").map_err(read)?,
        })
    }
}

#[async_trait]
impl AnalysisStore for PostgresStore {
    fn backend(&self) -> &str {
        "postgres"
    }

    #[instrument(skip(self, write), fields(task_id = %write.id, kind = %write.kind()))]
    async fn upsert(&self, write: &AnalysisUpsert) -> Result<(), PersistenceError> {
        write.validate()?;

        let duration_ms = write
            .duration_ms
            .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX));

        sqlx::query(&self.upsert_sql())
            .bind(&write.id)
            .bind(&write.subject_ref)
            .bind(write.kind().storage_name())
            .bind(&write.result)
            .bind(&write.attribution)
            .bind(write.confidence)
            .bind(duration_ms)
            .execute(&self.pool)
            .await
            .map_err(|source| PersistenceError::Query {
                operation: "upsert",
                source,
            })?;

        debug!("Analysis record upserted");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>, PersistenceError> {
        let row = sqlx::query(&self.select_sql("id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| PersistenceError::Query {
                operation: "get",
                source,
            })?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_for_subject(
        &self,
        subject_ref: &str,
    ) -> Result<Vec<AnalysisRecord>, PersistenceError> {
        let rows = sqlx::query(&self.select_sql(
            "syllabus_version_id = $1 ORDER BY created_at DESC",
        ))
        .bind(subject_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| PersistenceError::Query {
            operation: "list_for_subject",
            source,
        })?;

        rows.iter().map(Self::record_from_row).collect()
    }
}

/// Schema names are spliced into SQL text, so only plain identifiers pass
fn validate_identifier(name: &str) -> Result<(), PersistenceError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(PersistenceError::InvalidRecord(format!(
            "schema '{name}' is not a plain SQL identifier"
        )))
    }
}
