//! In-process analysis store
//!
//! Same conflict rules as the Postgres backend. Used when
//! `database.enabled = false` and throughout the tests.

use super::{is_error_result, AnalysisRecord, AnalysisStore, AnalysisUpsert, PersistenceError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, AnalysisRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, write: &AnalysisUpsert) -> Result<(), PersistenceError> {
        write.validate()?;

        let now = Utc::now();
        let duration_ms = write
            .duration_ms
            .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX));

        let mut records = self.records.write().await;
        records
            .entry(write.id.clone())
            .and_modify(|existing| {
                if is_error_result(&existing.result) {
                    existing.model_used = write.attribution.clone();
                }
                existing.result = write.result.clone();
                existing.confidence_score = write.confidence;
                existing.processing_time_ms = duration_ms;
                existing.updated_at = now;
            })
            .or_insert_with(|| AnalysisRecord {
                id: write.id.clone(),
                subject_ref: write.subject_ref.clone(),
                kind: write.kind(),
                result: write.result.clone(),
                model_used: write.attribution.clone(),
                confidence_score: write.confidence,
                processing_time_ms: duration_ms,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisRecord>, PersistenceError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list_for_subject(
        &self,
        subject_ref: &str,
    ) -> Result<Vec<AnalysisRecord>, PersistenceError> {
        let mut matching: Vec<AnalysisRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.subject_ref == subject_ref)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::AnalysisKind;
    use crate::protocol::TaskAction;
    use serde_json::json;

    fn write(id: &str, subject: &str, result: serde_json::Value) -> AnalysisUpsert {
        AnalysisUpsert {
            id: id.to_string(),
            subject_ref: subject.to_string(),
            action: TaskAction::MapCloPlo,
            result,
            attribution: "rule-engine".to_string(),
            confidence: Some(0.5),
            duration_ms: Some(7),
        }
    }

    #[tokio::test]
    async fn test_replay_overwrites_mutable_fields_only() {
        let store = MemoryStore::new();
        store
            .upsert(&write("t-1", "syl-1", json!({"v": 1})))
            .await
            .unwrap();
        let first = store.get("t-1").await.unwrap().unwrap();

        let mut replay = write("t-1", "syl-other", json!({"v": 2}));
        replay.confidence = Some(0.9);
        replay.attribution = "someone-else".to_string();
        store.upsert(&replay).await.unwrap();

        let second = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(second.result, json!({"v": 2}));
        assert_eq!(second.confidence_score, Some(0.9));
        assert_eq!(second.subject_ref, "syl-1");
        assert_eq!(second.model_used, "rule-engine");
        assert_eq!(second.kind, AnalysisKind::PloAlignment);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn test_success_after_error_row_takes_over_attribution() {
        let store = MemoryStore::new();
        let mut failed = write("t-1", "syl-1", json!({"status": "ERROR", "error": "boom"}));
        failed.attribution = "none".to_string();
        failed.confidence = None;
        store.upsert(&failed).await.unwrap();

        store
            .upsert(&write("t-1", "syl-1", json!({"overall_status": "COMPLIANT"})))
            .await
            .unwrap();

        let record = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.model_used, "rule-engine");
        assert_eq!(record.result["overall_status"], "COMPLIANT");

        // A success row keeps its attribution against a later failure
        store.upsert(&failed).await.unwrap();
        let record = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.model_used, "rule-engine");
        assert_eq!(record.result["status"], "ERROR");
    }

    #[tokio::test]
    async fn test_list_for_subject_filters() {
        let store = MemoryStore::new();
        store.upsert(&write("a", "syl-1", json!({}))).await.unwrap();
        store.upsert(&write("b", "syl-2", json!({}))).await.unwrap();
        store.upsert(&write("c", "syl-1", json!({}))).await.unwrap();

        let records = store.list_for_subject("syl-1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.subject_ref == "syl-1"));
        assert!(records[0].created_at >= records[1].created_at);
    }

    #[tokio::test]
    async fn test_invalid_write_is_rejected() {
        let store = MemoryStore::new();
        let mut bad = write("t-1", "syl-1", json!({}));
        bad.confidence = Some(2.0);
        assert!(store.upsert(&bad).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
