//! End-to-end dispatch pipeline tests
//!
//! Real analysis routines and the in-memory store behind the dispatcher,
//! with a recording publisher standing in for the broker.

use ai_analysis_worker::analysis::{AnalysisEngine, Analyzer};
use ai_analysis_worker::llm::providers::{GeminiConfig, GeminiProvider};
use ai_analysis_worker::llm::ProviderFallbackChain;
use ai_analysis_worker::persistence::{AnalysisKind, AnalysisStore, MemoryStore};
use ai_analysis_worker::testing::mocks::{FailingStore, MockAnalyzer, MockPublisher};
use ai_analysis_worker::transport::{DeliveryHandler, Disposition, IncomingDelivery};
use ai_analysis_worker::worker::{RedeliveryPolicy, TaskDispatcher};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod test_helpers;
use test_helpers::{
    clo_plo_payload, summarize_payload, task_bytes, version_diff_payload, LONG_DESCRIPTION,
};

const TASK_QUEUE: &str = "ai_processing_queue";
const RESULT_QUEUE: &str = "ai_result_queue";

fn rule_engine() -> Arc<dyn Analyzer> {
    Arc::new(AnalysisEngine::new(Arc::new(ProviderFallbackChain::new()), 150))
}

fn dispatcher(
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn AnalysisStore>,
    publisher: MockPublisher,
) -> TaskDispatcher<MockPublisher> {
    TaskDispatcher::new(
        analyzer,
        store,
        publisher,
        RESULT_QUEUE,
        RedeliveryPolicy::new(3),
    )
}

async fn outcomes(publisher: &MockPublisher) -> Vec<Value> {
    publisher
        .published_to(RESULT_QUEUE)
        .await
        .iter()
        .map(|message| serde_json::from_slice(&message.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_clo_plo_task_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(rule_engine(), store.clone(), publisher.clone());

    let disposition = d
        .handle(IncomingDelivery::new(
            TASK_QUEUE,
            task_bytes("task-clo-1", "MAP_CLO_PLO", clo_plo_payload()),
        ))
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let record = store.get("task-clo-1").await.unwrap().unwrap();
    assert_eq!(record.kind, AnalysisKind::PloAlignment);
    assert_eq!(record.subject_ref, "syllabus-it-001");
    assert_eq!(record.confidence_score, Some(0.5));
    assert_eq!(record.result["compliance_score"], 50.0);
    assert_eq!(record.result["overall_status"], "NEEDS_IMPROVEMENT");

    let outcomes = outcomes(&publisher).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["id"], "task-clo-1");
    assert_eq!(outcomes[0]["action"], "MAP_CLO_PLO");
    assert_eq!(outcomes[0]["status"], "SUCCESS");
    assert_eq!(outcomes[0]["result"], record.result);
}

#[tokio::test]
async fn test_version_diff_task_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(rule_engine(), store.clone(), publisher.clone());

    let disposition = d
        .handle(IncomingDelivery::new(
            TASK_QUEUE,
            task_bytes("task-diff-1", "COMPARE_VERSIONS", version_diff_payload()),
        ))
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let record = store.get("task-diff-1").await.unwrap().unwrap();
    assert_eq!(record.kind, AnalysisKind::VersionDiff);
    assert_eq!(record.subject_ref, "v2");
    assert_eq!(record.confidence_score, None);
    assert_eq!(record.result["changes_summary"]["total_changes"], 2);
    assert_eq!(record.result["changes_summary"]["major_changes"], 1);
}

#[tokio::test]
async fn test_summary_task_uses_remote_model_when_available() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "Thiết kế và tối ưu CSDL quan hệ."}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gemini = GeminiProvider::new(GeminiConfig {
        api_key: "test-api-key".to_string(),
        base_url: server.uri(),
        model: "gemini-1.5-flash".to_string(),
        timeout: Duration::from_secs(5),
        temperature: None,
    })
    .unwrap();
    let chain = ProviderFallbackChain::new().with_strategy(Arc::new(gemini), true);
    let engine: Arc<dyn Analyzer> = Arc::new(AnalysisEngine::new(Arc::new(chain), 80));

    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(engine, store.clone(), publisher.clone());

    let disposition = d
        .handle(IncomingDelivery::new(
            "ai_summarize_queue",
            task_bytes("task-sum-1", "SUMMARIZE_SYLLABUS", summarize_payload(LONG_DESCRIPTION)),
        ))
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let record = store.get("task-sum-1").await.unwrap().unwrap();
    assert_eq!(record.kind, AnalysisKind::Summary);
    assert_eq!(record.model_used, "gemini");
    assert_eq!(
        record.result["overview"]["description"],
        "Thiết kế và tối ưu CSDL quan hệ."
    );
    assert_eq!(record.result["highlights"]["duration"]["total_hours"], 45);
    assert_eq!(record.result["prerequisites"]["count"], 1);
}

#[tokio::test]
async fn test_summary_task_degrades_to_extractive_without_providers() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let engine: Arc<dyn Analyzer> =
        Arc::new(AnalysisEngine::new(Arc::new(ProviderFallbackChain::new()), 80));
    let d = dispatcher(engine, store.clone(), publisher.clone());

    d.handle(IncomingDelivery::new(
        "ai_summarize_queue",
        task_bytes("task-sum-2", "SUMMARIZE_SYLLABUS", summarize_payload(LONG_DESCRIPTION)),
    ))
    .await;

    let record = store.get("task-sum-2").await.unwrap().unwrap();
    assert_eq!(record.model_used, "extractive");
    let description = record.result["overview"]["description"].as_str().unwrap();
    assert!(!description.is_empty());
    assert!(description.chars().count() <= 80);
}

#[tokio::test]
async fn test_replayed_task_keeps_one_record() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(rule_engine(), store.clone(), publisher.clone());

    let body = task_bytes("task-replay", "MAP_CLO_PLO", clo_plo_payload());
    d.handle(IncomingDelivery::new(TASK_QUEUE, body.clone())).await;
    let first = store.get("task-replay").await.unwrap().unwrap();

    let mut redelivered = IncomingDelivery::new(TASK_QUEUE, body);
    redelivered.redelivered = true;
    d.handle(redelivered).await;
    let second = store.get("task-replay").await.unwrap().unwrap();

    assert_eq!(store.len().await, 1);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.result, first.result);
    // One envelope per attempt
    assert_eq!(outcomes(&publisher).await.len(), 2);
}

#[tokio::test]
async fn test_undecodable_tasks_are_rejected_without_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(rule_engine(), store.clone(), publisher.clone());

    let unknown_action = task_bytes("task-x", "TRANSLATE_SYLLABUS", json!({}));
    let missing_field = task_bytes("task-y", "MAP_CLO_PLO", json!({"syllabus_id": "s"}));
    let lowercase_action = task_bytes("task-z", "map_clo_plo", clo_plo_payload());

    for body in [unknown_action, missing_field, lowercase_action, b"{".to_vec()] {
        let disposition = d.handle(IncomingDelivery::new(TASK_QUEUE, body)).await;
        assert_eq!(disposition, Disposition::Reject);
    }

    assert!(store.is_empty().await);
    assert!(publisher.published().await.is_empty());
}

#[tokio::test]
async fn test_invalid_input_finishes_with_error_outcome() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(rule_engine(), store.clone(), publisher.clone());

    let same_version = json!({
        "old_version_id": "v3",
        "new_version_id": "v3"
    });
    let disposition = d
        .handle(IncomingDelivery::new(
            TASK_QUEUE,
            task_bytes("task-same", "COMPARE_VERSIONS", same_version),
        ))
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let outcomes = outcomes(&publisher).await;
    assert_eq!(outcomes[0]["status"], "ERROR");
    assert_eq!(outcomes[0]["progress"], 0);
    assert!(outcomes[0].get("result").is_none());

    let record = store.get("task-same").await.unwrap().unwrap();
    assert_eq!(record.result["status"], "ERROR");
    assert_eq!(record.model_used, "none");
}

#[tokio::test]
async fn test_persistence_failure_still_emits_and_acks() {
    let store = Arc::new(FailingStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(rule_engine(), store.clone(), publisher.clone());

    let disposition = d
        .handle(IncomingDelivery::new(
            TASK_QUEUE,
            task_bytes("task-nodb", "MAP_CLO_PLO", clo_plo_payload()),
        ))
        .await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(store.attempts(), 1);
    assert_eq!(outcomes(&publisher).await[0]["status"], "SUCCESS");
}

#[tokio::test]
async fn test_emit_failure_still_persists_and_acks() {
    let store = Arc::new(MemoryStore::new());
    let d = dispatcher(rule_engine(), store.clone(), MockPublisher::failing());

    let disposition = d
        .handle(IncomingDelivery::new(
            TASK_QUEUE,
            task_bytes("task-nobroker", "MAP_CLO_PLO", clo_plo_payload()),
        ))
        .await;

    assert_eq!(disposition, Disposition::Ack);
    assert!(store.get("task-nobroker").await.unwrap().is_some());
}

#[tokio::test]
async fn test_transient_failures_walk_the_redelivery_budget() {
    let publisher = MockPublisher::new();
    let d = dispatcher(
        Arc::new(MockAnalyzer::transient("upstream unavailable")),
        Arc::new(MemoryStore::new()),
        publisher.clone(),
    );
    let body = task_bytes("task-flaky", "MAP_CLO_PLO", clo_plo_payload());

    for count in 0..3 {
        let mut delivery = IncomingDelivery::new(TASK_QUEUE, body.clone());
        delivery.redelivery_count = count;
        assert_eq!(d.handle(delivery).await, Disposition::Ack);
    }
    let mut last = IncomingDelivery::new(TASK_QUEUE, body);
    last.redelivery_count = 3;
    assert_eq!(d.handle(last).await, Disposition::Reject);

    let copies = publisher.published_to(TASK_QUEUE).await;
    let counts: Vec<_> = copies.iter().map(|m| m.redelivery_count).collect();
    assert_eq!(counts, vec![Some(1), Some(2), Some(3)]);
    assert!(copies.iter().all(|m| m.priority == Some(3)));
    assert_eq!(outcomes(&publisher).await.len(), 4);
}

#[tokio::test]
async fn test_success_after_transient_failure_takes_over_the_record() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let body = task_bytes("task-retry-1", "MAP_CLO_PLO", clo_plo_payload());

    let flaky = dispatcher(
        Arc::new(MockAnalyzer::transient("upstream unavailable")),
        store.clone(),
        publisher.clone(),
    );
    assert_eq!(
        flaky.handle(IncomingDelivery::new(TASK_QUEUE, body.clone())).await,
        Disposition::Ack
    );
    let failed = store.get("task-retry-1").await.unwrap().unwrap();
    assert_eq!(failed.model_used, "none");
    assert_eq!(failed.result["status"], "ERROR");

    let healthy = dispatcher(rule_engine(), store.clone(), publisher.clone());
    let mut retry = IncomingDelivery::new(TASK_QUEUE, body);
    retry.redelivery_count = 1;
    assert_eq!(healthy.handle(retry).await, Disposition::Ack);

    let record = store.get("task-retry-1").await.unwrap().unwrap();
    assert_eq!(record.model_used, "rule-engine");
    assert_eq!(record.result["overall_status"], "NEEDS_IMPROVEMENT");
    assert!(record.result.get("status").is_none());
    assert_eq!(record.confidence_score, Some(0.5));
    assert_eq!(record.created_at, failed.created_at);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_summary_task_in_producer_shape_is_processed() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(rule_engine(), store.clone(), publisher.clone());

    let payload = json!({
        "syllabus_id": "syllabus-prod-1",
        "language": "vi",
        "include_prerequisites": true,
        "syllabus_data": {
            "course_name": "Cơ sở dữ liệu",
            "course_code": "CS301",
            "theory_hours": 30,
            "practice_hours": 15,
            "learning_outcomes": [
                {"code": "CLO1", "description": "Thiết kế ERD", "bloom_level": "CREATE", "weight": 50}
            ],
            "assessment_scheme": [
                {"method": "Giữa kỳ", "weight": 40},
                {"method": "Cuối kỳ", "weight": 60}
            ],
            "description": null,
            "prerequisites": null,
            "weekly_content": null
        }
    });

    let disposition = d
        .handle(IncomingDelivery::new(
            "ai_summarize_queue",
            task_bytes("task-prod-sum", "SUMMARIZE_SYLLABUS", payload),
        ))
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let record = store.get("task-prod-sum").await.unwrap().unwrap();
    assert_eq!(record.kind, AnalysisKind::Summary);
    let assessment = &record.result["highlights"]["assessment"];
    assert_eq!(assessment["breakdown"][0]["type"], "Giữa kỳ");
    assert_eq!(assessment["total_weight"], 100.0);
    assert_eq!(record.result["prerequisites"]["count"], 0);
    assert_eq!(outcomes(&publisher).await[0]["status"], "SUCCESS");
}

#[tokio::test]
async fn test_version_diff_over_producer_snapshots() {
    let store = Arc::new(MemoryStore::new());
    let publisher = MockPublisher::new();
    let d = dispatcher(rule_engine(), store.clone(), publisher.clone());

    let payload = json!({
        "old_version_id": "ver-1",
        "new_version_id": "ver-2",
        "subject_id": "subj-1",
        "comparison_depth": "DETAILED",
        "old_version": {
            "version_no": 1,
            "description": "Bản cũ",
            "content": {"prerequisites": "OOP"},
            "updated_at": "2025-01-01T00:00:00Z"
        },
        "new_version": {
            "version_no": 2,
            "description": "Bản mới",
            "content": {"prerequisites": "OOP, CTDL"},
            "updated_at": "2025-02-01T00:00:00Z"
        }
    });

    d.handle(IncomingDelivery::new(
        TASK_QUEUE,
        task_bytes("task-prod-diff", "COMPARE_VERSIONS", payload),
    ))
    .await;

    let record = store.get("task-prod-diff").await.unwrap().unwrap();
    assert_eq!(record.subject_ref, "ver-2");
    let summary = &record.result["changes_summary"];
    assert_eq!(summary["total_changes"], 2);
    assert_eq!(summary["major_changes"], 1);
    assert_eq!(summary["sections_affected"], json!(["description", "prerequisites"]));
}
