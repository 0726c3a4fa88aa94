//! Mock implementations for testing
//!
//! Provides mock Publisher, CondenseProvider, Analyzer, AnalysisStore and
//! DeliveryHandler implementations so the pipeline can be exercised without
//! a broker, a database, or a model endpoint.

use crate::analysis::{AnalysisError, AnalysisOutput, Analyzer, RULE_ENGINE};
use crate::llm::provider::{CondenseProvider, ProviderError};
use crate::persistence::{
    AnalysisRecord, AnalysisStore, AnalysisUpsert, PersistenceError,
};
use crate::protocol::TaskBody;
use crate::transport::{DeliveryHandler, Disposition, IncomingDelivery, OutboundMessage, Publisher};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub type PublishedMessage = (String, OutboundMessage);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("mock publish failure")]
pub struct MockPublishError;

/// Records every publish; optionally fails them all
#[derive(Debug, Clone, Default)]
pub struct MockPublisher {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    should_fail: bool,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Messages published to one queue, in order
    pub async fn published_to(&self, queue: &str) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub async fn clear(&self) {
        self.published.lock().await.clear();
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    type Error = MockPublishError;

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(MockPublishError);
        }
        self.published
            .lock()
            .await
            .push((queue.to_string(), message));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.should_fail
    }
}

#[derive(Debug, Clone)]
enum ProviderBehavior {
    Succeed(String),
    Fail(ProviderError),
    Unhealthy,
}

/// Mock condensation strategy
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    behavior: ProviderBehavior,
    calls: AtomicUsize,
}

impl MockProvider {
    fn with_behavior(name: &str, behavior: ProviderBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns `output`, whatever the budget
    pub fn succeeding(name: &str, output: &str) -> Self {
        Self::with_behavior(name, ProviderBehavior::Succeed(output.to_string()))
    }

    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self::with_behavior(name, ProviderBehavior::Fail(error))
    }

    /// Fails its health probe
    pub fn unhealthy(name: &str) -> Self {
        Self::with_behavior(name, ProviderBehavior::Unhealthy)
    }

    /// Number of `condense` calls
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CondenseProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn condense(&self, _text: &str, _max_chars: usize) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ProviderBehavior::Succeed(output) => Ok(output.clone()),
            ProviderBehavior::Fail(error) => Err(error.clone()),
            ProviderBehavior::Unhealthy => {
                Err(ProviderError::NetworkError("mock endpoint down".to_string()))
            }
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        match self.behavior {
            ProviderBehavior::Unhealthy => {
                Err(ProviderError::NetworkError("mock endpoint down".to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
enum AnalyzerBehavior {
    Return(AnalysisOutput),
    Fail(String),
    Transient(String),
    Panic,
}

/// Mock analysis routine set
#[derive(Debug)]
pub struct MockAnalyzer {
    behavior: AnalyzerBehavior,
    calls: AtomicUsize,
}

impl MockAnalyzer {
    fn with_behavior(behavior: AnalyzerBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(output: AnalysisOutput) -> Self {
        Self::with_behavior(AnalyzerBehavior::Return(output))
    }

    /// Returns a small rule-engine result
    pub fn ok() -> Self {
        Self::returning(AnalysisOutput {
            result: json!({"mock": true}),
            attribution: RULE_ENGINE.to_string(),
            confidence: Some(0.5),
        })
    }

    pub fn failing(reason: &str) -> Self {
        Self::with_behavior(AnalyzerBehavior::Fail(reason.to_string()))
    }

    pub fn transient(reason: &str) -> Self {
        Self::with_behavior(AnalyzerBehavior::Transient(reason.to_string()))
    }

    pub fn panicking() -> Self {
        Self::with_behavior(AnalyzerBehavior::Panic)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, _body: &TaskBody) -> Result<AnalysisOutput, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            AnalyzerBehavior::Return(output) => Ok(output.clone()),
            AnalyzerBehavior::Fail(reason) => Err(AnalysisError::InvalidInput(reason.clone())),
            AnalyzerBehavior::Transient(reason) => Err(AnalysisError::Transient(reason.clone())),
            AnalyzerBehavior::Panic => panic!("mock analyzer panic"),
        }
    }
}

/// Store whose every operation fails
#[derive(Debug, Default)]
pub struct FailingStore {
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisStore for FailingStore {
    fn backend(&self) -> &str {
        "failing"
    }

    async fn upsert(&self, _write: &AnalysisUpsert) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::Unavailable("mock store offline".to_string()))
    }

    async fn get(&self, _id: &str) -> Result<Option<AnalysisRecord>, PersistenceError> {
        Err(PersistenceError::Unavailable("mock store offline".to_string()))
    }

    async fn list_for_subject(
        &self,
        _subject_ref: &str,
    ) -> Result<Vec<AnalysisRecord>, PersistenceError> {
        Err(PersistenceError::Unavailable("mock store offline".to_string()))
    }
}

/// Delivery handler that records what it saw and answers with a fixed disposition
#[derive(Debug)]
pub struct RecordingHandler {
    disposition: Disposition,
    seen: Arc<Mutex<Vec<IncomingDelivery>>>,
}

impl RecordingHandler {
    pub fn new(disposition: Disposition) -> Self {
        Self {
            disposition,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn acking() -> Self {
        Self::new(Disposition::Ack)
    }

    pub async fn deliveries(&self) -> Vec<IncomingDelivery> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl DeliveryHandler for RecordingHandler {
    async fn handle(&self, delivery: IncomingDelivery) -> Disposition {
        self.seen.lock().await.push(delivery);
        self.disposition
    }
}
