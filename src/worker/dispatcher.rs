//! Task dispatch: decode, analyze, persist, emit, settle
//!
//! Every decodable delivery produces exactly one outcome envelope per
//! attempt. Persistence and emission are independent side effects whose
//! failures are logged and counted but never change the disposition.

use super::emitter::ResultEmitter;
use super::redelivery::{RedeliveryDecision, RedeliveryPolicy};
use crate::analysis::{AnalysisOutput, Analyzer};
use crate::error::sanitize_error_message;
use crate::observability::metrics::metrics;
use crate::persistence::{AnalysisStore, AnalysisUpsert};
use crate::protocol::{OutcomeEnvelope, TaskMessage};
use crate::transport::{DeliveryHandler, Disposition, IncomingDelivery, OutboundMessage, Publisher};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Attribution stored on records for failed attempts
pub const FAILED_ATTRIBUTION: &str = "none";

/// How one analysis attempt ended
#[derive(Debug)]
enum Attempt {
    Succeeded(AnalysisOutput),
    /// Finished with an error; the task is done
    Failed(String),
    /// Worth another try on a later delivery
    Transient(String),
}

pub struct TaskDispatcher<P> {
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn AnalysisStore>,
    emitter: ResultEmitter<P>,
    republisher: P,
    policy: RedeliveryPolicy,
}

impl<P> TaskDispatcher<P>
where
    P: Publisher + Clone,
{
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        store: Arc<dyn AnalysisStore>,
        publisher: P,
        result_queue: impl Into<String>,
        policy: RedeliveryPolicy,
    ) -> Self {
        Self {
            analyzer,
            store,
            emitter: ResultEmitter::new(publisher.clone(), result_queue),
            republisher: publisher,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    #[instrument(
        name = "dispatch",
        skip_all,
        fields(
            task_id = %task.id,
            action = task.action().as_str(),
            queue = %delivery.queue,
            redelivery_count = delivery.redelivery_count,
        )
    )]
    async fn dispatch(
        &self,
        delivery: &IncomingDelivery,
        task: TaskMessage,
        received: Instant,
    ) -> Disposition {
        metrics().task_started();

        let attempt = match AssertUnwindSafe(self.analyzer.analyze(&task.body))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => Attempt::Succeeded(output),
            Ok(Err(e)) if e.is_transient() => Attempt::Transient(e.to_string()),
            Ok(Err(e)) => Attempt::Failed(e.to_string()),
            Err(panic) => Attempt::Transient(format!(
                "analysis panicked: {}",
                panic_message(panic.as_ref())
            )),
        };
        let elapsed = received.elapsed();

        let (envelope, write) = Self::outcome(&task, &attempt, elapsed);
        self.persist(&write).await;
        self.emit(&envelope).await;

        match attempt {
            Attempt::Succeeded(_) => {
                metrics().task_completed(elapsed);
                info!(
                    duration_ms = envelope.processing_time_ms,
                    attribution = %write.attribution,
                    "Task completed"
                );
                Disposition::Ack
            }
            Attempt::Failed(reason) => {
                metrics().task_failed(elapsed);
                warn!(error = %sanitize_error_message(&reason), "Task failed");
                Disposition::Ack
            }
            Attempt::Transient(reason) => {
                metrics().task_failed(elapsed);
                warn!(error = %sanitize_error_message(&reason), "Task failed transiently");
                self.redeliver(delivery, &task).await
            }
        }
    }

    /// Build the envelope and the record write for one attempt
    fn outcome(
        task: &TaskMessage,
        attempt: &Attempt,
        elapsed: Duration,
    ) -> (OutcomeEnvelope, AnalysisUpsert) {
        let (envelope, result, attribution, confidence) = match attempt {
            Attempt::Succeeded(output) => (
                OutcomeEnvelope::success(&task.id, task.action(), output.result.clone(), elapsed),
                output.result.clone(),
                output.attribution.clone(),
                output.confidence,
            ),
            Attempt::Failed(reason) | Attempt::Transient(reason) => {
                let message = sanitize_error_message(reason);
                (
                    OutcomeEnvelope::error(&task.id, task.action(), message.clone(), elapsed),
                    json!({ "status": "ERROR", "error": message }),
                    FAILED_ATTRIBUTION.to_string(),
                    None,
                )
            }
        };

        let write = AnalysisUpsert {
            id: task.id.clone(),
            subject_ref: task.body.subject_ref().to_string(),
            action: task.action(),
            result,
            attribution,
            confidence,
            duration_ms: Some(envelope.processing_time_ms),
        };
        (envelope, write)
    }

    async fn persist(&self, write: &AnalysisUpsert) {
        if let Err(e) = self.store.upsert(write).await {
            metrics().persistence_failed();
            error!(
                backend = self.store.backend(),
                error = %sanitize_error_message(&crate::error::error_chain(&e)),
                "Failed to persist analysis record"
            );
        }
    }

    async fn emit(&self, envelope: &OutcomeEnvelope) {
        if let Err(e) = self.emitter.emit(envelope).await {
            metrics().emit_failed();
            error!(
                result_queue = self.emitter.queue(),
                error = %sanitize_error_message(&e.to_string()),
                "Failed to emit outcome, reconcile manually"
            );
        }
    }

    async fn redeliver(&self, delivery: &IncomingDelivery, task: &TaskMessage) -> Disposition {
        match self.policy.decide(delivery.redelivery_count) {
            RedeliveryDecision::Retry { next_count } => {
                let priority = delivery
                    .priority
                    .unwrap_or_else(|| task.priority.amqp_priority());
                let copy = OutboundMessage::json(delivery.body.clone())
                    .with_priority(priority)
                    .with_redelivery_count(next_count);

                match self.republisher.publish(&delivery.queue, copy).await {
                    Ok(()) => {
                        metrics().task_redelivered();
                        info!(next_count, "Task republished for another attempt");
                        Disposition::Ack
                    }
                    Err(e) => {
                        metrics().task_requeued();
                        warn!(
                            error = %crate::error::error_chain(&e),
                            "Republish failed, requeueing through the broker"
                        );
                        Disposition::Requeue
                    }
                }
            }
            RedeliveryDecision::GiveUp { attempts } => {
                metrics().task_dead_lettered();
                error!(
                    attempts,
                    max_redeliveries = self.policy.max_redeliveries(),
                    "Redelivery budget exhausted, dead-lettering task"
                );
                Disposition::Reject
            }
        }
    }
}

#[async_trait]
impl<P> DeliveryHandler for TaskDispatcher<P>
where
    P: Publisher + Clone,
{
    async fn handle(&self, delivery: IncomingDelivery) -> Disposition {
        let received = Instant::now();
        metrics().task_received();

        match TaskMessage::decode(&delivery.body) {
            Ok(task) => self.dispatch(&delivery, task, received).await,
            Err(e) => {
                metrics().task_rejected();
                warn!(
                    task_id = e.task_id().unwrap_or("unknown"),
                    queue = %delivery.queue,
                    error = %sanitize_error_message(&e.to_string()),
                    "Rejecting undecodable task"
                );
                Disposition::Reject
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
