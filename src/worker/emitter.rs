//! Outcome envelope publishing

use crate::protocol::OutcomeEnvelope;
use crate::transport::{OutboundMessage, Publisher};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Failed to serialize outcome for task {id}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to publish outcome for task {id}: {reason}")]
    Publish { id: String, reason: String },
}

/// Publishes outcome envelopes to the result queue
///
/// A single attempt per envelope. Nothing is read back from the result
/// queue, so delivery is at-most-once from the worker's side.
pub struct ResultEmitter<P> {
    publisher: P,
    queue: String,
}

impl<P: Publisher> ResultEmitter<P> {
    pub fn new(publisher: P, queue: impl Into<String>) -> Self {
        Self {
            publisher,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn emit(&self, envelope: &OutcomeEnvelope) -> Result<(), EmitError> {
        let body = serde_json::to_vec(envelope).map_err(|source| EmitError::Serialize {
            id: envelope.id.clone(),
            source,
        })?;

        self.publisher
            .publish(&self.queue, OutboundMessage::json(body))
            .await
            .map_err(|e| EmitError::Publish {
                id: envelope.id.clone(),
                reason: crate::error::error_chain(&e),
            })?;

        debug!(task_id = %envelope.id, queue = %self.queue, status = ?envelope.status, "Outcome emitted");
        Ok(())
    }
}
