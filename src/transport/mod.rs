//! Transport layer for task intake and result publishing
//!
//! The worker talks to the broker through two seams: [`Publisher`] for
//! outbound messages and [`DeliveryHandler`] for inbound deliveries. The
//! AMQP implementation lives in [`amqp`]; tests substitute the mocks in
//! `crate::testing`.

use async_trait::async_trait;

pub mod amqp;

/// A message ready to be published to a named queue
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// JSON body
    pub body: Vec<u8>,
    /// Broker priority (0-255), honoured by priority queues
    pub priority: Option<u8>,
    /// Value for the redelivery count header, if any
    pub redelivery_count: Option<u32>,
}

impl OutboundMessage {
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            body,
            priority: None,
            redelivery_count: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_redelivery_count(mut self, count: u32) -> Self {
        self.redelivery_count = Some(count);
        self
    }
}

/// Publishing side of the broker link
///
/// Implementations must be cheap to clone or share; the dispatcher and the
/// emitter hold one for the lifetime of the process.
#[async_trait]
pub trait Publisher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish one persistent message to `queue` via the default exchange
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), Self::Error>;

    /// Check if the link currently accepts publishes
    fn is_connected(&self) -> bool;
}

/// One inbound delivery, detached from the broker's acknowledgement handle
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingDelivery {
    pub queue: String,
    pub body: Vec<u8>,
    /// Broker-level redelivery flag
    pub redelivered: bool,
    /// Application-level redelivery count read from the message headers
    pub redelivery_count: u32,
    pub priority: Option<u8>,
}

impl IncomingDelivery {
    /// Fresh delivery with no redelivery history
    pub fn new(queue: &str, body: Vec<u8>) -> Self {
        Self {
            queue: queue.to_string(),
            body,
            redelivered: false,
            redelivery_count: 0,
            priority: None,
        }
    }
}

/// How the consume loop settles a delivery with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge: the message is done
    Ack,
    /// Negative-acknowledge without requeue (dead-lettered if configured)
    Reject,
    /// Negative-acknowledge with requeue
    Requeue,
}

/// Handles deliveries one at a time
///
/// The consume loop awaits `handle` to completion before it looks at the
/// next delivery or at the shutdown signal.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: IncomingDelivery) -> Disposition;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_message_builders() {
        let message = OutboundMessage::json(b"{}".to_vec())
            .with_priority(5)
            .with_redelivery_count(2);
        assert_eq!(message.priority, Some(5));
        assert_eq!(message.redelivery_count, Some(2));
        assert_eq!(message.body, b"{}");
    }

    #[test]
    fn test_incoming_delivery_defaults() {
        let delivery = IncomingDelivery::new("ai_processing_queue", b"{}".to_vec());
        assert_eq!(delivery.redelivery_count, 0);
        assert!(!delivery.redelivered);
        assert_eq!(delivery.priority, None);
    }
}
