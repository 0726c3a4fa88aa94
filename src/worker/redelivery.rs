//! Bounded retry policy for transient task failures
//!
//! The broker's own requeue does not count attempts, so the worker carries
//! the count in the `x-redelivery-count` header and republishes a copy.

/// What to do with a delivery whose processing failed transiently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// Publish a copy carrying `next_count`, then ack the original
    Retry { next_count: u32 },
    /// Cap reached: reject without requeue so the broker dead-letters it
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    max_redeliveries: u32,
}

impl RedeliveryPolicy {
    pub fn new(max_redeliveries: u32) -> Self {
        Self { max_redeliveries }
    }

    pub fn max_redeliveries(&self) -> u32 {
        self.max_redeliveries
    }

    pub fn decide(&self, redelivery_count: u32) -> RedeliveryDecision {
        if redelivery_count < self.max_redeliveries {
            RedeliveryDecision::Retry {
                next_count: redelivery_count + 1,
            }
        } else {
            RedeliveryDecision::GiveUp {
                attempts: redelivery_count.saturating_add(1),
            }
        }
    }
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
