//! Connect, declare, consume, and reconnect until shutdown
//!
//! ```text
//! connect ──► declare queues ──► prefetch ──► consume ──┬─► shutdown ──► close
//!    ▲                                                  │
//!    └──────────────────── link lost ◄──────────────────┘
//! ```
//!
//! Each reconnect starts with a fresh retry budget.

use crate::config::{QueueRole, WorkerConfig};
use crate::error::WorkerResult;
use crate::observability::metrics::metrics;
use crate::transport::amqp::{AmqpError, ConnectionSupervisor, ConsumeOutcome, QueueSpec};
use crate::transport::DeliveryHandler;
use tracing::{info, warn, Instrument};

/// Queues one worker touches
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePlan {
    pub task: QueueSpec,
    pub result: QueueSpec,
}

impl QueuePlan {
    pub fn from_config(config: &WorkerConfig, role: QueueRole) -> Self {
        let (name, max_priority) = config.queues.task_queue(role);
        Self {
            task: QueueSpec::task_queue(name, max_priority, config.broker.dead_letter),
            result: QueueSpec::durable(&config.queues.result),
        }
    }
}

pub struct WorkerLifecycle {
    supervisor: ConnectionSupervisor,
    plan: QueuePlan,
    prefetch: u16,
    link_losses: u32,
}

impl WorkerLifecycle {
    pub fn new(supervisor: ConnectionSupervisor, plan: QueuePlan, prefetch: u16) -> Self {
        Self {
            supervisor,
            plan,
            prefetch,
            link_losses: 0,
        }
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn plan(&self) -> &QueuePlan {
        &self.plan
    }

    /// Times the link dropped while consuming
    pub fn link_losses(&self) -> u32 {
        self.link_losses
    }

    /// Run until shutdown is requested or the broker stays unreachable
    ///
    /// Returns `Ok` after a clean shutdown. A connect that exhausts its
    /// retries, or a queue declaration the broker refuses, is returned as
    /// an error. A link that drops while queues are being declared or the
    /// consumer is starting goes back to `connect`.
    pub async fn run<H>(&mut self, handler: &H) -> WorkerResult<()>
    where
        H: DeliveryHandler + ?Sized,
    {
        loop {
            metrics().set_worker_state("connecting");
            match self.supervisor.connect().await {
                Ok(()) => {}
                Err(AmqpError::ShutdownRequested) => {
                    info!("Shutdown requested before the broker link came up");
                    return self.shutdown().await;
                }
                Err(e) => {
                    metrics().set_worker_state("failed");
                    return Err(e.into());
                }
            }

            let prepared = self
                .prepare_link()
                .instrument(crate::lifecycle_span!(phase = "prepare"))
                .await;
            if let Err(e) = prepared {
                self.recover_link(e)?;
                continue;
            }

            metrics().set_worker_state("consuming");
            let outcome = match self.supervisor.consume(&self.plan.task.name, handler).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.recover_link(e)?;
                    continue;
                }
            };

            match outcome {
                ConsumeOutcome::ShutdownRequested => return self.shutdown().await,
                ConsumeOutcome::LinkLost(reason) => self.note_link_loss(&reason),
            }
        }
    }

    /// Treat a link-level failure as a lost link; anything else is fatal
    fn recover_link(&mut self, error: AmqpError) -> Result<(), AmqpError> {
        if !error.is_link_failure() {
            metrics().set_worker_state("failed");
            return Err(error);
        }
        let reason = crate::error::error_chain(&error);
        self.supervisor.mark_link_lost(&reason);
        self.note_link_loss(&reason);
        Ok(())
    }

    fn note_link_loss(&mut self, reason: &str) {
        self.link_losses = self.link_losses.saturating_add(1);
        metrics().set_worker_state("reconnecting");
        warn!(
            queue = %self.plan.task.name,
            reason = %reason,
            link_losses = self.link_losses,
            "Broker link lost, reconnecting"
        );
    }

    async fn prepare_link(&mut self) -> Result<(), AmqpError> {
        self.supervisor.declare_queue(&self.plan.task).await?;
        self.supervisor.declare_queue(&self.plan.result).await?;
        self.supervisor.set_prefetch(self.prefetch).await?;
        info!(
            task_queue = %self.plan.task.name,
            result_queue = %self.plan.result.name,
            prefetch = self.prefetch,
            "Queues declared"
        );
        Ok(())
    }

    async fn shutdown(&mut self) -> WorkerResult<()> {
        metrics().set_worker_state("stopping");
        self.supervisor.close().await?;
        metrics().set_worker_state("stopped");
        info!("Worker stopped");
        Ok(())
    }
}
