//! The task pipeline and the process lifecycle around it

pub mod dispatcher;
pub mod emitter;
pub mod lifecycle;
pub mod redelivery;

pub use dispatcher::{TaskDispatcher, FAILED_ATTRIBUTION};
pub use emitter::{EmitError, ResultEmitter};
pub use lifecycle::{QueuePlan, WorkerLifecycle};
pub use redelivery::{RedeliveryDecision, RedeliveryPolicy};
