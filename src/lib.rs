//! AI analysis worker
//!
//! A queue-driven background worker that consumes syllabus analysis tasks
//! from RabbitMQ, runs the matching analysis routine, stores the result in
//! Postgres, and publishes an outcome envelope for the backend to pick up.
//!
//! # Overview
//!
//! - Task and outcome wire formats ([`protocol`])
//! - A supervised AMQP link with bounded reconnection ([`transport::amqp`])
//! - Rule-based analyses plus summarization ([`analysis`])
//! - A summarization chain that degrades remote model, local model,
//!   extractive reducer ([`llm`])
//! - Idempotent result storage keyed by task id ([`persistence`])
//! - The dispatch pipeline and process lifecycle ([`worker`])
//!
//! # Quick Start
//!
//! ```rust
//! use ai_analysis_worker::protocol::{TaskAction, TaskBody, TaskMessage};
//!
//! let raw = br#"{
//!     "id": "task-1",
//!     "action": "SUMMARIZE_SYLLABUS",
//!     "priority": "MEDIUM",
//!     "payload": {
//!         "syllabus_id": "syl-1",
//!         "syllabus_data": { "course_name": "Networks", "description": "Packets." }
//!     }
//! }"#;
//!
//! let task = TaskMessage::decode(raw).unwrap();
//! assert_eq!(task.body.action(), TaskAction::SummarizeSyllabus);
//! assert!(matches!(task.body, TaskBody::SummarizeSyllabus(_)));
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod persistence;
pub mod protocol;
pub mod testing;
pub mod transport;
pub mod worker;

pub use config::*;
pub use error::{WorkerError, WorkerResult};
pub use protocol::*;
pub use worker::{TaskDispatcher, WorkerLifecycle};
