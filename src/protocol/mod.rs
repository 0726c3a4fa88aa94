//! Task and outcome message formats carried over the broker

pub mod messages;

pub use messages::{
    AssessmentItem, CloPloMapping, CloPloPayload, DecodeError, LearningOutcome, OutcomeEnvelope,
    OutcomeStatus, Priority, SummarizePayload, SyllabusData, TaskAction, TaskBody, TaskMessage,
    VersionDiffPayload,
};
