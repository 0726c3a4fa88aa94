//! Wire message types for the analysis queues
//!
//! Inbound tasks are decoded in two steps: the envelope fields first, then
//! the payload against the schema selected by `action`. A message whose
//! action is unknown, or whose payload does not fit that action, is rejected
//! here and never reaches a routine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Closed set of analysis kinds a task may request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    /// Check course learning outcomes against programme outcomes
    MapCloPlo,
    /// Diff two syllabus versions
    CompareVersions,
    /// Student-facing syllabus summary
    SummarizeSyllabus,
}

impl TaskAction {
    pub const ALL: [TaskAction; 3] = [
        TaskAction::MapCloPlo,
        TaskAction::CompareVersions,
        TaskAction::SummarizeSyllabus,
    ];

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::MapCloPlo => "MAP_CLO_PLO",
            TaskAction::CompareVersions => "COMPARE_VERSIONS",
            TaskAction::SummarizeSyllabus => "SUMMARIZE_SYLLABUS",
        }
    }

    /// Look up an action by its wire name (exact match)
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == name)
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling hint, mapped onto the AMQP priority property
///
/// Decoding never fails: a missing or unrecognised hint reads as `Medium`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value
            .as_str()
            .and_then(Priority::from_wire)
            .unwrap_or_default())
    }
}

impl Priority {
    /// Look up a hint by name, ignoring case
    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Priority::High),
            "MEDIUM" => Some(Priority::Medium),
            "LOW" => Some(Priority::Low),
            _ => None,
        }
    }

    /// AMQP message priority for this hint
    pub fn amqp_priority(&self) -> u8 {
        match self {
            Priority::High => 5,
            Priority::Medium => 3,
            Priority::Low => 1,
        }
    }
}

/// One course-outcome to programme-outcome link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloPloMapping {
    pub clo: String,
    pub plo: String,
    /// Assessment weight (percent) carried by this CLO
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Payload for `MAP_CLO_PLO`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloPloPayload {
    pub syllabus_id: String,
    /// Null when the syllabus is not attached to a curriculum yet
    #[serde(default)]
    pub curriculum_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mappings: Vec<CloPloMapping>,
    /// Distinct CLOs each PLO needs to count as covered
    #[serde(default)]
    pub min_clos_per_plo: Option<usize>,
}

/// Payload for `COMPARE_VERSIONS`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionDiffPayload {
    /// Absent when the new version is the first one
    #[serde(default)]
    pub old_version_id: Option<String>,
    pub new_version_id: String,
    #[serde(default, alias = "old_version", deserialize_with = "null_as_default")]
    pub old_content: Map<String, Value>,
    #[serde(default, alias = "new_version", deserialize_with = "null_as_default")]
    pub new_content: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningOutcome {
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessmentItem {
    #[serde(rename = "type", alias = "method")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub weight: f64,
}

/// Syllabus content carried by a summarize request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyllabusData {
    pub course_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub theory_hours: Option<u32>,
    #[serde(default)]
    pub practice_hours: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub learning_outcomes: Vec<LearningOutcome>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assessment_scheme: Vec<AssessmentItem>,
    /// A list of course names, or one free-text string
    #[serde(default, deserialize_with = "prerequisite_list")]
    pub prerequisites: Vec<String>,
}

/// Producers send explicit nulls for absent optional fields
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn prerequisite_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let entries = match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(text)) => vec![text],
        Some(OneOrMany::Many(list)) => list,
    };
    Ok(entries
        .into_iter()
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect())
}

/// Payload for `SUMMARIZE_SYLLABUS`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummarizePayload {
    pub syllabus_id: String,
    pub syllabus_data: SyllabusData,
    /// Overrides the configured summary length, in characters
    #[serde(default)]
    pub target_length: Option<usize>,
}

/// Action together with its validated payload
#[derive(Debug, Clone, PartialEq)]
pub enum TaskBody {
    MapCloPlo(CloPloPayload),
    CompareVersions(VersionDiffPayload),
    SummarizeSyllabus(SummarizePayload),
}

impl TaskBody {
    pub fn action(&self) -> TaskAction {
        match self {
            TaskBody::MapCloPlo(_) => TaskAction::MapCloPlo,
            TaskBody::CompareVersions(_) => TaskAction::CompareVersions,
            TaskBody::SummarizeSyllabus(_) => TaskAction::SummarizeSyllabus,
        }
    }

    /// Identifier of the entity the analysis is about
    pub fn subject_ref(&self) -> &str {
        match self {
            TaskBody::MapCloPlo(p) => &p.syllabus_id,
            TaskBody::CompareVersions(p) => &p.new_version_id,
            TaskBody::SummarizeSyllabus(p) => &p.syllabus_id,
        }
    }

    fn payload_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            TaskBody::MapCloPlo(p) => serde_json::to_value(p),
            TaskBody::CompareVersions(p) => serde_json::to_value(p),
            TaskBody::SummarizeSyllabus(p) => serde_json::to_value(p),
        }
    }

    fn from_parts(action: TaskAction, payload: Value) -> Result<Self, String> {
        let body = match action {
            TaskAction::MapCloPlo => {
                let p: CloPloPayload = serde_json::from_value(payload).map_err(|e| e.to_string())?;
                require_non_empty("syllabus_id", &p.syllabus_id)?;
                if let Some(curriculum_id) = &p.curriculum_id {
                    require_non_empty("curriculum_id", curriculum_id)?;
                }
                if p.min_clos_per_plo == Some(0) {
                    return Err("min_clos_per_plo must be at least 1".to_string());
                }
                TaskBody::MapCloPlo(p)
            }
            TaskAction::CompareVersions => {
                let p: VersionDiffPayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                require_non_empty("new_version_id", &p.new_version_id)?;
                TaskBody::CompareVersions(p)
            }
            TaskAction::SummarizeSyllabus => {
                let p: SummarizePayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                require_non_empty("syllabus_id", &p.syllabus_id)?;
                require_non_empty("syllabus_data.course_name", &p.syllabus_data.course_name)?;
                if p.target_length == Some(0) {
                    return Err("target_length must be at least 1".to_string());
                }
                TaskBody::SummarizeSyllabus(p)
            }
        };
        Ok(body)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

/// A decoded unit of analysis work
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMessage {
    /// Caller-supplied unique identifier, also the result record key
    pub id: String,
    pub priority: Priority,
    pub submitted_by: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub body: TaskBody,
}

/// Envelope fields as they arrive, before the payload is validated
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTaskMessage {
    #[serde(alias = "messageId", alias = "message_id")]
    id: String,
    action: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default, alias = "userId", alias = "user_id")]
    submitted_by: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    payload: Value,
}

/// Why an inbound message was rejected at decode time
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Malformed task message: {0}")]
    Malformed(String),
    #[error("Unknown action '{action}' for task {id}")]
    UnknownAction { id: String, action: String },
    #[error("Invalid payload for {action} task {id}: {reason}")]
    InvalidPayload {
        id: String,
        action: TaskAction,
        reason: String,
    },
}

impl DecodeError {
    /// Task id when the envelope was readable enough to carry one
    pub fn task_id(&self) -> Option<&str> {
        match self {
            DecodeError::Malformed(_) => None,
            DecodeError::UnknownAction { id, .. } | DecodeError::InvalidPayload { id, .. } => {
                Some(id)
            }
        }
    }
}

impl TaskMessage {
    /// Decode and validate a message body
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawTaskMessage =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if raw.id.trim().is_empty() {
            return Err(DecodeError::Malformed("task id must not be empty".to_string()));
        }

        let action = TaskAction::from_wire(&raw.action).ok_or_else(|| DecodeError::UnknownAction {
            id: raw.id.clone(),
            action: raw.action.clone(),
        })?;

        let body = TaskBody::from_parts(action, raw.payload).map_err(|reason| {
            DecodeError::InvalidPayload {
                id: raw.id.clone(),
                action,
                reason,
            }
        })?;

        Ok(TaskMessage {
            id: raw.id,
            priority: raw.priority,
            submitted_by: raw.submitted_by,
            submitted_at: raw.timestamp,
            body,
        })
    }

    pub fn action(&self) -> TaskAction {
        self.body.action()
    }

    /// Encode in the canonical wire shape
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut object = Map::new();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        object.insert("action".to_string(), serde_json::to_value(self.action())?);
        object.insert("priority".to_string(), serde_json::to_value(self.priority)?);
        if let Some(submitted_by) = &self.submitted_by {
            object.insert("submittedBy".to_string(), Value::String(submitted_by.clone()));
        }
        if let Some(submitted_at) = &self.submitted_at {
            object.insert("timestamp".to_string(), serde_json::to_value(submitted_at)?);
        }
        object.insert("payload".to_string(), self.body.payload_json()?);
        Ok(Value::Object(object))
    }
}

/// Terminal status of one processing attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Result message published for every processed task
///
/// A redelivered task yields a new envelope with the same `id`; readers
/// replace rather than append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEnvelope {
    pub id: String,
    pub action: TaskAction,
    pub status: OutcomeStatus,
    /// 100 on success, 0 on error
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub processing_time_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl OutcomeEnvelope {
    pub fn success(id: &str, action: TaskAction, result: Value, elapsed: Duration) -> Self {
        Self {
            id: id.to_string(),
            action,
            status: OutcomeStatus::Success,
            progress: 100,
            current_step: Some("COMPLETED".to_string()),
            result: Some(result),
            error_message: None,
            processing_time_ms: duration_ms(elapsed),
            completed_at: Utc::now(),
        }
    }

    pub fn error(id: &str, action: TaskAction, message: String, elapsed: Duration) -> Self {
        Self {
            id: id.to_string(),
            action,
            status: OutcomeStatus::Error,
            progress: 0,
            current_step: Some("FAILED".to_string()),
            result: None,
            error_message: Some(message),
            processing_time_ms: duration_ms(elapsed),
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
