//! Worker configuration loaded from TOML
//!
//! Every section carries serde defaults matching the deployed service, so a
//! file containing only `[worker] id = "..."` is a complete configuration.
//! Secrets never live in the file: fields ending in `_env` name the
//! environment variable that holds the value, resolved at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Main worker configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    pub worker: WorkerSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub queues: QueueSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub providers: ProvidersSection,
}

/// Worker identity and task-queue selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSection {
    /// Worker identifier (must match [a-zA-Z0-9._-]+), used as the AMQP connection name
    pub id: String,
    /// Which task queue this process consumes
    #[serde(default)]
    pub queue: QueueRole,
    /// Transient failures tolerated per task before it is parked
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

/// The two task queue families
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueRole {
    /// Interactive analyses (alignment checks, version diffs)
    #[default]
    Processing,
    /// Background summarization
    Summarize,
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueRole::Processing => write!(f, "processing"),
            QueueRole::Summarize => write!(f, "summarize"),
        }
    }
}

impl FromStr for QueueRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "processing" => Ok(QueueRole::Processing),
            "summarize" => Ok(QueueRole::Summarize),
            other => Err(ConfigError::InvalidConfig(format!(
                "unknown queue role '{other}' (expected processing or summarize)"
            ))),
        }
    }
}

/// AMQP broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// AMQP URL without credentials, e.g. amqp://localhost:5672/%2f
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// AMQP heartbeat in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u16,
    /// Unacknowledged deliveries a consumer may hold
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
    /// Connection attempts before `connect()` gives up
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    /// Upper bound for the exponential reconnect wait, in seconds
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    /// Declare task queues with a dead-letter exchange
    #[serde(default)]
    pub dead_letter: bool,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            username_env: None,
            password_env: None,
            heartbeat_secs: default_heartbeat_secs(),
            prefetch: default_prefetch(),
            max_connect_attempts: default_max_connect_attempts(),
            backoff_cap_secs: default_backoff_cap_secs(),
            dead_letter: false,
        }
    }
}

/// Queue names and priority ceilings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    #[serde(default = "default_processing_queue")]
    pub processing: String,
    #[serde(default = "default_processing_max_priority")]
    pub processing_max_priority: u8,
    #[serde(default = "default_summarize_queue")]
    pub summarize: String,
    #[serde(default = "default_summarize_max_priority")]
    pub summarize_max_priority: u8,
    #[serde(default = "default_result_queue")]
    pub result: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            processing: default_processing_queue(),
            processing_max_priority: default_processing_max_priority(),
            summarize: default_summarize_queue(),
            summarize_max_priority: default_summarize_max_priority(),
            result: default_result_queue(),
        }
    }
}

impl QueueSection {
    /// Queue name and max priority for a task queue role
    pub fn task_queue(&self, role: QueueRole) -> (&str, u8) {
        match role {
            QueueRole::Processing => (&self.processing, self.processing_max_priority),
            QueueRole::Summarize => (&self.summarize, self.summarize_max_priority),
        }
    }
}

/// Result store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSection {
    /// When false, results are kept in process memory only
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Environment variable containing the Postgres URL
    #[serde(default = "default_database_url_env")]
    pub url_env: String,
    /// Schema holding the analysis table
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Per-statement timeout in seconds
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
    /// Apply bundled migrations at startup
    #[serde(default)]
    pub run_migrations: bool,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            enabled: true,
            url_env: default_database_url_env(),
            schema: default_schema(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            statement_timeout_secs: default_statement_timeout_secs(),
            run_migrations: false,
        }
    }
}

/// Summarization strategy settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvidersSection {
    /// Default target length for condensed text, in characters
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    #[serde(default)]
    pub remote: RemoteProviderSection,
    #[serde(default)]
    pub local: LocalModelSection,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            summary_max_chars: default_summary_max_chars(),
            remote: RemoteProviderSection::default(),
            local: LocalModelSection::default(),
        }
    }
}

/// Hosted generative model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteProviderSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_remote_model")]
    pub model: String,
    /// Environment variable containing API key
    #[serde(default = "default_remote_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional temperature (0.0 to 2.0)
    pub temperature: Option<f32>,
}

impl Default for RemoteProviderSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_remote_model(),
            api_key_env: default_remote_api_key_env(),
            base_url: default_remote_base_url(),
            timeout_secs: default_remote_timeout_secs(),
            temperature: None,
        }
    }
}

/// Locally hosted sequence model behind a text-generation server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalModelSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default = "default_local_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_local_timeout_secs")]
    pub timeout_secs: u64,
    /// Generation length ceiling passed to the server
    #[serde(default = "default_local_max_new_tokens")]
    pub max_new_tokens: u32,
}

impl Default for LocalModelSection {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_local_model(),
            endpoint: default_local_endpoint(),
            timeout_secs: default_local_timeout_secs(),
            max_new_tokens: default_local_max_new_tokens(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_redeliveries() -> u32 {
    3
}

fn default_broker_url() -> String {
    "amqp://localhost:5672/%2f".to_string()
}

fn default_heartbeat_secs() -> u16 {
    600
}

fn default_prefetch() -> u16 {
    1
}

fn default_max_connect_attempts() -> u32 {
    10
}

fn default_backoff_cap_secs() -> u64 {
    60
}

fn default_processing_queue() -> String {
    "ai_processing_queue".to_string()
}

fn default_processing_max_priority() -> u8 {
    5
}

fn default_summarize_queue() -> String {
    "ai_summarize_queue".to_string()
}

fn default_summarize_max_priority() -> u8 {
    3
}

fn default_result_queue() -> String {
    "ai_result_queue".to_string()
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_schema() -> String {
    "ai_service".to_string()
}

fn default_min_connections() -> u32 {
    2
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_secs() -> u64 {
    60
}

fn default_summary_max_chars() -> usize {
    150
}

fn default_remote_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_remote_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_remote_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_local_model() -> String {
    "vinai/phogpt-4b-v1-instruct".to_string()
}

fn default_local_endpoint() -> String {
    "http://localhost:8081".to_string()
}

fn default_local_timeout_secs() -> u64 {
    60
}

fn default_local_max_new_tokens() -> u32 {
    2048
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid worker ID format: {0}")]
    InvalidWorkerId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WorkerConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_worker_id(&self.worker.id)?;

        if self.broker.prefetch == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.prefetch must be at least 1".to_string(),
            ));
        }
        if self.broker.max_connect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.max_connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.broker.backoff_cap_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.backoff_cap_secs must be greater than 0".to_string(),
            ));
        }

        let names = [
            &self.queues.processing,
            &self.queues.summarize,
            &self.queues.result,
        ];
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "queue names must not be empty".to_string(),
            ));
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err(ConfigError::InvalidConfig(
                "processing, summarize and result queues must be distinct".to_string(),
            ));
        }
        if self.queues.processing_max_priority == 0 || self.queues.summarize_max_priority == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue max priority must be between 1 and 255".to_string(),
            ));
        }

        if self.providers.summary_max_chars == 0 {
            return Err(ConfigError::InvalidConfig(
                "providers.summary_max_chars must be at least 1".to_string(),
            ));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::InvalidConfig(
                "database.max_connections must not be below min_connections".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get broker username from environment variable
    pub fn get_broker_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get broker password from environment variable
    pub fn get_broker_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }

    /// Get Postgres URL from environment variable
    pub fn get_database_url(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.database.url_env)
    }

    /// Get the remote provider API key; absence disables that strategy
    pub fn get_remote_api_key(&self) -> Option<String> {
        Self::get_env_var_optional(Some(&self.providers.remote.api_key_env))
            .filter(|key| !key.trim().is_empty())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[worker]
id = "test-worker"

[database]
enabled = false

[providers.remote]
enabled = false
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

/// Validate worker ID format
fn validate_worker_id(worker_id: &str) -> Result<(), ConfigError> {
    let valid_chars = worker_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if worker_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidWorkerId(format!(
            "Worker ID '{worker_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_service_defaults() {
        let config = WorkerConfig::from_toml_str("[worker]\nid = \"analysis-1\"\n").unwrap();

        assert_eq!(config.worker.id, "analysis-1");
        assert_eq!(config.worker.queue, QueueRole::Processing);
        assert_eq!(config.worker.max_redeliveries, 3);
        assert_eq!(config.broker.url, "amqp://localhost:5672/%2f");
        assert_eq!(config.broker.heartbeat_secs, 600);
        assert_eq!(config.broker.prefetch, 1);
        assert_eq!(config.broker.max_connect_attempts, 10);
        assert_eq!(config.broker.backoff_cap_secs, 60);
        assert!(!config.broker.dead_letter);
        assert_eq!(config.queues.processing, "ai_processing_queue");
        assert_eq!(config.queues.processing_max_priority, 5);
        assert_eq!(config.queues.summarize, "ai_summarize_queue");
        assert_eq!(config.queues.summarize_max_priority, 3);
        assert_eq!(config.queues.result, "ai_result_queue");
        assert!(config.database.enabled);
        assert_eq!(config.database.schema, "ai_service");
        assert_eq!(config.providers.summary_max_chars, 150);
        assert_eq!(config.providers.remote.model, "gemini-1.5-flash");
        assert!(!config.providers.local.enabled);
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[worker]
id = "summarizer-2"
queue = "summarize"
max_redeliveries = 5

[broker]
url = "amqp://rabbit:5672/%2f"
username_env = "RABBITMQ_USER"
password_env = "RABBITMQ_PASS"
prefetch = 1
max_connect_attempts = 4
backoff_cap_secs = 8
dead_letter = true

[queues]
summarize = "bulk_summaries"
summarize_max_priority = 4

[database]
url_env = "AI_DB_URL"
max_connections = 4
min_connections = 1
run_migrations = true

[providers]
summary_max_chars = 200

[providers.remote]
model = "gemini-2.5-flash"
timeout_secs = 5
temperature = 0.2

[providers.local]
enabled = true
endpoint = "http://model-host:9000"
"#;

        let config = WorkerConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.worker.queue, QueueRole::Summarize);
        assert_eq!(config.worker.max_redeliveries, 5);
        assert_eq!(config.broker.username_env, Some("RABBITMQ_USER".to_string()));
        assert!(config.broker.dead_letter);
        assert_eq!(config.queues.task_queue(QueueRole::Summarize), ("bulk_summaries", 4));
        assert_eq!(
            config.queues.task_queue(QueueRole::Processing),
            ("ai_processing_queue", 5)
        );
        assert_eq!(config.database.url_env, "AI_DB_URL");
        assert!(config.database.run_migrations);
        assert_eq!(config.providers.summary_max_chars, 200);
        assert_eq!(config.providers.remote.temperature, Some(0.2));
        assert!(config.providers.local.enabled);
        assert_eq!(config.providers.local.endpoint, "http://model-host:9000");
    }

    #[test]
    fn test_invalid_worker_id() {
        assert!(validate_worker_id("invalid@worker").is_err());
        assert!(validate_worker_id("").is_err());
        assert!(validate_worker_id("valid-worker_123.test").is_ok());
    }

    #[test]
    fn test_zero_prefetch_rejected() {
        let result = WorkerConfig::from_toml_str("[worker]\nid = \"w\"\n[broker]\nprefetch = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_duplicate_queue_names_rejected() {
        let toml_content = r#"
[worker]
id = "w"

[queues]
result = "ai_processing_queue"
"#;
        let result = WorkerConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("distinct")));
    }

    #[test]
    fn test_zero_priority_rejected() {
        let toml_content = "[worker]\nid = \"w\"\n[queues]\nprocessing_max_priority = 0\n";
        assert!(WorkerConfig::from_toml_str(toml_content).is_err());
    }

    #[test]
    fn test_unknown_queue_role_rejected() {
        let toml_content = "[worker]\nid = \"w\"\nqueue = \"results\"\n";
        assert!(matches!(
            WorkerConfig::from_toml_str(toml_content),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_queue_role_from_str() {
        assert_eq!("Processing".parse::<QueueRole>().unwrap(), QueueRole::Processing);
        assert_eq!("summarize".parse::<QueueRole>().unwrap(), QueueRole::Summarize);
        assert!("bulk".parse::<QueueRole>().is_err());
        assert_eq!(QueueRole::Summarize.to_string(), "summarize");
    }

    #[test]
    fn test_missing_database_url_env() {
        let mut config = WorkerConfig::test_config();
        config.database.url_env = "AI_WORKER_TEST_UNSET_DB_URL".to_string();
        assert!(matches!(
            config.get_database_url(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "AI_WORKER_TEST_UNSET_DB_URL"
        ));
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = WorkerConfig::test_config();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed = WorkerConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(config, reparsed);
    }
}
