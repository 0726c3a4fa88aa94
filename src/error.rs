//! Crate-level error type for the analysis worker
//!
//! Each layer has its own `thiserror` enum; `WorkerError` collects the ones
//! that can abort startup or the consume loop. Errors that end up in log
//! lines or outcome envelopes pass through [`sanitize_error_message`] first.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for worker operations
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("Broker error: {0}")]
    Broker(#[from] crate::transport::amqp::AmqpError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),
    #[error("Provider setup failed: {message}")]
    ProviderSetup { message: String },
    #[error("Startup failed: {message}")]
    Startup { message: String },
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl WorkerError {
    /// Create provider setup error
    pub fn provider_setup<S: Into<String>>(message: S) -> Self {
        Self::ProviderSetup {
            message: message.into(),
        }
    }

    /// Create startup error
    pub fn startup<S: Into<String>>(message: S) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Sanitized rendering safe for logs and outbound messages
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

const MAX_MESSAGE_CHARS: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_ASSIGNMENT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static URL_CREDENTIALS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z][a-z0-9+.-]*://[^:/@\s]+):[^@\s]+@").ok());

static SENSITIVE_PATH: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

fn redact(pattern: &Lazy<Option<Regex>>, input: String, replacement: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(&input, replacement).into_owned(),
        None => input,
    }
}

/// Strip credentials and bound the length of an error string
///
/// Length is counted in characters so multi-byte text is never split.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = redact(&URL_CREDENTIALS, message.to_string(), "${1}:***@");
    sanitized = redact(&SECRET_ASSIGNMENT, sanitized, "${1}=***");
    sanitized = redact(&SENSITIVE_PATH, sanitized, "/***REDACTED***/");

    if sanitized.chars().count() > MAX_MESSAGE_CHARS {
        let keep = MAX_MESSAGE_CHARS - TRUNCATE_SUFFIX.len();
        let mut truncated: String = sanitized.chars().take(keep).collect();
        truncated.push_str(TRUNCATE_SUFFIX);
        sanitized = truncated;
    }

    sanitized
}

/// Render an error and its `source()` chain as one line
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        rendered.push_str(": ");
        rendered.push_str(&source.to_string());
        current = source.source();
    }
    rendered
}
