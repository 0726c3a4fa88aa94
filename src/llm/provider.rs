//! Condensation provider abstraction
//!
//! A provider turns a long text into a shorter one under a character budget.
//! Providers are fallible; the chain in [`crate::llm::chain`] orders them and
//! guarantees a result.

use async_trait::async_trait;
use thiserror::Error;

/// Text condensation strategy
#[async_trait]
pub trait CondenseProvider: Send + Sync {
    /// Strategy name, recorded as the result's attribution
    fn name(&self) -> &str;

    /// Condense `text` to at most `max_chars` characters
    ///
    /// Implementations may return text longer than the budget; the chain
    /// cuts it down.
    async fn condense(&self, text: &str, max_chars: usize) -> Result<String, ProviderError>;

    /// Check if the provider is configured and reachable
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Condensation provider errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Provider returned empty text")]
    EmptyOutput,
}

/// Collapse whitespace runs to one space and trim the ends
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Length in characters, the unit every budget is expressed in
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Instruction sent to generative providers
pub fn condense_prompt(text: &str, max_chars: usize) -> String {
    format!(
        "Summarize the following course description in at most {max_chars} characters. \
         Reply in the same language as the text, as plain prose without headings or lists.\n\n{text}"
    )
}
