//! Locally hosted sequence model behind a text-generation server
//!
//! Speaks the `POST /generate` / `GET /health` protocol of a
//! text-generation-inference style server.

use crate::config::LocalModelSection;
use crate::llm::provider::{condense_prompt, CondenseProvider, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Local model provider configuration
#[derive(Debug, Clone)]
pub struct LocalModelConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
    pub max_new_tokens: u32,
}

impl LocalModelConfig {
    pub fn from_section(section: &LocalModelSection) -> Self {
        Self {
            endpoint: section.endpoint.trim_end_matches('/').to_string(),
            model: section.model.clone(),
            timeout: Duration::from_secs(section.timeout_secs),
            max_new_tokens: section.max_new_tokens,
        }
    }
}

/// Local model provider implementation
pub struct LocalModelProvider {
    config: LocalModelConfig,
    client: Client,
}

impl LocalModelProvider {
    pub fn new(config: LocalModelConfig) -> Result<Self, ProviderError> {
        if config.endpoint.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Local model endpoint is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.config.timeout.as_secs())
        } else {
            ProviderError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl CondenseProvider for LocalModelProvider {
    fn name(&self) -> &str {
        "local-model"
    }

    async fn condense(&self, text: &str, max_chars: usize) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            inputs: condense_prompt(text, max_chars),
            parameters: GenerateParameters {
                max_new_tokens: self.config.max_new_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/generate", self.config.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(format!(
                "Local model '{}' error: {status} - {error_text}",
                self.config.model
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(generated.generated_text)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/health", self.config.endpoint))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::ApiError(format!(
                "Local model health check returned {}",
                response.status()
            )))
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    inputs: String,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generated_text: String,
}
