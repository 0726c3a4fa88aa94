//! Ranked condensation strategies with a guaranteed final step
//!
//! Strategies are tried in the order they were added. Each one is marked
//! available or not once, when the chain is built; an unavailable strategy
//! is skipped for the life of the process. Every failure falls through to
//! the next strategy, and the extractive reducer at the end cannot fail.

use crate::config::ProvidersSection;
use crate::llm::extractive::{truncate_at_word_boundary, ExtractiveReducer};
use crate::llm::provider::{char_len, normalize_whitespace, CondenseProvider, ProviderError};
use crate::llm::providers::{GeminiConfig, GeminiProvider, LocalModelConfig, LocalModelProvider};
use crate::observability::metrics::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Attribution used when the input already fit the budget
pub const PASSTHROUGH: &str = "passthrough";

/// Condensed text and the strategy that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condensed {
    pub text: String,
    pub strategy: String,
}

struct StrategySlot {
    provider: Arc<dyn CondenseProvider>,
    available: bool,
}

/// Ordered fallback chain ending in the extractive reducer
pub struct ProviderFallbackChain {
    strategies: Vec<StrategySlot>,
    reducer: ExtractiveReducer,
}

impl Default for ProviderFallbackChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFallbackChain {
    /// Chain with only the extractive reducer
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            reducer: ExtractiveReducer::new(),
        }
    }

    /// Append a strategy with a fixed availability flag
    pub fn with_strategy(mut self, provider: Arc<dyn CondenseProvider>, available: bool) -> Self {
        self.strategies.push(StrategySlot {
            provider,
            available,
        });
        self
    }

    /// Append a strategy whose availability is decided by one health probe
    pub async fn with_probed_strategy(self, provider: Arc<dyn CondenseProvider>) -> Self {
        let available = match provider.health_check().await {
            Ok(()) => {
                info!(strategy = provider.name(), "Condensation strategy available");
                true
            }
            Err(e) => {
                warn!(
                    strategy = provider.name(),
                    reason = %e,
                    "Condensation strategy unavailable, skipping for this run"
                );
                false
            }
        };
        self.with_strategy(provider, available)
    }

    /// Build the chain from config: remote model, then local model
    ///
    /// A strategy that is disabled, unconfigured, or fails its probe is kept
    /// in the chain but marked unavailable.
    pub async fn from_config(
        providers: &ProvidersSection,
        remote_api_key: Option<String>,
    ) -> Self {
        let mut chain = Self::new();

        match (providers.remote.enabled, remote_api_key) {
            (true, Some(api_key)) => {
                match GeminiProvider::new(GeminiConfig::from_section(&providers.remote, api_key)) {
                    Ok(provider) => {
                        chain = chain.with_probed_strategy(Arc::new(provider)).await;
                    }
                    Err(e) => warn!(strategy = "gemini", reason = %e, "Remote provider setup failed"),
                }
            }
            (true, None) => {
                warn!(
                    strategy = "gemini",
                    env = %providers.remote.api_key_env,
                    "Remote provider enabled but no API key set"
                );
            }
            (false, _) => debug!(strategy = "gemini", "Remote provider disabled"),
        }

        if providers.local.enabled {
            match LocalModelProvider::new(LocalModelConfig::from_section(&providers.local)) {
                Ok(provider) => {
                    chain = chain.with_probed_strategy(Arc::new(provider)).await;
                }
                Err(e) => warn!(strategy = "local-model", reason = %e, "Local model setup failed"),
            }
        } else {
            debug!(strategy = "local-model", "Local model disabled");
        }

        info!(
            strategies = ?chain.available_strategies(),
            "Condensation chain ready"
        );
        chain
    }

    /// Names of the strategies that will be attempted, in order
    pub fn available_strategies(&self) -> Vec<String> {
        self.strategies
            .iter()
            .filter(|slot| slot.available)
            .map(|slot| slot.provider.name().to_string())
            .chain(std::iter::once(ExtractiveReducer::NAME.to_string()))
            .collect()
    }

    /// Condense `text` to at most `max_chars` characters; never fails
    pub async fn condense(&self, text: &str, max_chars: usize) -> Condensed {
        let normalized = normalize_whitespace(text);
        if char_len(&normalized) <= max_chars {
            return Condensed {
                text: normalized,
                strategy: PASSTHROUGH.to_string(),
            };
        }

        for slot in self.strategies.iter().filter(|slot| slot.available) {
            let name = slot.provider.name();
            let started = Instant::now();

            let attempt = slot
                .provider
                .condense(&normalized, max_chars)
                .await
                .and_then(|output| Self::fit_output(&output, max_chars));

            match attempt {
                Ok(output) => {
                    metrics().strategy_succeeded(name, started.elapsed());
                    debug!(strategy = name, chars = char_len(&output), "Condensed text");
                    return Condensed {
                        text: output,
                        strategy: name.to_string(),
                    };
                }
                Err(e) => {
                    metrics().strategy_fell_through(name, started.elapsed());
                    warn!(
                        strategy = name,
                        reason = %e,
                        "Condensation strategy failed, falling through"
                    );
                }
            }
        }

        let started = Instant::now();
        let text = self.reducer.reduce(&normalized, max_chars);
        metrics().strategy_succeeded(ExtractiveReducer::NAME, started.elapsed());
        Condensed {
            text,
            strategy: ExtractiveReducer::NAME.to_string(),
        }
    }

    /// Normalize provider output and hold it to the budget
    fn fit_output(output: &str, max_chars: usize) -> Result<String, ProviderError> {
        let output = normalize_whitespace(output);
        if output.is_empty() {
            return Err(ProviderError::EmptyOutput);
        }
        if char_len(&output) > max_chars {
            let cut = truncate_at_word_boundary(&output, max_chars);
            if cut.is_empty() {
                return Err(ProviderError::EmptyOutput);
            }
            return Ok(cut);
        }
        Ok(output)
    }
}
