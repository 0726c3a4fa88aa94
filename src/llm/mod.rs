//! Text condensation layer
//!
//! Provider-agnostic condensation with a hosted model, a locally served
//! model, and a deterministic extractive reducer behind one fallback chain.

pub mod chain;
pub mod extractive;
pub mod provider;
pub mod providers;

pub use chain::{Condensed, ProviderFallbackChain, PASSTHROUGH};
pub use extractive::ExtractiveReducer;
pub use provider::*;
pub use providers::*;
