//! Condensation provider implementations
//!
//! Concrete implementations of the CondenseProvider trait for the hosted
//! and the locally served model.

pub mod gemini;
pub mod local;

pub use gemini::*;
pub use local::*;
