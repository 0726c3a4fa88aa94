//! Testing utilities and mock implementations
//!
//! Lets the worker pipeline run without a broker, database, or model
//! endpoint. Shared by unit tests and the integration tests under `tests/`.

pub mod mocks;

pub use mocks::*;
