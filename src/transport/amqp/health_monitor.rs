//! Pure health monitoring and reconnection logic for the AMQP supervisor
//!
//! This module contains pure functions for reconnection decisions,
//! connection state transitions, and link health tracking.

use super::connection::{ConnectionPhase, ConnectionState, ReconnectConfig};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether another connection attempt follows `failed_attempts` failures
    pub fn should_attempt_reconnection(
        failed_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if failed_attempts >= config.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        ReconnectionDecision::Proceed {
            attempt: failed_attempts + 1,
            delay_ms: config.calculate_backoff_delay(failed_attempts),
        }
    }

    /// Determine next state after a connection event (pure function)
    ///
    /// The failure counter resets on every successful connection.
    pub fn determine_next_state(
        current: &ConnectionState,
        event: ConnectionEvent,
    ) -> ConnectionState {
        match event {
            ConnectionEvent::AttemptStarted => ConnectionState {
                phase: ConnectionPhase::Connecting,
                ..current.clone()
            },
            ConnectionEvent::Established => ConnectionState {
                phase: ConnectionPhase::Connected,
                consecutive_failures: 0,
                current_backoff: Duration::ZERO,
                last_error: None,
            },
            ConnectionEvent::AttemptFailed { reason, next_delay } => ConnectionState {
                phase: ConnectionPhase::Disconnected,
                consecutive_failures: current.consecutive_failures.saturating_add(1),
                current_backoff: next_delay,
                last_error: Some(reason),
            },
            ConnectionEvent::ConsumeStarted => ConnectionState {
                phase: ConnectionPhase::Consuming,
                ..current.clone()
            },
            ConnectionEvent::ConsumeStopped => ConnectionState {
                phase: ConnectionPhase::Connected,
                ..current.clone()
            },
            ConnectionEvent::LinkLost(reason) => ConnectionState {
                phase: ConnectionPhase::Disconnected,
                last_error: Some(reason),
                ..current.clone()
            },
            ConnectionEvent::ShutdownStarted => ConnectionState {
                phase: ConnectionPhase::ShuttingDown,
                ..current.clone()
            },
            ConnectionEvent::Closed => ConnectionState {
                phase: ConnectionPhase::Disconnected,
                current_backoff: Duration::ZERO,
                ..current.clone()
            },
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(phase: ConnectionPhase) -> bool {
        matches!(
            phase,
            ConnectionPhase::Connected | ConnectionPhase::Consuming
        )
    }

    /// Check if connection state allows starting a consumer (pure function)
    pub fn can_consume(phase: ConnectionPhase) -> bool {
        matches!(phase, ConnectionPhase::Connected)
    }

    /// Calculate health metrics for connection (pure function)
    pub fn calculate_health_metrics(
        state: &ConnectionState,
        connect_time: Option<Instant>,
        reconnect_count: u32,
    ) -> HealthMetrics {
        let uptime = connect_time
            .filter(|_| Self::can_publish(state.phase))
            .map(|t| t.elapsed());

        HealthMetrics {
            uptime,
            reconnect_count,
            consecutive_failures: state.consecutive_failures,
            is_healthy: Self::can_publish(state.phase),
        }
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from.phase, to.phase) {
            (ConnectionPhase::Connecting, ConnectionPhase::Connected) => {
                info!("Broker connection established");
            }
            (ConnectionPhase::Consuming, ConnectionPhase::Disconnected)
            | (ConnectionPhase::Connected, ConnectionPhase::Disconnected) => {
                warn!(
                    reason = to.last_error.as_deref().unwrap_or("unknown"),
                    "Broker connection lost"
                );
            }
            (ConnectionPhase::Connecting, ConnectionPhase::Disconnected) => {
                warn!(
                    failures = to.consecutive_failures,
                    backoff_ms = to.current_backoff.as_millis() as u64,
                    reason = to.last_error.as_deref().unwrap_or("unknown"),
                    "Broker connection attempt failed"
                );
            }
            (_, ConnectionPhase::ShuttingDown) => {
                info!("Broker connection shutting down");
            }
            (from_phase, to_phase) if from_phase != to_phase => {
                info!("Broker connection phase: {:?} -> {:?}", from_phase, to_phase);
            }
            _ => {}
        }
    }

    /// Validate connection configuration (pure function)
    pub fn validate_connection_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if config.base_delay_ms == 0 {
            return Err("base_delay_ms must be greater than 0".to_string());
        }

        if config.attempt_timeout_ms == 0 {
            return Err("attempt_timeout_ms must be greater than 0".to_string());
        }

        if config.max_delay_ms < config.base_delay_ms {
            error!(
                base_delay_ms = config.base_delay_ms,
                max_delay_ms = config.max_delay_ms,
                "Reconnect cap below base delay"
            );
            return Err("max_delay_ms must not be below base_delay_ms".to_string());
        }

        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with another attempt after waiting `delay_ms`
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    AttemptStarted,
    Established,
    AttemptFailed { reason: String, next_delay: Duration },
    ConsumeStarted,
    ConsumeStopped,
    LinkLost(String),
    ShutdownStarted,
    Closed,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    /// Time since connection established
    pub uptime: Option<Duration>,
    /// Number of reconnections after the first connect
    pub reconnect_count: u32,
    pub consecutive_failures: u32,
    pub is_healthy: bool,
}
