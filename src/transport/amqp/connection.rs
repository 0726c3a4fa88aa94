//! Pure connection state management for the AMQP supervisor
//!
//! This module contains pure functions for connection state, backoff
//! calculation, broker URI construction, and queue argument tables.

use crate::config::BrokerSection;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Header carrying how many times a task was re-queued after a transient failure
pub const REDELIVERY_COUNT_HEADER: &str = "x-redelivery-count";

/// Lifecycle phase of the broker link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Consuming,
    ShuttingDown,
}

/// Connection state for the supervisor, one per worker process
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Failed attempts since the last successful connection
    pub consecutive_failures: u32,
    /// Wait applied before the next attempt
    pub current_backoff: Duration,
    /// Reason for the most recent disconnect or failure
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn initial() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            consecutive_failures: 0,
            current_backoff: Duration::ZERO,
            last_error: None,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Connection attempts before `connect()` reports failure
    pub max_attempts: u32,
    /// Base of the exponential schedule in milliseconds
    pub base_delay_ms: u64,
    /// Ceiling for any single wait in milliseconds
    pub max_delay_ms: u64,
    /// Bound on a single TCP + AMQP handshake
    pub attempt_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    pub fn from_broker_section(broker: &BrokerSection) -> Self {
        Self {
            max_attempts: broker.max_connect_attempts,
            base_delay_ms: 1_000,
            max_delay_ms: broker.backoff_cap_secs.saturating_mul(1_000),
            ..Self::default()
        }
    }

    /// Wait after the given failed attempt (1-based): base * 2^attempt, capped
    pub fn calculate_backoff_delay(&self, failed_attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(failed_attempt.min(63)).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Total time spent sleeping if every attempt fails
    pub fn calculate_max_total_time(&self) -> u64 {
        (1..self.max_attempts)
            .map(|attempt| self.calculate_backoff_delay(attempt))
            .fold(0u64, u64::saturating_add)
    }
}

/// AMQP transport errors
#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] lapin::Error),
    #[error("Channel setup failed")]
    ChannelFailed(#[source] lapin::Error),
    #[error("Declaring queue '{queue}' failed")]
    QueueDeclareFailed {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Setting prefetch failed")]
    QosFailed(#[source] lapin::Error),
    #[error("Publishing to '{queue}' failed")]
    PublishFailed {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Consuming from '{queue}' failed")]
    ConsumeFailed {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Connection attempt timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid reconnect configuration: {0}")]
    InvalidConfig(String),
    #[error("Not connected - current phase: {phase:?}")]
    NotConnected { phase: ConnectionPhase },
    #[error("Gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl AmqpError {
    /// Whether the link itself went away, as opposed to the broker refusing
    /// a request over a healthy link
    pub fn is_link_failure(&self) -> bool {
        match self {
            AmqpError::NotConnected { .. } => true,
            AmqpError::ChannelFailed(source)
            | AmqpError::QueueDeclareFailed { source, .. }
            | AmqpError::QosFailed(source)
            | AmqpError::PublishFailed { source, .. }
            | AmqpError::ConsumeFailed { source, .. } => is_link_error(source),
            _ => false,
        }
    }
}

fn is_link_error(error: &lapin::Error) -> bool {
    matches!(
        error,
        lapin::Error::IOError(_)
            | lapin::Error::InvalidChannelState(_)
            | lapin::Error::InvalidConnectionState(_)
            | lapin::Error::MissingHeartbeatError
    )
}

/// Build the connection URI from config and resolved credentials
///
/// Credentials come from the environment and are injected here, so the
/// configured URL never needs to contain them.
pub fn configure_amqp_uri(
    broker: &BrokerSection,
    username: Option<String>,
    password: Option<String>,
) -> Result<String, AmqpError> {
    let mut url =
        Url::parse(&broker.url).map_err(|_| AmqpError::InvalidBrokerUrl(broker.url.clone()))?;

    if url.scheme() != "amqp" && url.scheme() != "amqps" {
        return Err(AmqpError::InvalidBrokerUrl(broker.url.clone()));
    }
    if url.host_str().is_none() {
        return Err(AmqpError::InvalidBrokerUrl(broker.url.clone()));
    }

    if let Some(username) = username {
        url.set_username(&username)
            .map_err(|_| AmqpError::InvalidBrokerUrl(broker.url.clone()))?;
        url.set_password(password.as_deref())
            .map_err(|_| AmqpError::InvalidBrokerUrl(broker.url.clone()))?;
    }

    let has_heartbeat = url.query_pairs().any(|(key, _)| key == "heartbeat");
    if !has_heartbeat {
        url.query_pairs_mut()
            .append_pair("heartbeat", &broker.heartbeat_secs.to_string());
    }

    Ok(url.to_string())
}

/// Declaration parameters for one queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub max_priority: Option<u8>,
    /// Route rejected messages to `{name}.dlx` / `{name}.dlq`
    pub dead_letter: bool,
}

impl QueueSpec {
    /// Task queue with priority support
    pub fn task_queue(name: &str, max_priority: u8, dead_letter: bool) -> Self {
        Self {
            name: name.to_string(),
            durable: true,
            max_priority: Some(max_priority),
            dead_letter,
        }
    }

    /// Plain durable queue
    pub fn durable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            durable: true,
            max_priority: None,
            dead_letter: false,
        }
    }

    pub fn dead_letter_exchange(&self) -> String {
        format!("{}.dlx", self.name)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dlq", self.name)
    }

    /// Argument table passed to `queue.declare`
    pub fn arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        if let Some(max_priority) = self.max_priority {
            args.insert(
                "x-max-priority".into(),
                AMQPValue::LongInt(i32::from(max_priority)),
            );
        }
        if self.dead_letter {
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(self.dead_letter_exchange().into()),
            );
            args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(self.name.clone().into()),
            );
        }
        args
    }
}

/// Read the redelivery counter from message headers; absent means zero
pub fn read_redelivery_count(headers: Option<&FieldTable>) -> u32 {
    let Some(table) = headers else {
        return 0;
    };
    let key = ShortString::from(REDELIVERY_COUNT_HEADER);
    let count = match table.inner().get(&key) {
        Some(AMQPValue::ShortShortUInt(v)) => i64::from(*v),
        Some(AMQPValue::ShortShortInt(v)) => i64::from(*v),
        Some(AMQPValue::ShortUInt(v)) => i64::from(*v),
        Some(AMQPValue::ShortInt(v)) => i64::from(*v),
        Some(AMQPValue::LongUInt(v)) => i64::from(*v),
        Some(AMQPValue::LongInt(v)) => i64::from(*v),
        Some(AMQPValue::LongLongInt(v)) => *v,
        _ => 0,
    };
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

/// Header table carrying a redelivery counter
pub fn redelivery_headers(count: u32) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        REDELIVERY_COUNT_HEADER.into(),
        AMQPValue::LongLongInt(i64::from(count)),
    );
    headers
}
