//! Broker reconnection behavior without a running broker
//!
//! Connects to a closed local port so every attempt fails fast, and checks
//! the retry budget, the backoff schedule, and shutdown during the wait.

use ai_analysis_worker::config::BrokerSection;
use ai_analysis_worker::transport::amqp::{
    AmqpError, ConnectionEvent, ConnectionPhase, ConnectionState, ConnectionSupervisor,
    HealthMonitor, ReconnectConfig, ReconnectionDecision,
};
use ai_analysis_worker::transport::Publisher;
use ai_analysis_worker::transport::OutboundMessage;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const UNREACHABLE: &str = "amqp://127.0.0.1:1/%2f";

fn fast_schedule(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts,
        base_delay_ms: 5,
        max_delay_ms: 20,
        attempt_timeout_ms: 1_000,
    }
}

#[test]
fn test_backoff_doubles_until_the_cap() {
    let config = ReconnectConfig::from_broker_section(&BrokerSection::default());
    assert_eq!(config.max_attempts, 10);

    let delays: Vec<u64> = (1..=7)
        .map(|attempt| config.calculate_backoff_delay(attempt))
        .collect();
    assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000]);
    assert_eq!(config.calculate_backoff_delay(200), 60_000);
}

#[test]
fn test_attempts_stop_at_the_configured_maximum() {
    let config = fast_schedule(3);

    assert!(matches!(
        HealthMonitor::should_attempt_reconnection(2, &config, false),
        ReconnectionDecision::Proceed { attempt: 3, .. }
    ));
    assert_eq!(
        HealthMonitor::should_attempt_reconnection(3, &config, false),
        ReconnectionDecision::AbortMaxAttemptsExceeded
    );
    assert_eq!(
        HealthMonitor::should_attempt_reconnection(0, &config, true),
        ReconnectionDecision::AbortShutdownRequested
    );
}

#[test]
fn test_successful_connection_resets_failure_counter() {
    let failing = ConnectionState {
        phase: ConnectionPhase::Disconnected,
        consecutive_failures: 4,
        current_backoff: Duration::from_secs(16),
        last_error: Some("connection refused".to_string()),
    };

    let connected = HealthMonitor::determine_next_state(&failing, ConnectionEvent::Established);

    assert_eq!(connected.phase, ConnectionPhase::Connected);
    assert_eq!(connected.consecutive_failures, 0);
    assert_eq!(connected.current_backoff, Duration::ZERO);
    assert_eq!(connected.last_error, None);
}

#[tokio::test]
async fn test_unreachable_broker_exhausts_retries() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor = ConnectionSupervisor::new(
        "backoff-test",
        UNREACHABLE.to_string(),
        fast_schedule(3),
        1,
        shutdown_rx,
    );

    let result = supervisor.connect().await;

    match result {
        Err(AmqpError::RetriesExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(!last_error.is_empty());
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }

    let state = supervisor.connection_state();
    assert_eq!(state.phase, ConnectionPhase::Disconnected);
    assert_eq!(state.consecutive_failures, 3);
    assert!(state.last_error.is_some());
    assert!(!supervisor.get_health_metrics().is_healthy);
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff_wait() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor = ConnectionSupervisor::new(
        "backoff-test",
        UNREACHABLE.to_string(),
        ReconnectConfig {
            max_attempts: 10,
            base_delay_ms: 30_000,
            max_delay_ms: 60_000,
            attempt_timeout_ms: 1_000,
        },
        1,
        shutdown_rx,
    );

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = shutdown_tx.send(true);
    });

    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(10), supervisor.connect())
        .await
        .expect("connect should return once shutdown is requested");

    assert!(matches!(result, Err(AmqpError::ShutdownRequested)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_publisher_refuses_while_disconnected() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = ConnectionSupervisor::new(
        "backoff-test",
        UNREACHABLE.to_string(),
        fast_schedule(1),
        1,
        shutdown_rx,
    );
    let publisher = supervisor.publisher();

    assert!(!publisher.is_connected());
    let result = publisher
        .publish("ai_result_queue", OutboundMessage::json(b"{}".to_vec()))
        .await;
    assert!(matches!(
        result,
        Err(AmqpError::NotConnected {
            phase: ConnectionPhase::Disconnected
        })
    ));
}

#[tokio::test]
async fn test_invalid_schedule_is_rejected_before_connecting() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor = ConnectionSupervisor::new(
        "backoff-test",
        UNREACHABLE.to_string(),
        ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        },
        1,
        shutdown_rx,
    );

    assert!(matches!(
        supervisor.connect().await,
        Err(AmqpError::InvalidConfig(_))
    ));
}
