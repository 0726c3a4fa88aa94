//! Thread-safe metrics collection
//!
//! Atomic counters for the task pipeline and broker link, and
//! mutex-protected collections for processing times and per-strategy
//! condensation statistics.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

#[derive(Default)]
struct TaskCounters {
    received: AtomicU64,
    in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    requeued: AtomicU64,
    redelivered: AtomicU64,
    dead_lettered: AtomicU64,
    persistence_failures: AtomicU64,
    emit_failures: AtomicU64,
}

#[derive(Default)]
struct BrokerCounters {
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    connected_since: AtomicU64,
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    tasks: TaskCounters,
    broker: BrokerCounters,
    processing_times: Mutex<Vec<u64>>,
    strategy_stats: Mutex<HashMap<String, StrategyStats>>,
    worker_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
    healthy: AtomicBool,
    last_health_check: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let now = current_timestamp();
        Self {
            tasks: TaskCounters::default(),
            broker: BrokerCounters::default(),
            processing_times: Mutex::new(Vec::new()),
            strategy_stats: Mutex::new(HashMap::new()),
            worker_state: Mutex::new("starting".to_string()),
            uptime_start: AtomicU64::new(now),
            state_transitions: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            last_health_check: AtomicU64::new(now),
        }
    }

    // Task pipeline
    pub fn task_received(&self) {
        self.tasks.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_started(&self) {
        self.tasks.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self, duration: Duration) {
        self.tasks.completed.fetch_add(1, Ordering::Relaxed);
        self.finish_in_flight(duration);
    }

    pub fn task_failed(&self, duration: Duration) {
        self.tasks.failed.fetch_add(1, Ordering::Relaxed);
        self.finish_in_flight(duration);
    }

    pub fn task_rejected(&self) {
        self.tasks.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_requeued(&self) {
        self.tasks.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_redelivered(&self) {
        self.tasks.redelivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_dead_lettered(&self) {
        self.tasks.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_failed(&self) {
        self.tasks.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn emit_failed(&self) {
        self.tasks.emit_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn finish_in_flight(&self, duration: Duration) {
        let _ = self
            .tasks
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.record_processing_time(duration);
    }

    fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            push_bounded(&mut times, duration.as_millis() as u64);
        }
    }

    // Broker link
    pub fn broker_connection_attempt(&self) {
        self.broker.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broker_connection_established(&self) {
        self.broker
            .connections_established
            .fetch_add(1, Ordering::Relaxed);
        self.broker.connected.store(true, Ordering::Relaxed);
        self.broker
            .connected_since
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn broker_connection_failed(&self) {
        self.broker.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.broker.connected.store(false, Ordering::Relaxed);
        self.broker.connected_since.store(0, Ordering::Relaxed);
    }

    pub fn broker_connection_lost(&self) {
        self.broker.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.broker.connected.store(false, Ordering::Relaxed);
        self.broker.connected_since.store(0, Ordering::Relaxed);
    }

    pub fn broker_message_received(&self) {
        self.broker.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broker_message_published(&self) {
        self.broker.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broker_publish_failed(&self) {
        self.broker.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Condensation strategies
    pub fn strategy_succeeded(&self, strategy: &str, duration: Duration) {
        self.record_strategy(strategy, duration, true);
    }

    pub fn strategy_fell_through(&self, strategy: &str, duration: Duration) {
        self.record_strategy(strategy, duration, false);
    }

    fn record_strategy(&self, strategy: &str, duration: Duration, succeeded: bool) {
        if let Ok(mut stats) = self.strategy_stats.lock() {
            let entry = stats
                .entry(strategy.to_string())
                .or_insert_with(|| StrategyStats::new(strategy));
            entry.attempts += 1;
            if succeeded {
                entry.successes += 1;
            } else {
                entry.fallthroughs += 1;
            }
            push_bounded(&mut entry.durations, duration.as_millis() as u64);
        }
    }

    // Lifecycle
    pub fn set_worker_state(&self, state: &str) {
        if let Ok(mut current) = self.worker_state.lock() {
            if *current != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current = state.to_string();
            }
        }
    }

    pub fn update_health_status(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
        self.last_health_check
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let now = current_timestamp();
        for counter in [
            &self.tasks.received,
            &self.tasks.in_flight,
            &self.tasks.completed,
            &self.tasks.failed,
            &self.tasks.rejected,
            &self.tasks.requeued,
            &self.tasks.redelivered,
            &self.tasks.dead_lettered,
            &self.tasks.persistence_failures,
            &self.tasks.emit_failures,
            &self.broker.connection_attempts,
            &self.broker.connections_established,
            &self.broker.connection_failures,
            &self.broker.connections_lost,
            &self.broker.messages_received,
            &self.broker.messages_published,
            &self.broker.publish_failures,
            &self.broker.connected_since,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.broker.connected.store(false, Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);
        self.uptime_start.store(now, Ordering::Relaxed);
        self.last_health_check.store(now, Ordering::Relaxed);

        if let Ok(mut times) = self.processing_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.strategy_stats.lock() {
            stats.clear();
        }
        if let Ok(mut state) = self.worker_state.lock() {
            *state = "starting".to_string();
        }
    }

    fn processing_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.processing_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    fn strategy_snapshots(&self) -> HashMap<String, StrategyStatsSnapshot> {
        self.strategy_stats
            .lock()
            .map(|stats| {
                stats
                    .iter()
                    .map(|(name, s)| (name.clone(), s.snapshot()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.processing_time_statistics();

        let connected = self.broker.connected.load(Ordering::Relaxed);
        let since = self.broker.connected_since.load(Ordering::Relaxed);
        let connection_duration_seconds = if connected && since > 0 {
            now.saturating_sub(since)
        } else {
            0
        };

        MetricsSnapshot {
            tasks: TaskMetrics {
                received: self.tasks.received.load(Ordering::Relaxed),
                in_flight: self.tasks.in_flight.load(Ordering::Relaxed),
                completed: self.tasks.completed.load(Ordering::Relaxed),
                failed: self.tasks.failed.load(Ordering::Relaxed),
                rejected: self.tasks.rejected.load(Ordering::Relaxed),
                requeued: self.tasks.requeued.load(Ordering::Relaxed),
                redelivered: self.tasks.redelivered.load(Ordering::Relaxed),
                dead_lettered: self.tasks.dead_lettered.load(Ordering::Relaxed),
                persistence_failures: self.tasks.persistence_failures.load(Ordering::Relaxed),
                emit_failures: self.tasks.emit_failures.load(Ordering::Relaxed),
                avg_processing_time_ms: avg,
                processing_time_p50_ms: p50,
                processing_time_p95_ms: p95,
                processing_time_p99_ms: p99,
            },
            broker: BrokerMetrics {
                connected,
                connection_attempts: self.broker.connection_attempts.load(Ordering::Relaxed),
                connections_established: self
                    .broker
                    .connections_established
                    .load(Ordering::Relaxed),
                connection_failures: self.broker.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.broker.connections_lost.load(Ordering::Relaxed),
                messages_received: self.broker.messages_received.load(Ordering::Relaxed),
                messages_published: self.broker.messages_published.load(Ordering::Relaxed),
                publish_failures: self.broker.publish_failures.load(Ordering::Relaxed),
                connection_duration_seconds,
            },
            strategies: self.strategy_snapshots(),
            lifecycle: LifecycleMetrics {
                current_state: self
                    .worker_state
                    .lock()
                    .map(|s| s.clone())
                    .unwrap_or_else(|_| "unknown".to_string()),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                healthy: self.healthy.load(Ordering::Relaxed),
                last_health_check: self.last_health_check.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct StrategyStats {
    name: String,
    attempts: u64,
    successes: u64,
    fallthroughs: u64,
    durations: Vec<u64>,
}

impl StrategyStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attempts: 0,
            successes: 0,
            fallthroughs: 0,
            durations: Vec::new(),
        }
    }

    fn snapshot(&self) -> StrategyStatsSnapshot {
        let avg_duration_ms = if self.durations.is_empty() {
            0.0
        } else {
            self.durations.iter().sum::<u64>() as f64 / self.durations.len() as f64
        };
        let success_rate = if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        };

        StrategyStatsSnapshot {
            name: self.name.clone(),
            attempts: self.attempts,
            successes: self.successes,
            fallthroughs: self.fallthroughs,
            avg_duration_ms,
            success_rate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub tasks: TaskMetrics,
    pub broker: BrokerMetrics,
    pub strategies: HashMap<String, StrategyStatsSnapshot>,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct TaskMetrics {
    pub received: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
    pub persistence_failures: u64,
    pub emit_failures: u64,
    pub avg_processing_time_ms: f64,
    pub processing_time_p50_ms: f64,
    pub processing_time_p95_ms: f64,
    pub processing_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct BrokerMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub messages_received: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct StrategyStatsSnapshot {
    pub name: String,
    pub attempts: u64,
    pub successes: u64,
    pub fallthroughs: u64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub state_transitions: u64,
    pub healthy: bool,
    pub last_health_check: u64,
}

fn push_bounded(samples: &mut Vec<u64>, value: u64) {
    samples.push(value);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
