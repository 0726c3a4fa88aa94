//! Health check HTTP server for container orchestration
//!
//! `/health` reports the broker link and any registered checks, `/ready`
//! is green only while the worker is consuming, `/live` always answers,
//! and `/metrics` dumps the global collector as JSON.

use crate::observability::metrics::metrics;
use crate::transport::amqp::{ConnectionPhase, ConnectionState};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use warp::http::StatusCode;
use warp::Filter;

pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// HTTP health check server
pub struct HealthServer {
    worker_id: String,
    port: u16,
    broker_phase: RwLock<ConnectionPhase>,
    additional_checks: RwLock<HashMap<String, HealthCheck>>,
}

impl HealthServer {
    pub fn new(worker_id: String, port: u16) -> Self {
        Self {
            worker_id,
            port,
            broker_phase: RwLock::new(ConnectionPhase::Disconnected),
            additional_checks: RwLock::new(HashMap::new()),
        }
    }

    /// Port from `HEALTH_PORT`, falling back to 8080
    pub fn port_from_env() -> u16 {
        std::env::var("HEALTH_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_HEALTH_PORT)
    }

    pub async fn set_broker_phase(&self, phase: ConnectionPhase) {
        *self.broker_phase.write().await = phase;
    }

    /// Mirror a supervisor's state channel until the sender goes away
    pub fn track_connection_state(
        self: &Arc<Self>,
        mut state_rx: watch::Receiver<ConnectionState>,
    ) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let phase = state_rx.borrow_and_update().phase;
                server.set_broker_phase(phase).await;
                metrics().update_health_status(broker_is_up(phase));
                if state_rx.changed().await.is_err() {
                    debug!("Connection state channel closed, health tracking stopped");
                    break;
                }
            }
        })
    }

    pub async fn add_health_check(&self, name: String, check: HealthCheck) {
        self.additional_checks.write().await.insert(name, check);
    }

    pub async fn remove_health_check(&self, name: &str) {
        self.additional_checks.write().await.remove(name);
    }

    /// Serve until `shutdown_rx` flips to true
    pub async fn start(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), warp::Error> {
        let health_server = Arc::clone(&self);
        let ready_server = Arc::clone(&self);

        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = Arc::clone(&health_server);
            async move {
                let status = server.get_health_status().await;
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&status),
                    code,
                ))
            }
        });

        let metrics_route = warp::path("metrics")
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = Arc::clone(&ready_server);
            async move {
                let response = server.readiness().await;
                let code = if response.ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&response),
                    code,
                ))
            }
        });

        let live_route = warp::path("live").and(warp::get()).map(|| {
            warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            })
        });

        let routes = health_route.or(metrics_route).or(ready_route).or(live_route);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let (bound, server) =
            warp::serve(routes).try_bind_with_graceful_shutdown(addr, async move {
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            })?;

        info!(addr = %bound, "Health server listening");
        server.await;
        Ok(())
    }

    async fn readiness(&self) -> ReadinessResponse {
        let phase = *self.broker_phase.read().await;
        ReadinessResponse {
            ready: phase == ConnectionPhase::Consuming,
            broker: phase_label(phase),
            timestamp: current_timestamp(),
        }
    }

    async fn get_health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let mut checks = HashMap::new();
        checks.insert("broker".to_string(), self.check_broker_health().await);
        checks.insert("task_processing".to_string(), check_task_processing(now));
        for (name, check) in self.additional_checks.read().await.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let healthy = checks.values().all(|check| check.status == "healthy");
        HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: now,
            worker_id: self.worker_id.clone(),
            uptime_seconds: metrics().get_metrics().lifecycle.uptime_seconds,
            checks,
        }
    }

    async fn check_broker_health(&self) -> HealthCheck {
        let phase = *self.broker_phase.read().await;
        HealthCheck {
            status: if broker_is_up(phase) {
                "healthy"
            } else {
                "unhealthy"
            }
            .to_string(),
            message: Some(format!("broker link {}", phase_label(phase))),
            last_check: current_timestamp(),
        }
    }
}

fn broker_is_up(phase: ConnectionPhase) -> bool {
    matches!(phase, ConnectionPhase::Connected | ConnectionPhase::Consuming)
}

fn phase_label(phase: ConnectionPhase) -> String {
    format!("{phase:?}").to_uppercase()
}

/// Idle workers are healthy; this check only reports throughput
fn check_task_processing(now: u64) -> HealthCheck {
    let tasks = metrics().get_metrics().tasks;
    HealthCheck {
        status: "healthy".to_string(),
        message: Some(format!(
            "{} completed, {} failed, {} rejected, {} in flight",
            tasks.completed, tasks.failed, tasks.rejected, tasks.in_flight
        )),
        last_check: now,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    worker_id: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    broker: String,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
