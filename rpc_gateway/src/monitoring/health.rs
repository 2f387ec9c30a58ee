//! Background endpoint health monitoring
//!
//! Each cycle probes every registered endpoint concurrently. A probe is bounded
//! by the endpoint's timeout budget; success marks the endpoint healthy and
//! failure marks it unhealthy. Probe errors never leave this module.

use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::providers::failover::{ResilientExecutor, SelectionCache};
use crate::providers::registry::{EndpointDescriptor, EndpointRegistry, EndpointStatus};
use crate::providers::selector::select_endpoint;
use crate::providers::session::{Connector, SessionPool};
use crate::GatewayError;

/// Outcome of probing one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub endpoint: String,
    pub status: EndpointStatus,
    /// True when this probe flipped the endpoint's status
    pub changed: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// Outcome of one full probe cycle
#[derive(Debug, Clone, Serialize)]
pub struct ProbeSummary {
    pub results: Vec<ProbeResult>,
    /// Whether the cached selection was dropped after this cycle
    pub selection_invalidated: bool,
}

impl ProbeSummary {
    pub fn healthy_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == EndpointStatus::Healthy)
            .count()
    }

    pub fn unhealthy_count(&self) -> usize {
        self.results.len() - self.healthy_count()
    }

    pub fn transitions(&self) -> usize {
        self.results.iter().filter(|r| r.changed).count()
    }
}

/// Periodic prober that keeps registry health fresh
pub struct HealthMonitor<C: Connector> {
    registry: Arc<EndpointRegistry>,
    sessions: Arc<SessionPool<C>>,
    selection: Arc<SelectionCache>,
    check_interval: Duration,
    cycles: AtomicU64,
}

impl<C: Connector> HealthMonitor<C> {
    /// Create a new health monitor
    pub fn new(
        registry: Arc<EndpointRegistry>,
        sessions: Arc<SessionPool<C>>,
        selection: Arc<SelectionCache>,
        check_interval: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            selection,
            check_interval,
            cycles: AtomicU64::new(0),
        }
    }

    /// Monitor sharing the executor's registry, sessions and selection cache
    pub fn for_executor(executor: &ResilientExecutor<C>, check_interval: Duration) -> Self {
        Self::new(
            Arc::clone(executor.registry()),
            Arc::clone(executor.sessions()),
            Arc::clone(executor.selection()),
            check_interval,
        )
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Completed probe cycles
    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Probe every endpoint once
    pub async fn run_cycle(&self) -> ProbeSummary {
        let endpoints = self.registry.descriptors();
        let results = join_all(endpoints.iter().map(|endpoint| self.probe(endpoint))).await;

        let mut selection_invalidated = false;
        if results.iter().any(|r| r.changed) {
            selection_invalidated = self.refresh_selection();
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);

        let summary = ProbeSummary {
            results,
            selection_invalidated,
        };
        debug!(
            healthy = summary.healthy_count(),
            unhealthy = summary.unhealthy_count(),
            transitions = summary.transitions(),
            "Endpoint health summary"
        );
        if summary.healthy_count() == 0 {
            error!(
                endpoint_count = summary.results.len(),
                "All endpoints failed health probes"
            );
        }
        summary
    }

    async fn probe(&self, endpoint: &Arc<EndpointDescriptor>) -> ProbeResult {
        let name = endpoint.name();
        let started = Instant::now();

        let outcome = match self.sessions.session_for(endpoint) {
            Ok(session) => {
                match tokio::time::timeout(
                    endpoint.timeout(),
                    self.sessions.connector().probe(&session),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(GatewayError::ConnectionTimeout {
                        endpoint: name.to_string(),
                        timeout_ms: endpoint.timeout().as_millis() as u64,
                    }),
                }
            }
            Err(e) => Err(e),
        };
        let response_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                let changed = self.registry.mark_healthy(name);
                debug!(
                    endpoint = name,
                    response_time_ms = response_time_ms,
                    "Health probe passed"
                );
                ProbeResult {
                    endpoint: name.to_string(),
                    status: EndpointStatus::Healthy,
                    changed,
                    response_time_ms,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                let changed = self.registry.mark_unhealthy(name, &message);
                if changed {
                    self.sessions.evict(name);
                }
                warn!(endpoint = name, error = %e, "Health probe failed");
                ProbeResult {
                    endpoint: name.to_string(),
                    status: EndpointStatus::Unhealthy,
                    changed,
                    response_time_ms,
                    error: Some(message),
                }
            }
        }
    }

    /// Drop the cached selection if the selector now prefers something else
    fn refresh_selection(&self) -> bool {
        let cached = match self.selection.current() {
            Some(cached) => cached,
            None => return false,
        };

        let preferred = select_endpoint(&self.registry.list());
        let unchanged = preferred.as_ref().map_or(false, |p| p.same_target(&cached));
        if unchanged {
            return false;
        }

        self.selection.invalidate();
        info!(
            previous = cached.name.as_str(),
            preferred = preferred.as_ref().map(|p| p.name.as_str()).unwrap_or("none"),
            "Preferred endpoint changed, selection invalidated"
        );
        true
    }
}

impl<C: Connector> HealthMonitor<C> {
    /// Spawn the monitor loop; the first cycle runs immediately
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let monitor = self;

        info!(
            interval_seconds = monitor.check_interval.as_secs_f64(),
            "Starting endpoint health monitoring"
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                // a panic inside one cycle must not end the loop
                let cycle_monitor = Arc::clone(&monitor);
                let mut cycle = tokio::spawn(async move { cycle_monitor.run_cycle().await });
                tokio::select! {
                    _ = token.cancelled() => {
                        cycle.abort();
                        break;
                    }
                    joined = &mut cycle => {
                        if let Err(e) = joined {
                            error!(error = %e, "Health check cycle ended abnormally");
                        }
                    }
                }
            }

            info!("Endpoint health monitoring stopped");
        });

        MonitorHandle { cancel, task }
    }
}

/// Handle to a running monitor task
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Token that stops the monitor when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the monitor and wait for the task to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Health monitor task ended abnormally");
        }
    }
}
