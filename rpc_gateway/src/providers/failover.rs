//! Failover execution across RPC endpoints
//!
//! [`ResilientExecutor`] resolves an endpoint, runs a caller-supplied
//! operation against that endpoint's session, and on a transient failure marks
//! the endpoint unhealthy, backs off and retries on whatever the selector
//! prefers next.
//!
//! Operations handed to [`ResilientExecutor::execute`] may run more than once,
//! possibly on different endpoints. Only pass read-only or naturally
//! idempotent work; state-changing calls need their own policy (see
//! [`MultiRpcClient::submit`](crate::providers::MultiRpcClient::submit)).

use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::monitoring::metrics::ClientMetrics;
use crate::providers::registry::EndpointRegistry;
use crate::providers::retry::{retry, RetryPolicy};
use crate::providers::selector::{select_endpoint, ActiveSelection};
use crate::providers::session::{Connector, SessionPool};
use crate::{GatewayError, Result};

/// Cached result of the last endpoint selection
///
/// Degraded selections are never cached, so every call re-checks for a
/// recovered endpoint while nothing is healthy.
#[derive(Debug, Default)]
pub struct SelectionCache {
    current: RwLock<Option<ActiveSelection>>,
    reselections: AtomicU64,
}

impl SelectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached selection, or a fresh one computed from `registry`
    pub fn resolve(&self, registry: &EndpointRegistry) -> Option<ActiveSelection> {
        if let Some(selection) = self.current.read().as_ref() {
            return Some(selection.clone());
        }

        let mut current = self.current.write();
        if let Some(selection) = current.as_ref() {
            return Some(selection.clone());
        }

        let selection = select_endpoint(&registry.list())?;
        self.reselections.fetch_add(1, Ordering::Relaxed);
        debug!(
            endpoint = selection.name.as_str(),
            degraded = selection.degraded,
            "Selected endpoint"
        );
        if !selection.degraded {
            *current = Some(selection.clone());
        }
        Some(selection)
    }

    pub fn current(&self) -> Option<ActiveSelection> {
        self.current.read().clone()
    }

    pub fn invalidate(&self) {
        self.current.write().take();
    }

    /// Invalidate only if `name` is the cached endpoint
    pub fn invalidate_if(&self, name: &str) -> bool {
        let mut current = self.current.write();
        if current.as_ref().map_or(false, |s| s.name == name) {
            current.take();
            true
        } else {
            false
        }
    }

    /// Number of times a selection was computed rather than served from cache
    pub fn reselection_count(&self) -> u64 {
        self.reselections.load(Ordering::Relaxed)
    }
}

/// Retry and failover engine over an [`EndpointRegistry`]
pub struct ResilientExecutor<C: Connector> {
    registry: Arc<EndpointRegistry>,
    sessions: Arc<SessionPool<C>>,
    selection: Arc<SelectionCache>,
    policy: RetryPolicy,
    metrics: Mutex<ClientMetrics>,
}

impl<C: Connector> ResilientExecutor<C> {
    /// Create a new executor
    pub fn new(registry: Arc<EndpointRegistry>, connector: C, policy: RetryPolicy) -> Self {
        info!(
            endpoint_count = registry.len(),
            max_attempts = policy.max_attempts,
            "Creating resilient executor"
        );

        Self {
            registry,
            sessions: Arc::new(SessionPool::new(connector)),
            selection: Arc::new(SelectionCache::new()),
            policy,
            metrics: Mutex::new(ClientMetrics::new()),
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionPool<C>> {
        &self.sessions
    }

    pub fn selection(&self) -> &Arc<SelectionCache> {
        &self.selection
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Get executor metrics
    pub fn metrics(&self) -> ClientMetrics {
        self.metrics.lock().clone()
    }

    /// Run `operation` with the default policy
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn(Arc<C::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_policy(&self.policy, &CancellationToken::new(), operation)
            .await
    }

    /// Run `operation` with the default policy, aborting when `cancel` fires
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: Fn(Arc<C::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_policy(&self.policy, cancel, operation).await
    }

    /// Run `operation` under an explicit policy
    pub async fn execute_with_policy<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        F: Fn(Arc<C::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tried = Mutex::new(Vec::new());
        let operation = &operation;
        let tried_ref = &tried;

        let result = retry(policy, cancel, move |attempt| {
            self.attempt(attempt, operation, tried_ref)
        })
        .await;

        match result {
            Err(GatewayError::ExhaustedRetries {
                attempts,
                last_error,
                ..
            }) => {
                let endpoints_tried = tried.into_inner();
                self.metrics.lock().record_exhausted();
                warn!(
                    attempts = attempts,
                    endpoints = ?endpoints_tried,
                    error = %last_error,
                    "All retry attempts exhausted"
                );
                Err(GatewayError::ExhaustedRetries {
                    attempts,
                    endpoints_tried,
                    last_error,
                })
            }
            other => other,
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        attempt: u32,
        operation: &F,
        tried: &Mutex<Vec<String>>,
    ) -> Result<T>
    where
        F: Fn(Arc<C::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let selection = self
            .selection
            .resolve(&self.registry)
            .ok_or_else(|| GatewayError::configuration("no endpoints registered"))?;

        let endpoint = match self.registry.get(&selection.name) {
            Some(endpoint) => endpoint,
            None => {
                // registry was replaced between selection and lookup
                self.selection.invalidate();
                return Err(GatewayError::transient(format!(
                    "endpoint {} no longer registered",
                    selection.name
                )));
            }
        };
        let name = endpoint.name().to_string();
        tried.lock().push(name.clone());

        let started = Instant::now();
        let result = match self.sessions.session_for(&endpoint) {
            Ok(session) => {
                match tokio::time::timeout(endpoint.timeout(), operation(session)).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::ConnectionTimeout {
                        endpoint: name.clone(),
                        timeout_ms: endpoint.timeout().as_millis() as u64,
                    }),
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => {
                let elapsed = started.elapsed();
                self.metrics.lock().record_success(&name, elapsed, attempt);
                debug!(
                    endpoint = name.as_str(),
                    attempt = attempt,
                    response_time_ms = elapsed.as_millis() as u64,
                    "Request succeeded"
                );
                Ok(value)
            }
            Err(e) => {
                self.metrics.lock().record_failure(&name);
                if e.is_retryable() {
                    self.registry.mark_unhealthy(&name, &e.to_string());
                    self.selection.invalidate_if(&name);
                    // the next attempt on this endpoint starts from a fresh client
                    self.sessions.evict(&name);
                    warn!(
                        endpoint = name.as_str(),
                        attempt = attempt,
                        error = %e,
                        "Request failed, failing over"
                    );
                } else {
                    debug!(
                        endpoint = name.as_str(),
                        attempt = attempt,
                        error = %e,
                        "Request rejected"
                    );
                }
                Err(e)
            }
        }
    }

    /// Replace the whole endpoint set
    pub fn reconfigure(&self, endpoints: &[EndpointConfig]) -> Result<()> {
        self.registry.replace(endpoints)?;
        self.sessions.clear();
        self.selection.invalidate();
        Ok(())
    }
}
