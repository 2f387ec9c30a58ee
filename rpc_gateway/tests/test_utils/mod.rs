//! Test utilities and helpers
//!
//! Scripted connectors and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use marketplace_rpc_gateway::config::EndpointConfig;
use marketplace_rpc_gateway::providers::{
    BackoffPolicy, Connector, EndpointDescriptor, EndpointRegistry, ResilientExecutor, RetryPolicy,
};
use marketplace_rpc_gateway::{GatewayError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared set of endpoint names that currently fail
#[derive(Clone, Default)]
pub struct Faults {
    failing: Arc<Mutex<HashSet<String>>>,
}

impl Faults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn heal(&self, name: &str) {
        self.failing.lock().remove(name);
    }

    pub fn is_failing(&self, name: &str) -> bool {
        self.failing.lock().contains(name)
    }
}

/// Session bound to one scripted endpoint
pub struct ScriptedSession {
    pub endpoint: String,
    faults: Faults,
}

impl ScriptedSession {
    /// Pretend remote call: fails while the endpoint is scripted to fail
    pub async fn call<T>(&self, value: T) -> Result<T> {
        if self.faults.is_failing(&self.endpoint) {
            Err(GatewayError::transient(format!(
                "connection refused by {}",
                self.endpoint
            )))
        } else {
            Ok(value)
        }
    }
}

/// Connector whose probes and sessions follow a shared [`Faults`] script
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub faults: Faults,
    pub connects: Arc<AtomicUsize>,
    pub probes: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(faults: Faults) -> Self {
        Self {
            faults,
            ..Default::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    fn connect(&self, endpoint: &EndpointDescriptor) -> Result<ScriptedSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            endpoint: endpoint.name().to_string(),
            faults: self.faults.clone(),
        })
    }

    async fn probe(&self, session: &ScriptedSession) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        session.call(()).await
    }
}

/// Endpoint configs named after `names`, priorities 1, 2, 3... in order
pub fn endpoint_configs(names: &[&str]) -> Vec<EndpointConfig> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            EndpointConfig::new(*name, format!("https://{}.rpc.test", name))
                .with_priority(i as u32 + 1)
                .with_timeout(Duration::from_secs(2))
        })
        .collect()
}

/// Linear backoff policy with a small base delay
pub fn linear_policy(max_attempts: u32, base_delay_ms: u64) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        BackoffPolicy::linear(Duration::from_millis(base_delay_ms)),
    )
}

/// Executor over scripted endpoints sharing `faults`
pub fn scripted_executor(
    configs: &[EndpointConfig],
    faults: &Faults,
    policy: RetryPolicy,
) -> ResilientExecutor<ScriptedConnector> {
    let registry = Arc::new(EndpointRegistry::new(configs).expect("valid endpoint configs"));
    ResilientExecutor::new(registry, ScriptedConnector::new(faults.clone()), policy)
}

/// Wait for async operations with timeout
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_condition() {
        let mut counter = 0;
        let result = wait_for_condition(
            || {
                counter += 1;
                let done = counter >= 3;
                async move { done }
            },
            Duration::from_secs(1),
        )
        .await;

        assert!(result);
    }

    #[tokio::test]
    async fn test_scripted_session_follows_faults() {
        let faults = Faults::new();
        let session = ScriptedSession {
            endpoint: "a".to_string(),
            faults: faults.clone(),
        };

        assert_eq!(session.call(7).await.unwrap(), 7);
        faults.fail("a");
        assert!(session.call(7).await.unwrap_err().is_retryable());
        faults.heal("a");
        assert!(session.call(7).await.is_ok());
    }
}
