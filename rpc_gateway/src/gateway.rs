//! Gateway lifecycle
//!
//! [`Gateway`] wires the registry, executor, client facade and health monitor
//! from a single [`GatewayConfig`]. Everything it owns is torn down by
//! [`Gateway::shutdown`]; nothing lives in globals.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::monitoring::health::{HealthMonitor, MonitorHandle, ProbeSummary};
use crate::providers::failover::ResilientExecutor;
use crate::providers::multi_rpc::MultiRpcClient;
use crate::providers::registry::{EndpointRegistry, EndpointSnapshot};
use crate::providers::session::{Connector, HttpConnector};
use crate::Result;

/// A running gateway instance
pub struct Gateway<C: Connector = HttpConnector> {
    config: GatewayConfig,
    client: MultiRpcClient<C>,
    monitor: Arc<HealthMonitor<C>>,
    monitor_handle: Option<MonitorHandle>,
}

impl Gateway<HttpConnector> {
    /// Start an HTTP-backed gateway
    pub fn start(config: GatewayConfig) -> Result<Self> {
        Self::start_with_connector(config, HttpConnector)
    }
}

impl<C: Connector> Gateway<C> {
    /// Start a gateway whose sessions come from `connector`
    ///
    /// Must be called from within a tokio runtime when health monitoring is
    /// enabled, since the monitor task is spawned here.
    pub fn start_with_connector(config: GatewayConfig, connector: C) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(EndpointRegistry::new(&config.endpoints)?);
        let executor = Arc::new(ResilientExecutor::new(
            registry,
            connector,
            config.retry.policy(),
        ));
        let client = MultiRpcClient::new(Arc::clone(&executor), config.retry.mutating);
        let monitor = Arc::new(HealthMonitor::for_executor(
            &executor,
            config.health.check_interval(),
        ));

        let monitor_handle = if config.health.enabled {
            Some(Arc::clone(&monitor).start())
        } else {
            info!("Health monitoring disabled");
            None
        };

        info!(
            endpoint_count = executor.registry().len(),
            max_attempts = config.retry.max_attempts,
            mutating = ?config.retry.mutating,
            "RPC gateway started"
        );

        Ok(Self {
            config,
            client,
            monitor,
            monitor_handle,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Client facade; cheap to clone and share across tasks
    pub fn client(&self) -> &MultiRpcClient<C> {
        &self.client
    }

    pub fn executor(&self) -> &Arc<ResilientExecutor<C>> {
        self.client.executor()
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        self.client.executor().registry()
    }

    /// Current health of every endpoint, in preference order
    pub fn health_snapshot(&self) -> Vec<EndpointSnapshot> {
        self.registry().list()
    }

    /// Run one probe cycle now, independent of the background schedule
    pub async fn probe_once(&self) -> ProbeSummary {
        self.monitor.run_cycle().await
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor_handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop background monitoring and wait for it to exit
    pub async fn shutdown(self) {
        info!("Shutting down RPC gateway");

        if let Some(handle) = self.monitor_handle {
            let grace = Duration::from_secs(self.config.global.shutdown_timeout_seconds);
            if tokio::time::timeout(grace, handle.stop()).await.is_err() {
                warn!(
                    timeout_seconds = self.config.global.shutdown_timeout_seconds,
                    "Health monitor did not stop in time"
                );
            }
        }

        info!("RPC gateway stopped");
    }
}
