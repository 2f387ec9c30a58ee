//! # Marketplace RPC Gateway
//!
//! Resilient access to a pool of JSON-RPC endpoints. A background monitor
//! keeps per-endpoint health fresh, a priority selector picks the endpoint to
//! use, and a retrying executor transparently fails over when the selected
//! endpoint misbehaves.

pub mod config;
pub mod error;
pub mod gateway;
pub mod monitoring;
pub mod providers;

pub use crate::config::{EndpointConfig, GatewayConfig, MutationRetryMode};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use monitoring::{ClientMetrics, HealthMonitor, MonitorHandle, ProbeSummary};
pub use providers::{
    Connector, EndpointRegistry, EndpointSnapshot, EndpointStatus, HttpConnector,
    MultiRpcClient, ResilientExecutor, RetryPolicy,
};

/// Current version of the gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gateway identifier
pub const SYSTEM_NAME: &str = "marketplace-rpc-gateway";
