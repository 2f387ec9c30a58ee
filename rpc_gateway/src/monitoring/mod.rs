//! Endpoint health monitoring and request metrics

pub mod health;
pub mod metrics;

pub use health::{HealthMonitor, MonitorHandle, ProbeResult, ProbeSummary};
pub use metrics::{ClientMetrics, EndpointUsage};
