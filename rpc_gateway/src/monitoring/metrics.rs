//! Request metrics for the resilient executor

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Smoothing factor for the response time moving average
const RESPONSE_TIME_ALPHA: f64 = 0.1;

/// Per-endpoint attempt counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointUsage {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Client performance metrics
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetrics {
    /// Attempts made, across all endpoints
    pub total_requests: u64,

    /// Attempts that returned a value
    pub successful_requests: u64,

    /// Attempts that returned an error
    pub failed_requests: u64,

    /// Operations that succeeded after at least one failed attempt
    pub failovers: u64,

    /// Operations that ended in `ExhaustedRetries`
    pub exhausted: u64,

    /// Average response time of successful attempts in milliseconds
    pub avg_response_time_ms: f64,

    /// Last attempt timestamp
    #[serde(skip)]
    pub last_request: Option<Instant>,

    /// Usage distribution by endpoint name
    pub endpoint_usage: HashMap<String, EndpointUsage>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            failovers: 0,
            exhausted: 0,
            avg_response_time_ms: 0.0,
            last_request: None,
            endpoint_usage: HashMap::new(),
        }
    }

    /// Record a successful attempt
    pub fn record_success(&mut self, endpoint: &str, response_time: Duration, attempt: u32) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_request = Some(Instant::now());

        let response_time_ms = response_time.as_secs_f64() * 1000.0;
        self.avg_response_time_ms = if self.successful_requests == 1 {
            response_time_ms
        } else {
            RESPONSE_TIME_ALPHA * response_time_ms
                + (1.0 - RESPONSE_TIME_ALPHA) * self.avg_response_time_ms
        };

        if attempt > 1 {
            self.failovers += 1;
        }

        let usage = self.endpoint_usage.entry(endpoint.to_string()).or_default();
        usage.attempts += 1;
        usage.successes += 1;
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, endpoint: &str) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_request = Some(Instant::now());

        let usage = self.endpoint_usage.entry(endpoint.to_string()).or_default();
        usage.attempts += 1;
        usage.failures += 1;
    }

    pub fn record_exhausted(&mut self) {
        self.exhausted += 1;
    }

    /// Get success rate
    pub fn success_rate(&self) -> f64 {
        if self.total_requests > 0 {
            self.successful_requests as f64 / self.total_requests as f64
        } else {
            1.0
        }
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}
