//! Endpoint registry with per-endpoint health state
//!
//! The registry owns the ordered endpoint list. Ordering is fixed when the
//! list is built: ascending priority, ties kept in configuration order. The
//! only runtime mutations are [`EndpointRegistry::mark_healthy`],
//! [`EndpointRegistry::mark_unhealthy`] and whole-list replacement.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::EndpointConfig;
use crate::{GatewayError, Result};

/// Endpoint health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointStatus::Healthy => write!(f, "healthy"),
            EndpointStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone)]
struct HealthState {
    status: EndpointStatus,
    last_checked_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

/// One configured endpoint plus its live health
#[derive(Debug)]
pub struct EndpointDescriptor {
    name: String,
    url: String,
    priority: u32,
    max_retries: u32,
    timeout: Duration,
    /// Index in the original configuration list
    position: usize,
    health: RwLock<HealthState>,
}

impl EndpointDescriptor {
    fn from_config(config: &EndpointConfig, position: usize) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            priority: config.priority,
            max_retries: config.max_retries,
            timeout: config.timeout(),
            position,
            health: RwLock::new(HealthState {
                status: EndpointStatus::Healthy,
                last_checked_at: None,
                consecutive_failures: 0,
                last_error: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn status(&self) -> EndpointStatus {
        self.health.read().status
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == EndpointStatus::Healthy
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.health.read().last_checked_at
    }

    /// Point-in-time copy of this endpoint
    pub fn snapshot(&self) -> EndpointSnapshot {
        let health = self.health.read().clone();
        EndpointSnapshot {
            name: self.name.clone(),
            url: self.url.clone(),
            priority: self.priority,
            position: self.position,
            max_retries: self.max_retries,
            timeout_ms: self.timeout.as_millis() as u64,
            status: health.status,
            last_checked_at: health.last_checked_at,
            consecutive_failures: health.consecutive_failures,
            last_error: health.last_error,
        }
    }

    /// Returns true when the status changed
    fn set_status(&self, status: EndpointStatus, error: Option<&str>) -> bool {
        let mut health = self.health.write();
        let changed = health.status != status;
        health.status = status;
        health.last_checked_at = Some(Utc::now());
        match error {
            Some(error) => {
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.last_error = Some(error.to_string());
            }
            None => {
                health.consecutive_failures = 0;
            }
        }
        changed
    }
}

/// Serializable copy of an endpoint's configuration and health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub url: String,
    pub priority: u32,
    pub position: usize,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub status: EndpointStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl EndpointSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == EndpointStatus::Healthy
    }
}

/// Ordered endpoint list with synchronized health mutators
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: RwLock<Arc<Vec<Arc<EndpointDescriptor>>>>,
    transitions: AtomicU64,
}

impl EndpointRegistry {
    /// Build a registry from the enabled entries of `configs`
    pub fn new(configs: &[EndpointConfig]) -> Result<Self> {
        Ok(Self {
            endpoints: RwLock::new(Arc::new(Self::build(configs)?)),
            transitions: AtomicU64::new(0),
        })
    }

    fn build(configs: &[EndpointConfig]) -> Result<Vec<Arc<EndpointDescriptor>>> {
        let mut names = HashSet::new();
        let mut endpoints = Vec::with_capacity(configs.len());

        for (position, config) in configs.iter().enumerate().filter(|(_, c)| c.enabled) {
            if !names.insert(config.name.as_str()) {
                return Err(GatewayError::configuration(format!(
                    "duplicate endpoint name: {}",
                    config.name
                )));
            }
            endpoints.push(Arc::new(EndpointDescriptor::from_config(config, position)));
        }

        if endpoints.is_empty() {
            return Err(GatewayError::configuration("no endpoints configured"));
        }

        // stable: equal priorities keep configuration order
        endpoints.sort_by_key(|e| e.priority);
        Ok(endpoints)
    }

    /// Snapshot of every endpoint in preference order
    pub fn list(&self) -> Vec<EndpointSnapshot> {
        self.descriptors().iter().map(|e| e.snapshot()).collect()
    }

    /// Shared handle to the current descriptor list
    pub fn descriptors(&self) -> Arc<Vec<Arc<EndpointDescriptor>>> {
        Arc::clone(&self.endpoints.read())
    }

    pub fn get(&self, name: &str) -> Option<Arc<EndpointDescriptor>> {
        self.endpoints.read().iter().find(|e| e.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.endpoints.read().iter().filter(|e| e.is_healthy()).count()
    }

    /// Mark an endpoint healthy; returns true if it was unhealthy before
    pub fn mark_healthy(&self, name: &str) -> bool {
        self.update(name, EndpointStatus::Healthy, None)
    }

    /// Mark an endpoint unhealthy; returns true if it was healthy before
    pub fn mark_unhealthy(&self, name: &str, reason: &str) -> bool {
        self.update(name, EndpointStatus::Unhealthy, Some(reason))
    }

    fn update(&self, name: &str, status: EndpointStatus, error: Option<&str>) -> bool {
        let endpoint = match self.get(name) {
            Some(endpoint) => endpoint,
            None => {
                warn!(endpoint = name, "Health update for unknown endpoint ignored");
                return false;
            }
        };

        let changed = endpoint.set_status(status, error);
        if changed {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            match status {
                EndpointStatus::Healthy => {
                    info!(endpoint = name, "Endpoint status changed to healthy")
                }
                EndpointStatus::Unhealthy => warn!(
                    endpoint = name,
                    reason = error.unwrap_or_default(),
                    "Endpoint status changed to unhealthy"
                ),
            }
        }
        changed
    }

    /// Number of healthy/unhealthy transitions since construction
    pub fn transition_count(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Swap in a whole new endpoint list; health starts over as healthy
    pub fn replace(&self, configs: &[EndpointConfig]) -> Result<()> {
        let endpoints = Self::build(configs)?;
        let count = endpoints.len();
        *self.endpoints.write() = Arc::new(endpoints);
        info!(endpoint_count = count, "Endpoint registry replaced");
        Ok(())
    }
}
