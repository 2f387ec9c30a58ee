//! Endpoint selection
//!
//! Selection is a pure function of a registry snapshot: the healthy endpoint
//! with the lowest priority wins, ties go to configuration order. With no
//! healthy endpoint the overall most-preferred endpoint is returned anyway so
//! callers still get an attempt.

use chrono::{DateTime, Utc};
use tracing::error;

use crate::providers::registry::EndpointSnapshot;

/// The endpoint currently preferred for new attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSelection {
    pub name: String,
    pub priority: u32,
    pub position: usize,
    /// True when no endpoint was healthy and this is a last-resort pick
    pub degraded: bool,
    pub selected_at: DateTime<Utc>,
}

impl ActiveSelection {
    /// Same endpoint and same degraded flag, ignoring when it was selected
    pub fn same_target(&self, other: &ActiveSelection) -> bool {
        self.name == other.name && self.degraded == other.degraded
    }
}

/// Pick the most-preferred usable endpoint, or `None` for an empty snapshot
pub fn select_endpoint(snapshot: &[EndpointSnapshot]) -> Option<ActiveSelection> {
    let preference = |e: &&EndpointSnapshot| (e.priority, e.position);

    if let Some(best) = snapshot.iter().filter(|e| e.is_healthy()).min_by_key(preference) {
        return Some(to_selection(best, false));
    }

    let fallback = snapshot.iter().min_by_key(preference)?;
    error!(
        endpoint = fallback.name.as_str(),
        endpoint_count = snapshot.len(),
        "No healthy endpoints available, falling back to highest-priority endpoint"
    );
    Some(to_selection(fallback, true))
}

fn to_selection(endpoint: &EndpointSnapshot, degraded: bool) -> ActiveSelection {
    ActiveSelection {
        name: endpoint.name.clone(),
        priority: endpoint.priority,
        position: endpoint.position,
        degraded,
        selected_at: Utc::now(),
    }
}
