//! Thread-safe observation store.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::*;
use super::summary::{last_rtt, last_status, uptime, LastRtt, LastStatus, Uptime};

/// Status store error types.
#[derive(Error, Debug, PartialEq)]
pub enum StatusError {
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(EndpointId),
}

/// Observation history per endpoint.
///
/// Every endpoint passed to [`StatusStore::new`] has an entry from the start
/// and keeps it; appending is the only mutation.
pub struct StatusStore {
    endpoints: Vec<Arc<Endpoint>>,
    series: RwLock<HashMap<EndpointId, Vec<Observation>>>,
}

impl StatusStore {
    pub fn new(endpoints: &[Arc<Endpoint>]) -> Self {
        let series = endpoints
            .iter()
            .map(|e| (e.id, Vec::with_capacity(100)))
            .collect();

        Self {
            endpoints: endpoints.to_vec(),
            series: RwLock::new(series),
        }
    }

    /// Append one observation for `id`. The round-trip time is dropped for
    /// failed checks.
    pub fn record(
        &self,
        id: EndpointId,
        time: DateTime<Utc>,
        online: bool,
        rtt: Option<Duration>,
    ) -> Result<(), StatusError> {
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        let history = series.get_mut(&id).ok_or(StatusError::UnknownEndpoint(id))?;

        history.push(Observation {
            time,
            online,
            rtt: rtt.filter(|_| online),
        });
        Ok(())
    }

    /// Copy of the whole store, in configuration order.
    pub fn snapshot(&self) -> StatusSnapshot {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);

        let entries = self
            .endpoints
            .iter()
            .map(|endpoint| EndpointStatus {
                endpoint: endpoint.clone(),
                observations: series.get(&endpoint.id).cloned().unwrap_or_default(),
            })
            .collect();

        StatusSnapshot {
            taken_at: Utc::now(),
            entries,
        }
    }

    /// Copy of one endpoint's history.
    pub fn history(&self, id: EndpointId) -> Option<Vec<Observation>> {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        series.get(&id).cloned()
    }

    /// Number of observations across all endpoints.
    pub fn total_observations(&self) -> usize {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        series.values().map(Vec::len).sum()
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }
}

/// Point-in-time copy of the store.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<EndpointStatus>,
}

/// History of a single endpoint inside a snapshot.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub endpoint: Arc<Endpoint>,
    pub observations: Vec<Observation>,
}

impl EndpointStatus {
    pub fn uptime(&self) -> Uptime {
        uptime(&self.observations)
    }

    pub fn last_status(&self, now: DateTime<Utc>) -> LastStatus {
        last_status(&self.observations, now)
    }

    pub fn last_rtt(&self) -> LastRtt {
        last_rtt(&self.observations)
    }

    pub fn checks(&self) -> usize {
        self.observations.len()
    }
}
