//! Status model types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Protocol;
use crate::probe::ProbeTarget;

/// Stable endpoint identifier: the endpoint's position in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EndpointId(pub usize);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A monitored endpoint after defaulting. Immutable for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub address: String,
    pub protocol: Protocol,
    pub port: Option<u16>,
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl Endpoint {
    /// The probe request for one check of this endpoint.
    pub fn probe_target(&self) -> ProbeTarget {
        ProbeTarget {
            address: self.address.clone(),
            protocol: self.protocol,
            port: self.port,
            timeout: self.timeout,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{} ({}:{})", self.name, self.address, port),
            None => write!(f, "{} ({})", self.name, self.address),
        }
    }
}

/// One probe outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub time: DateTime<Utc>,
    pub online: bool,
    /// Round-trip time, only present when `online`.
    pub rtt: Option<Duration>,
}
