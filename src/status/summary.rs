//! Summaries derived from an observation history.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::models::Observation;

/// Share of successful checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uptime {
    /// No checks yet.
    Unknown,
    /// Successful checks over all checks, in percent.
    Percent(f64),
}

impl Uptime {
    pub fn percent(&self) -> Option<f64> {
        match self {
            Uptime::Unknown => None,
            Uptime::Percent(p) => Some(*p),
        }
    }
}

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uptime::Unknown => f.write_str("unknown"),
            Uptime::Percent(p) => write!(f, "{:.2}", p),
        }
    }
}

/// Outcome and age of the most recent check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LastStatus {
    NotYetChecked,
    Checked { online: bool, age: Duration },
}

impl fmt::Display for LastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastStatus::NotYetChecked => f.write_str("Not yet checked"),
            LastStatus::Checked { online, age } => {
                let status = if *online { "OK" } else { "ERR" };
                write!(f, "{}, {} seconds ago", status, age.as_secs())
            }
        }
    }
}

/// Latency of the most recent check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LastRtt {
    NotYetChecked,
    NoReply,
    Rtt(Duration),
}

impl fmt::Display for LastRtt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastRtt::NotYetChecked => f.write_str("Not yet checked"),
            LastRtt::NoReply => f.write_str("no reply"),
            LastRtt::Rtt(rtt) => write!(f, "{:.1}ms", rtt.as_secs_f64() * 1000.0),
        }
    }
}

pub fn uptime(observations: &[Observation]) -> Uptime {
    if observations.is_empty() {
        return Uptime::Unknown;
    }

    let online = observations.iter().filter(|o| o.online).count();
    Uptime::Percent(online as f64 / observations.len() as f64 * 100.0)
}

pub fn last_status(observations: &[Observation], now: DateTime<Utc>) -> LastStatus {
    match observations.last() {
        None => LastStatus::NotYetChecked,
        Some(last) => LastStatus::Checked {
            online: last.online,
            age: (now - last.time).to_std().unwrap_or_default(),
        },
    }
}

pub fn last_rtt(observations: &[Observation]) -> LastRtt {
    match observations.last() {
        None => LastRtt::NotYetChecked,
        Some(Observation { rtt: Some(rtt), .. }) => LastRtt::Rtt(*rtt),
        Some(_) => LastRtt::NoReply,
    }
}
