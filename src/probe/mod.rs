//! Probe module for reachability checks.
//!
//! Supports ICMP echo and TCP connect probes. Each probe is a single attempt;
//! retrying is left to the next scheduled check.

mod ping;
mod tcp;

pub use ping::*;
pub use tcp::*;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Protocol;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("probe worker failed: {0}")]
    Worker(String),
}

/// What to probe and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub address: String,
    pub protocol: Protocol,
    pub port: Option<u16>,
    pub timeout: Duration,
}

impl ProbeTarget {
    pub fn icmp(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            protocol: Protocol::Icmp,
            port: None,
            timeout,
        }
    }

    pub fn tcp(address: &str, port: u16, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            protocol: Protocol::Tcp,
            port: Some(port),
            timeout,
        }
    }
}

/// Something that can run one probe and report its round-trip time.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> Result<Duration, ProbeError>;
}

/// Prober backed by real network I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetProber;

#[async_trait]
impl Prober for NetProber {
    async fn probe(&self, target: &ProbeTarget) -> Result<Duration, ProbeError> {
        // Add jitter to avoid thundering herd
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let result = match target.protocol {
            Protocol::Icmp => run_ping_probe(&target.address, target.timeout).await,
            Protocol::Tcp => {
                let port = target.port.ok_or_else(|| {
                    ProbeError::Config(format!("tcp probe for {} has no port", target.address))
                })?;
                run_tcp_probe(&target.address, port, target.timeout).await
            }
        };

        // Enforce timeout check
        match result {
            Ok(rtt) if rtt >= target.timeout => Err(ProbeError::Timeout(target.timeout)),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_target_without_port_is_config_error() {
        let target = ProbeTarget {
            port: None,
            ..ProbeTarget::tcp("127.0.0.1", 1, Duration::from_millis(100))
        };
        let err = NetProber.probe(&target).await.unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }

    #[test]
    fn test_target_constructors() {
        let t = ProbeTarget::icmp("8.8.8.8", Duration::from_secs(2));
        assert_eq!(t.protocol, Protocol::Icmp);
        assert_eq!(t.port, None);

        let t = ProbeTarget::tcp("example.com", 443, Duration::from_secs(2));
        assert_eq!(t.protocol, Protocol::Tcp);
        assert_eq!(t.port, Some(443));
    }
}
