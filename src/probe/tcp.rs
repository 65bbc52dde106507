//! TCP connect probe.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::ProbeError;

/// Open one TCP connection to `address:port` and return the connect time.
///
/// The connection is closed immediately after it is established.
pub async fn run_tcp_probe(address: &str, port: u16, timeout: Duration) -> Result<Duration, ProbeError> {
    let start = Instant::now();

    let stream = tokio::time::timeout(timeout, TcpStream::connect((address, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("failed to connect to {}:{}: {}", address, port, e)))?;

    let elapsed = start.elapsed();
    drop(stream);

    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let rtt = run_tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await.unwrap();
        assert!(rtt < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_tcp_probe_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = run_tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_unresolvable_host() {
        let result = run_tcp_probe("host.invalid", 80, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}
