//! Notification sinks for endpoints that went down.
//!
//! The monitor only decides *whether* an alert may be sent; delivering it is
//! the job of a [`NotificationSink`]. Alerts reach the sink through a single
//! dispatcher task so a slow sink never stalls a check. Each delivery is
//! bounded by [`DELIVERY_TIMEOUT`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::status::Endpoint;

/// Longest a single [`NotificationSink::notify`] call may take.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// An endpoint is down and alerting is currently allowed.
#[derive(Debug, Clone)]
pub struct Alert {
    pub endpoint: Arc<Endpoint>,
    pub error: String,
    /// 1 for the first alert of an outage, increasing with each re-alert.
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Sink that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        tracing::warn!(
            "ALERT {} is down: {} (alert #{})",
            alert.endpoint,
            alert.error,
            alert.attempt
        );
        Ok(())
    }
}

/// Spawn the dispatcher that forwards alerts from `rx` to `sink`.
///
/// The task ends once every sender is dropped and the queue is drained.
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<Alert>,
    sink: Arc<dyn NotificationSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            match tokio::time::timeout(DELIVERY_TIMEOUT, sink.notify(&alert)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Failed to deliver alert for {}: {}", alert.endpoint, e);
                }
                Err(_) => {
                    tracing::error!(
                        "Alert for {} not delivered within {:?}",
                        alert.endpoint,
                        DELIVERY_TIMEOUT
                    );
                }
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every alert it receives.
    #[derive(Default)]
    pub struct RecordingSink {
        pub alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    /// Sink that never finishes a delivery. Counts the deliveries started.
    #[derive(Default)]
    pub struct HungSink {
        pub started: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for HungSink {
        async fn notify(&self, _alert: &Alert) -> Result<(), NotifyError> {
            self.started.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::future::pending().await
        }
    }
}
