//! Monitor that schedules checks for every endpoint.
//!
//! Each endpoint gets its own lane: a task with its own interval timer and its
//! own notification tracker. Lanes share the dialer (for admission control),
//! the status store and the alert queue, and nothing else.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::{Config, ConfigError, MonitorSettings, ServerEntry};
use crate::dial::Dialer;
use crate::notify::{spawn_dispatcher, Alert, NotificationSink};
use crate::probe::Prober;
use crate::status::{Endpoint, EndpointId, StatusStore};
use crate::track::{new_tracker_with_exp_backoff, TimeTracker};

/// Alerts queued for the sink; further alerts are dropped until it catches up.
const ALERT_QUEUE: usize = 64;

/// How long `run_for` waits for queued alerts after the lanes stopped.
const ALERT_DRAIN: Duration = Duration::from_secs(5);

/// Stops a running [`Monitor`]. Cloneable; stopping twice is harmless and a
/// stop issued before the monitor runs is honoured as soon as it starts.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Owns the endpoints and drives their checks.
pub struct Monitor {
    endpoints: Vec<Arc<Endpoint>>,
    backoff_secs: u64,
    dialer: Arc<Dialer>,
    store: Arc<StatusStore>,
    sink: Arc<dyn NotificationSink>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Monitor {
    /// Create a monitor for `config`, probing with `prober` and sending
    /// alerts to `sink`.
    pub fn new(
        config: Config,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let settings = &config.settings.monitor;
        let endpoints = resolve_endpoints(&config.servers, settings);
        let max_connections = usize::try_from(settings.max_connections).unwrap_or(1);
        let backoff_secs = u64::try_from(settings.exponential_backoff_seconds).unwrap_or(0);

        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            store: Arc::new(StatusStore::new(&endpoints)),
            dialer: Arc::new(Dialer::new(max_connections, prober)),
            endpoints,
            backoff_secs,
            sink,
            stop_tx: Arc::new(stop_tx),
        })
    }

    /// Shared status store, for readers such as the web server.
    pub fn status(&self) -> Arc<StatusStore> {
        self.store.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }

    /// Run until stopped.
    pub async fn run(&self) {
        self.run_for(None).await
    }

    /// Run until stopped or until `duration` has elapsed. `None` or a zero
    /// duration runs until stopped.
    ///
    /// Returns once every lane has finished its current check and the queued
    /// alerts were handed to the sink, waiting at most [`ALERT_DRAIN`] for
    /// the latter.
    pub async fn run_for(&self, duration: Option<Duration>) {
        let timer = duration.filter(|d| !d.is_zero()).map(|d| {
            let stop = self.stop_handle();
            tokio::spawn(async move {
                tokio::time::sleep(d).await;
                tracing::info!("Run duration of {}s elapsed", d.as_secs_f64());
                stop.stop();
            })
        });

        let (alert_tx, alert_rx) = mpsc::channel(ALERT_QUEUE);
        let mut dispatcher = spawn_dispatcher(alert_rx, self.sink.clone());

        let mut lanes = JoinSet::new();
        for endpoint in &self.endpoints {
            let lane = Lane {
                endpoint: endpoint.clone(),
                dialer: self.dialer.clone(),
                store: self.store.clone(),
                alerts: alert_tx.clone(),
                backoff_secs: self.backoff_secs,
                tracker: new_tracker_with_exp_backoff(self.backoff_secs),
            };
            lanes.spawn(lane.run(self.stop_tx.subscribe()));
        }
        drop(alert_tx);

        tracing::info!(
            "Starting monitor. {} endpoints, {} concurrent probes",
            self.endpoints.len(),
            self.dialer.capacity()
        );

        let mut stop_rx = self.stop_tx.subscribe();
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
        tracing::info!("Terminating. {} probes in flight", self.dialer.in_flight());

        while let Some(result) = lanes.join_next().await {
            if let Err(e) = result {
                tracing::error!("Monitor lane failed: {}", e);
            }
        }
        match tokio::time::timeout(ALERT_DRAIN, &mut dispatcher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Alert dispatcher failed: {}", e),
            Err(_) => {
                tracing::warn!("Alert sink did not drain within {:?}, abandoning queued alerts", ALERT_DRAIN);
                dispatcher.abort();
            }
        }
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}

/// Defaulting pass: endpoints without their own interval or timeout inherit
/// the global one. The two settings are defaulted independently; zero counts
/// as unset.
pub fn resolve_endpoints(servers: &[ServerEntry], settings: &MonitorSettings) -> Vec<Arc<Endpoint>> {
    let default_interval = positive_secs(settings.check_interval);
    let default_timeout = positive_secs(settings.timeout);

    servers
        .iter()
        .enumerate()
        .map(|(index, server)| {
            let check_interval = server.check_interval.filter(|&s| s > 0).unwrap_or(default_interval);
            let timeout = server.timeout.filter(|&s| s > 0).unwrap_or(default_timeout);

            Arc::new(Endpoint {
                id: EndpointId(index),
                name: server.name.clone(),
                address: server.ip_address.trim().to_string(),
                protocol: server.protocol,
                port: server.port,
                check_interval: Duration::from_secs(check_interval),
                timeout: Duration::from_secs(timeout),
            })
        })
        .collect()
}

fn positive_secs(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0).max(1)
}

/// Schedule of a single endpoint.
struct Lane {
    endpoint: Arc<Endpoint>,
    dialer: Arc<Dialer>,
    store: Arc<StatusStore>,
    alerts: mpsc::Sender<Alert>,
    backoff_secs: u64,
    tracker: TimeTracker,
}

impl Lane {
    async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        // First tick completes immediately
        let mut interval = tokio::time::interval(self.endpoint.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                // The borrowed value is not Send; drop it before any await
                _ = async { let _ = stop_rx.wait_for(|stopped| *stopped).await; } => break,
                _ = interval.tick() => self.check().await,
            }
        }
    }

    /// One check: probe, record, then gate a notification or reset the
    /// tracker. Runs to completion even when a stop arrives meanwhile.
    async fn check(&mut self) {
        let endpoint = &self.endpoint;
        tracing::info!("Checking {}", endpoint);

        let result = self.dialer.submit(endpoint.probe_target()).await;

        let rtt = result.as_ref().ok().copied();
        if let Err(e) = self.store.record(endpoint.id, Utc::now(), rtt.is_some(), rtt) {
            tracing::error!("Failed to record status for {}: {}", endpoint, e);
        }

        match result {
            Ok(rtt) => {
                tracing::info!("OK {} in {:.1}ms", endpoint, rtt.as_secs_f64() * 1000.0);
                if self.tracker.has_been_run() {
                    tracing::info!("{} recovered, notification backoff reset", endpoint);
                    self.tracker = new_tracker_with_exp_backoff(self.backoff_secs);
                }
            }
            Err(e) => {
                tracing::error!("ERROR {}: {}", endpoint, e);
                if !self.tracker.is_ready() {
                    tracing::debug!("Notification for {} suppressed by backoff", endpoint);
                    return;
                }

                let alert = Alert {
                    endpoint: endpoint.clone(),
                    error: e.to_string(),
                    attempt: self.tracker.attempts(),
                    at: Utc::now(),
                };
                // Never wait on the sink; the observation is already recorded
                match self.alerts.try_send(alert) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!("Alert queue full, dropping alert for {}", endpoint);
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::error!("Alert dispatcher is gone, dropping alert for {}", endpoint);
                    }
                }
            }
        }
    }
}
