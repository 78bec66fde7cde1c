use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use super::{ConnectivityMonitor, Status, Subscription, SUBSCRIPTION_BUFFER};

pub const DEFAULT_PROBE_ADDRESS: &str = "newsapi.org:443";
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Consecutive failures after which a connection that was up counts as lost
const LOST_AFTER_FAILURES: u32 = 2;

/// Turns a sequence of probe outcomes into [`Status`] transitions.
///
/// ```text
/// success              -> Available
/// failure, never up    -> Unavailable
/// first failure        -> Losing
/// second failure       -> Lost
/// ```
#[derive(Debug, Default)]
pub struct ProbeTracker {
    status: Option<Status>,
    failures: u32,
}

impl ProbeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest status, if any probe has completed
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Record a probe outcome. Returns the new status only when it changed.
    pub fn record(&mut self, reachable: bool) -> Option<Status> {
        let next = if reachable {
            self.failures = 0;
            Status::Available
        } else {
            self.failures = self.failures.saturating_add(1);
            match self.status {
                None | Some(Status::Unavailable) => Status::Unavailable,
                Some(Status::Lost) => Status::Lost,
                Some(Status::Available) | Some(Status::Losing) => {
                    if self.failures >= LOST_AFTER_FAILURES {
                        Status::Lost
                    } else {
                        Status::Losing
                    }
                }
            }
        };

        if self.status == Some(next) {
            return None;
        }
        self.status = Some(next);
        Some(next)
    }
}

/// Monitor that checks reachability by opening a TCP connection to the API
/// host at a fixed interval.
///
/// Each subscription runs its own probe loop; [`current_status`] performs a
/// one-off probe and folds it into the shared tracker.
///
/// [`current_status`]: ConnectivityMonitor::current_status
#[derive(Debug, Clone)]
pub struct ProbeMonitor {
    address: String,
    interval: Duration,
    tracker: Arc<Mutex<ProbeTracker>>,
}

impl ProbeMonitor {
    pub fn new(address: impl Into<String>, interval: Duration) -> Self {
        Self {
            address: address.into(),
            interval: interval.max(Duration::from_millis(100)),
            tracker: Arc::new(Mutex::new(ProbeTracker::new())),
        }
    }

    fn record(&self, reachable: bool) -> Status {
        let mut tracker = self
            .tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracker.record(reachable);
        tracker.status().unwrap_or(Status::Unavailable)
    }
}

impl Default for ProbeMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_ADDRESS, DEFAULT_PROBE_INTERVAL)
    }
}

async fn probe(address: &str) -> bool {
    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(address = %address, error = %e, "Connectivity probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(address = %address, "Connectivity probe timed out");
            false
        }
    }
}

#[async_trait]
impl ConnectivityMonitor for ProbeMonitor {
    async fn current_status(&self) -> Status {
        let reachable = probe(&self.address).await;
        self.record(reachable)
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let monitor = self.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Per-subscription tracker so each stream sees its own transitions
            let mut tracker = ProbeTracker::new();

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        tracing::debug!(address = %monitor.address, "Connectivity probe stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reachable = probe(&monitor.address).await;
                        monitor.record(reachable);
                        if let Some(status) = tracker.record(reachable) {
                            tracing::info!(status = %status, "Connectivity changed");
                            if tx.send(status).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        Subscription::new(rx, cancel_tx, join)
    }
}
