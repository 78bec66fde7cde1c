//! Network reachability reporting.
//!
//! A [`ConnectivityMonitor`] answers "can we reach the news service right
//! now?" and hands out [`Subscription`]s: long-lived, distinct-until-changed
//! streams of [`Status`] values backed by a spawned task. Dropping or
//! [unsubscribing](Subscription::unsubscribe) a subscription stops its task.
//!
//! - [`ProbeMonitor`] - periodic TCP connect probe against the API host
//! - [`ManualMonitor`] - status set by hand (the `--offline` flag, tests)
//! - [`Banner`] - online/offline banner state driven by status changes

mod banner;
mod probe;

use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub use banner::{Banner, BannerMessage, BANNER_HIDE_DELAY};
pub use probe::{ProbeMonitor, ProbeTracker, DEFAULT_PROBE_ADDRESS, DEFAULT_PROBE_INTERVAL};

/// Buffered status updates per subscription
const SUBSCRIPTION_BUFFER: usize = 16;

/// Reachability of the network path to the news service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Available,
    Unavailable,
    /// Still connected but failing; treated as reachable
    Losing,
    Lost,
}

impl Status {
    /// Whether remote calls should be attempted.
    pub fn is_reachable(self) -> bool {
        matches!(self, Status::Available | Status::Losing)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Available => "available",
            Status::Unavailable => "unavailable",
            Status::Losing => "losing",
            Status::Lost => "lost",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait ConnectivityMonitor: Send + Sync {
    /// Status as of now. May perform a probe.
    async fn current_status(&self) -> Status;

    /// Start observing status changes. The first item is the status at
    /// subscription time.
    ///
    /// Spawns a task, so this must be called inside a tokio runtime.
    fn subscribe(&self) -> Subscription;
}

/// A live stream of status changes.
///
/// Consecutive duplicates are never yielded. The backing task is stopped
/// by [`unsubscribe`](Self::unsubscribe) or aborted on drop.
pub struct Subscription {
    rx: mpsc::Receiver<Status>,
    last: Option<Status>,
    cancel_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(
        rx: mpsc::Receiver<Status>,
        cancel_tx: oneshot::Sender<()>,
        join: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            last: None,
            cancel_tx: Some(cancel_tx),
            join: Some(join),
        }
    }

    /// Next distinct status, or `None` once the monitor has stopped.
    pub async fn next(&mut self) -> Option<Status> {
        futures::StreamExt::next(self).await
    }

    /// Stop the backing task and wait for it to finish.
    pub async fn unsubscribe(mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                tracing::debug!(error = %e, "Connectivity task ended abnormally");
            }
        }
        tracing::debug!("Connectivity subscription closed");
    }
}

impl Stream for Subscription {
    type Item = Status;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Status>> {
        loop {
            match ready!(self.rx.poll_recv(cx)) {
                Some(status) if self.last == Some(status) => continue,
                Some(status) => {
                    self.last = Some(status);
                    return Poll::Ready(Some(status));
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("last", &self.last)
            .field("active", &self.join.is_some())
            .finish()
    }
}

/// Monitor whose status is set explicitly.
#[derive(Debug)]
pub struct ManualMonitor {
    tx: watch::Sender<Status>,
}

impl ManualMonitor {
    pub fn new(initial: Status) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Change the status; subscribers are only woken when it differs.
    pub fn set(&self, status: Status) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

#[async_trait]
impl ConnectivityMonitor for ManualMonitor {
    async fn current_status(&self) -> Status {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> Subscription {
        let mut watch_rx = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        let join = tokio::spawn(async move {
            let initial = *watch_rx.borrow_and_update();
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    changed = watch_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = *watch_rx.borrow_and_update();
                        if tx.send(status).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Subscription::new(rx, cancel_tx, join)
    }
}
