use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use shared::{domain::TrackingCode, view::TrackingView};
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::{ChangeStream, TrackingError, TrackingSource};

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingState {
    Loading,
    Ready(Box<TrackingView>),
    Failed(TrackingFailure),
}

impl TrackingState {
    pub fn view(&self) -> Option<&TrackingView> {
        match self {
            TrackingState::Ready(view) => Some(view.as_ref()),
            _ => None,
        }
    }
}

/// Blocking failures shown in place of the tracking view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingFailure {
    NotFound(String),
    Backend(String),
}

impl From<TrackingError> for TrackingFailure {
    fn from(value: TrackingError) -> Self {
        match value {
            TrackingError::NotFound(message) => TrackingFailure::NotFound(message),
            TrackingError::Backend(message) | TrackingError::Subscription(message) => {
                TrackingFailure::Backend(message)
            }
        }
    }
}

/// A live tracking view for one shipment. The background task and its
/// subscription live exactly as long as this value.
pub struct TrackingWatch {
    code: TrackingCode,
    state: watch::Receiver<TrackingState>,
    task: JoinHandle<()>,
}

impl TrackingWatch {
    pub fn code(&self) -> &TrackingCode {
        &self.code
    }

    pub fn current(&self) -> TrackingState {
        self.state.borrow().clone()
    }

    /// Waits for the next state. Returns `None` once the watch has stopped and
    /// every published state has been observed.
    pub async fn changed(&mut self) -> Option<TrackingState> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Current state followed by every later one.
    pub fn updates(&self) -> WatchStream<TrackingState> {
        WatchStream::new(self.state.clone())
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for TrackingWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscribes to changes for `code`, then performs the initial fetch. Every
/// notification for the shipment triggers a full re-fetch and re-derivation.
pub fn watch_shipment(source: Arc<dyn TrackingSource>, code: TrackingCode) -> TrackingWatch {
    let (tx, rx) = watch::channel(TrackingState::Loading);
    let task = tokio::spawn(run_watch(source, code.clone(), tx));
    TrackingWatch {
        code,
        state: rx,
        task,
    }
}

async fn run_watch(
    source: Arc<dyn TrackingSource>,
    code: TrackingCode,
    tx: watch::Sender<TrackingState>,
) {
    // Subscribing before the first fetch means a write landing in between is
    // still seen as a notification.
    let changes = match source.subscribe(&code).await {
        Ok(changes) => Some(changes),
        Err(error) => {
            warn!(tracking_code = %code, %error, "live updates unavailable");
            None
        }
    };

    if !refresh(source.as_ref(), &code, &tx).await {
        return;
    }
    let Some(mut changes) = changes else {
        return;
    };

    while let Some(item) = changes.next().await {
        match item {
            Ok(event) if event.concerns(&code) => {
                let backlog = drain_pending(&mut changes);
                if !refresh(source.as_ref(), &code, &tx).await {
                    return;
                }
                match backlog {
                    Backlog::Drained => {}
                    Backlog::Closed => break,
                    Backlog::Failed(error) => {
                        warn!(tracking_code = %code, %error, "change subscription ended");
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(error) => {
                warn!(tracking_code = %code, %error, "change subscription ended");
                return;
            }
        }
    }
    info!(tracking_code = %code, "change subscription closed");
}

enum Backlog {
    Drained,
    Closed,
    Failed(TrackingError),
}

/// Notifications already buffered collapse into the refresh about to run.
/// Stops at the first error or end of stream so the caller can act on it.
fn drain_pending(changes: &mut ChangeStream) -> Backlog {
    loop {
        match changes.next().now_or_never() {
            Some(Some(Ok(_))) => continue,
            Some(Some(Err(error))) => return Backlog::Failed(error),
            Some(None) => return Backlog::Closed,
            None => return Backlog::Drained,
        }
    }
}

async fn refresh(
    source: &dyn TrackingSource,
    code: &TrackingCode,
    tx: &watch::Sender<TrackingState>,
) -> bool {
    let next = match source.fetch(code).await {
        Ok(snapshot) => TrackingState::Ready(Box::new(TrackingView::derive(snapshot))),
        Err(error) => {
            warn!(tracking_code = %code, %error, "tracking fetch failed");
            TrackingState::Failed(error.into())
        }
    };
    let keep_going = matches!(next, TrackingState::Ready(_));
    tx.send_replace(next);
    keep_going
}

#[cfg(test)]
#[path = "tests/watch_tests.rs"]
mod tests;
