//! Change-feed dispatcher: storage events in, engine writes and
//! staleness notifications out.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aid_core::{AreaId, DonationId, NgoId, SupplyCategory, Viewport};
use aid_match::Cancellation;
use aid_store::retry::{fetch_with_retry, RequestContext, RetryPolicy};
use aid_store::{ChangeEvent, ChangeKind, ChangeType, EntitySource};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::change::{EntityChange, Impact};
use crate::{Engine, EngineError};

/// What a subscriber should refresh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Heatmaps overlapping `region` may have changed. `None` categories
    /// means every category, including the unfiltered map. A list names
    /// the filtered maps on top of the unfiltered one; empty means only
    /// the unfiltered map.
    HeatmapStale {
        region: Viewport,
        categories: Option<Vec<SupplyCategory>>,
    },
    /// Recommendations for these areas may have changed.
    MatchesStale { area_ids: BTreeSet<AreaId> },
}

impl Notification {
    /// Notifications describing one applied change.
    pub fn from_impact(impact: &Impact) -> Vec<Notification> {
        let mut out: Vec<Notification> = impact
            .regions
            .iter()
            .map(|r| Notification::HeatmapStale {
                region: r.region,
                categories: r.categories.clone(),
            })
            .collect();
        if !impact.area_ids.is_empty() {
            out.push(Notification::MatchesStale {
                area_ids: impact.area_ids.clone(),
            });
        }
        out
    }
}

/// Push-style receiver of notifications, e.g. a websocket fan-out.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Totals since the dispatcher was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub processed: u64,
    pub failed: u64,
    pub notifications: u64,
}

/// Applies storage change events to an [`Engine`] and fans out
/// [`Notification`]s to channel subscribers and sinks.
pub struct ChangeFeedDispatcher {
    engine: Arc<Engine>,
    source: Arc<dyn EntitySource>,
    retry: RetryPolicy,
    subscribers: Mutex<Vec<Sender<Notification>>>,
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
    processed: AtomicU64,
    failed: AtomicU64,
    notifications: AtomicU64,
}

impl fmt::Debug for ChangeFeedDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeedDispatcher")
            .field("retry", &self.retry)
            .field("subscribers", &self.subscribers.lock().len())
            .field("sinks", &self.sinks.read().len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl ChangeFeedDispatcher {
    pub fn new(engine: Arc<Engine>, source: Arc<dyn EntitySource>) -> Self {
        Self {
            engine,
            source,
            retry: RetryPolicy::default(),
            subscribers: Mutex::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
        }
    }

    /// Retry policy for entity fetches; the default backs off exponentially.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// New unbounded notification channel. Dropped receivers are pruned on
    /// the next publish.
    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.sinks.write().push(sink);
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }

    /// Turn an event into an engine change by reading the entity's current
    /// state, retrying transient source failures. A Created/Updated entity
    /// the source no longer has is removed.
    fn resolve(&self, event: &ChangeEvent) -> Result<EntityChange, EngineError> {
        let deleted = event.change == ChangeType::Deleted;
        let ctx = RequestContext::new(event.to_string()).with_retry(self.retry.clone());
        let change = match event.kind {
            ChangeKind::CrisisArea => {
                let id = AreaId(event.id.clone());
                let current = if deleted {
                    None
                } else {
                    fetch_with_retry(&ctx, |_| self.source.get_crisis_area(&id))
                        .map_err(EngineError::Source)?
                };
                match current {
                    Some(area) => EntityChange::UpsertArea(area),
                    None => EntityChange::RemoveArea(id),
                }
            }
            ChangeKind::Ngo => {
                let id = NgoId(event.id.clone());
                let current = if deleted {
                    None
                } else {
                    fetch_with_retry(&ctx, |_| self.source.get_ngo(&id))
                        .map_err(EngineError::Source)?
                };
                match current {
                    Some(ngo) => EntityChange::UpsertNgo(ngo),
                    None => EntityChange::RemoveNgo(id),
                }
            }
            ChangeKind::Donation => {
                let id = DonationId(event.id.clone());
                let current = if deleted {
                    None
                } else {
                    fetch_with_retry(&ctx, |_| self.source.get_donation(&id))
                        .map_err(EngineError::Source)?
                };
                match current {
                    Some(d) => EntityChange::UpsertDonation(d),
                    None => EntityChange::RemoveDonation(id),
                }
            }
        };
        let vanished = matches!(
            change,
            EntityChange::RemoveArea(_)
                | EntityChange::RemoveNgo(_)
                | EntityChange::RemoveDonation(_)
        );
        if vanished && !deleted {
            warn!(%event, "entity vanished from storage; removing");
        }
        Ok(change)
    }

    /// Apply one event and publish what it made stale.
    pub fn dispatch(&self, event: &ChangeEvent) -> Result<Vec<Notification>, EngineError> {
        let result = self
            .resolve(event)
            .and_then(|change| self.engine.apply(change));
        let impact = match result {
            Ok(impact) => impact,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        self.processed.fetch_add(1, Ordering::Relaxed);
        let notifications = Notification::from_impact(&impact);
        self.publish(&notifications);
        info!(%event, version = impact.version, notifications = notifications.len(), "change dispatched");
        Ok(notifications)
    }

    fn publish(&self, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }
        self.notifications
            .fetch_add(notifications.len() as u64, Ordering::Relaxed);
        {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|tx| notifications.iter().all(|n| tx.send(n.clone()).is_ok()));
        }
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            for n in notifications {
                sink.notify(n);
            }
        }
    }

    /// Consume `events` until the channel disconnects or `cancel` is set.
    /// Failed events are logged and skipped. Returns the number of events
    /// applied.
    pub fn run(&self, events: Receiver<ChangeEvent>, cancel: &Cancellation) -> u64 {
        let mut applied = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(applied, "dispatcher cancelled");
                break;
            }
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => match self.dispatch(&event) {
                    Ok(_) => applied += 1,
                    Err(e) => warn!(%event, error = %e, "change event failed"),
                },
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!(applied, "change feed closed");
                    break;
                }
            }
        }
        applied
    }
}
