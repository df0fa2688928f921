//! Notification fan-out: an immediate local notice plus a durable remote row.
//!
//! ```text
//! notify() ──► broadcast (local, never blocks)
//!          └─► outbound queue ──► worker ──► RemoteStore::insert_notification
//!                                  (bounded exponential retry, then drop)
//! ```
//!
//! A dropped notification is only logged. The condition that produced it
//! already fired edge-triggered and is not evaluated again.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tripwatch_env::{NotificationRow, RemoteStore, TripContext, TripId};
use uuid::Uuid;

use crate::retry::{retry_remote, RetryPolicy};

/// Notification category; also the `type` column of the remote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    TripAlert,
    InspectionRequired,
    Arrival,
    Delay,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::TripAlert => "trip_alert",
            NotificationCategory::InspectionRequired => "inspection_required",
            NotificationCategory::Arrival => "arrival",
            NotificationCategory::Delay => "delay",
        }
    }
}

impl std::fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who the notice is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Driver,
    FleetOperator,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Driver => "driver",
            Audience::FleetOperator => "fleet_operator",
        }
    }
}

/// A notification as created by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub trip_id: Option<TripId>,
    pub message: String,
    pub category: NotificationCategory,
    pub audience: Audience,
    /// Unix milliseconds
    pub created_at: i64,
    pub is_read: bool,
}

impl NotificationRecord {
    pub fn to_row(&self) -> NotificationRow {
        NotificationRow {
            id: self.id,
            message: self.message.clone(),
            kind: self.category.as_str().to_string(),
            audience: self.audience.as_str().to_string(),
            created_at: self.created_at,
            is_read: self.is_read,
        }
    }
}

/// Outbound alert event for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub category: NotificationCategory,
    pub audience: Audience,
    pub trip_id: Option<TripId>,
    pub message: String,
    /// Unix milliseconds
    pub timestamp_ms: i64,
}

/// Counters for the remote side of the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub persisted: AtomicU64,
    pub dropped: AtomicU64,
}

enum Outbound {
    Record(NotificationRecord),
    Flush(oneshot::Sender<()>),
}

/// Translates engine alerts into local notices and remote rows.
pub struct NotificationDispatcher<Ctx: TripContext> {
    ctx: Arc<Ctx>,
    local: broadcast::Sender<AlertEvent>,
    outbound: mpsc::Sender<Outbound>,
    stats: Arc<DispatchStats>,
}

impl<Ctx: TripContext> NotificationDispatcher<Ctx> {
    /// Creates the dispatcher and spawns its remote worker on the context.
    pub fn new<S: RemoteStore>(
        ctx: Arc<Ctx>,
        store: Arc<S>,
        retry: RetryPolicy,
        queue_capacity: usize,
        broadcast_capacity: usize,
    ) -> Self {
        let (local, _) = broadcast::channel(broadcast_capacity);
        let (outbound, rx) = mpsc::channel(queue_capacity);
        let stats = Arc::new(DispatchStats::default());

        ctx.spawn(
            "notification-outbound",
            run_outbound(Arc::clone(&ctx), store, retry, rx, Arc::clone(&stats)),
        );

        Self {
            ctx,
            local,
            outbound,
            stats,
        }
    }

    /// Delivers locally right away and queues the remote write.
    ///
    /// Never waits: a full outbound queue drops the remote row.
    pub fn notify(
        &self,
        trip_id: Option<TripId>,
        category: NotificationCategory,
        audience: Audience,
        message: impl Into<String>,
    ) -> NotificationRecord {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            trip_id,
            message: message.into(),
            category,
            audience,
            created_at: self.ctx.unix_millis(),
            is_read: false,
        };

        tracing::info!(
            category = %record.category,
            audience = ?record.audience,
            message = %record.message,
            "Notification"
        );

        // No subscribers is fine; local delivery is best-effort
        let _ = self.local.send(AlertEvent {
            category,
            audience,
            trip_id,
            message: record.message.clone(),
            timestamp_ms: record.created_at,
        });

        if let Err(err) = self.outbound.try_send(Outbound::Record(record.clone())) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "Notification queue unavailable, remote row dropped");
        }

        record
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.local.subscribe()
    }

    /// Sender side of the local stream, for handles that subscribe later.
    pub fn alert_sender(&self) -> broadcast::Sender<AlertEvent> {
        self.local.clone()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Waits until every notification queued so far was persisted or dropped.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.outbound.send(Outbound::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_outbound<Ctx: TripContext, S: RemoteStore>(
    ctx: Arc<Ctx>,
    store: Arc<S>,
    retry: RetryPolicy,
    mut rx: mpsc::Receiver<Outbound>,
    stats: Arc<DispatchStats>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Record(record) => {
                let result = retry_remote(ctx.as_ref(), &retry, "insert_notification", || {
                    store.insert_notification(record.to_row())
                })
                .await;

                match result {
                    Ok(()) => {
                        stats.persisted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            id = %record.id,
                            category = %record.category,
                            error = %err,
                            "Dropping notification after retries"
                        );
                    }
                }
            }
            Outbound::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
