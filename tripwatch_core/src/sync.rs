//! Remote synchronization: ordered trip writes and snapshot reconciliation.
//!
//! Local transitions are applied first and their remote writes are queued on
//! a single writer task per session. The writer issues them strictly in
//! queue order, each with its own bounded retry, and keeps a ledger of the
//! engine-owned columns that are not confirmed yet.
//!
//! ```text
//! state machine ──enqueue──► [ writer queue ] ──► RemoteStore
//!        │                         │
//!        └──── PendingLedger ◄─────┘ (settled after each write)
//! ```
//!
//! On refresh the ledger decides who wins a disagreement: a pending column
//! keeps the local value, a settled column adopts the remote one and is
//! reported as divergence. Remote-owned columns always follow the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tripwatch_env::{
    DriverId, FieldValue, RemoteError, RemoteStore, TripContext, TripField, TripId, TripRecord,
};

use crate::error::TripError;
use crate::retry::{retry_remote, RetryPolicy};
use crate::trip::{Trip, TripStatus};

/// Columns the engine writes and is authoritative for while unconfirmed.
pub const ENGINE_FIELDS: [TripField; 5] = [
    TripField::Status,
    TripField::PreTripInspection,
    TripField::PostTripInspection,
    TripField::StartTime,
    TripField::EndTime,
];

/// Current value of an engine-owned column.
pub fn engine_value(trip: &Trip, field: TripField) -> FieldValue {
    match field {
        TripField::Status => FieldValue::Text(trip.status.as_str().to_string()),
        TripField::PreTripInspection => FieldValue::Bool(trip.pre_trip_inspection_done),
        TripField::PostTripInspection => FieldValue::Bool(trip.post_trip_inspection_done),
        TripField::StartTime => trip.started_at.map_or(FieldValue::Null, FieldValue::Millis),
        TripField::EndTime => trip.ended_at.map_or(FieldValue::Null, FieldValue::Millis),
    }
}

fn copy_engine_field(from: &Trip, to: &mut Trip, field: TripField) {
    match field {
        TripField::Status => to.status = from.status,
        TripField::PreTripInspection => to.pre_trip_inspection_done = from.pre_trip_inspection_done,
        TripField::PostTripInspection => {
            to.post_trip_inspection_done = from.post_trip_inspection_done
        }
        TripField::StartTime => to.started_at = from.started_at,
        TripField::EndTime => to.ended_at = from.ended_at,
    }
}

// =============================================================================
// Pending-write ledger
// =============================================================================

/// Engine-owned columns with queued or in-flight writes.
#[derive(Debug, Default)]
pub struct PendingLedger {
    pending: Mutex<HashMap<(TripId, TripField), u32>>,
}

impl PendingLedger {
    pub fn add(&self, trip_id: TripId, field: TripField) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending.entry((trip_id, field)).or_insert(0) += 1;
    }

    pub fn settle(&self, trip_id: TripId, field: TripField) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = pending.get_mut(&(trip_id, field)) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&(trip_id, field));
            }
        }
    }

    pub fn is_pending(&self, trip_id: TripId, field: TripField) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(trip_id, field))
    }

    /// Number of distinct unconfirmed columns.
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Writes
// =============================================================================

/// One remote write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Status {
        trip_id: TripId,
        status: TripStatus,
    },
    Field {
        trip_id: TripId,
        field: TripField,
        value: FieldValue,
    },
    Event {
        trip_id: TripId,
        message: String,
    },
}

impl WriteOp {
    pub fn trip_id(&self) -> TripId {
        match self {
            WriteOp::Status { trip_id, .. }
            | WriteOp::Field { trip_id, .. }
            | WriteOp::Event { trip_id, .. } => *trip_id,
        }
    }

    /// Ledger column, if the write touches an engine-owned column.
    fn ledger_field(&self) -> Option<TripField> {
        match self {
            WriteOp::Status { .. } => Some(TripField::Status),
            WriteOp::Field { field, .. } => Some(*field),
            WriteOp::Event { .. } => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WriteOp::Status { .. } => "update_trip_status",
            WriteOp::Field { .. } => "update_trip_field",
            WriteOp::Event { .. } => "insert_event",
        }
    }

    async fn issue<S: RemoteStore>(&self, store: &S) -> Result<(), RemoteError> {
        match self {
            WriteOp::Status { trip_id, status } => {
                store.update_trip_status(*trip_id, status.as_str()).await
            }
            WriteOp::Field {
                trip_id,
                field,
                value,
            } => store.update_trip_field(*trip_id, *field, value.clone()).await,
            WriteOp::Event { trip_id, message } => store.insert_event(*trip_id, message).await,
        }
    }
}

enum WriterMsg {
    Write {
        op: WriteOp,
        done: Option<oneshot::Sender<Result<(), RemoteError>>>,
    },
    Flush(oneshot::Sender<()>),
}

// =============================================================================
// Reads & reconciliation
// =============================================================================

/// Result of reading the driver's trips.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fresh(Vec<TripRecord>),
    /// The read failed transiently; `records` is the last good snapshot.
    Stale {
        records: Vec<TripRecord>,
        reason: String,
    },
}

/// Summary of a `refresh_trips` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// Trips known after the refresh
    pub trips: usize,
    /// The session's current trip after the refresh
    pub current: Option<TripId>,
    /// Set when the read failed and local state was left as it was
    pub stale: Option<String>,
    /// Engine-owned columns where the remote value replaced the local one
    pub diverged: Vec<(TripId, TripField)>,
    /// Engine-owned columns kept local because a write is still pending
    pub held: Vec<(TripId, TripField)>,
}

impl RefreshReport {
    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }
}

/// A trip after merging local and remote views.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub trip: Trip,
    pub diverged: Vec<TripField>,
    pub held: Vec<TripField>,
}

/// Merges a local trip with its remote row.
pub fn reconcile(local: &Trip, remote: Trip, ledger: &PendingLedger) -> Reconciled {
    let mut merged = remote;
    let mut diverged = Vec::new();
    let mut held = Vec::new();

    for field in ENGINE_FIELDS {
        if engine_value(local, field) == engine_value(&merged, field) {
            continue;
        }
        if ledger.is_pending(local.id, field) {
            copy_engine_field(local, &mut merged, field);
            held.push(field);
        } else {
            diverged.push(field);
        }
    }

    if !diverged.is_empty() {
        tracing::info!(trip = %local.id, ?diverged, "Adopted remote values");
    }

    Reconciled {
        trip: merged,
        diverged,
        held,
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Tolerant front for the [`RemoteStore`].
pub struct RemoteSyncAdapter<Ctx: TripContext, S: RemoteStore> {
    ctx: Arc<Ctx>,
    store: Arc<S>,
    writes: mpsc::Sender<WriterMsg>,
    ledger: Arc<PendingLedger>,
    read_retry: RetryPolicy,
    snapshot: Option<Vec<TripRecord>>,
}

impl<Ctx: TripContext, S: RemoteStore> RemoteSyncAdapter<Ctx, S> {
    /// Creates the adapter and spawns its writer task on the context.
    pub fn new(ctx: Arc<Ctx>, store: Arc<S>, retry: RetryPolicy, queue_capacity: usize) -> Self {
        let (writes, rx) = mpsc::channel(queue_capacity);
        let ledger = Arc::new(PendingLedger::default());

        ctx.spawn(
            "trip-writer",
            run_writer(
                Arc::clone(&ctx),
                Arc::clone(&store),
                retry.clone(),
                Arc::clone(&ledger),
                rx,
            ),
        );

        Self {
            ctx,
            store,
            writes,
            ledger,
            read_retry: retry,
            snapshot: None,
        }
    }

    pub fn ledger(&self) -> &PendingLedger {
        &self.ledger
    }

    /// Queues a write without waiting for it.
    pub async fn enqueue(&self, op: WriteOp) {
        if let Err(err) = self.submit(op, None).await {
            tracing::warn!(error = %err, "Trip write not queued");
        }
    }

    pub async fn enqueue_status(&self, trip_id: TripId, status: TripStatus) {
        self.enqueue(WriteOp::Status { trip_id, status }).await
    }

    pub async fn enqueue_field(&self, trip_id: TripId, field: TripField, value: FieldValue) {
        self.enqueue(WriteOp::Field {
            trip_id,
            field,
            value,
        })
        .await
    }

    pub async fn enqueue_event(&self, trip_id: TripId, message: impl Into<String>) {
        self.enqueue(WriteOp::Event {
            trip_id,
            message: message.into(),
        })
        .await
    }

    /// Writes a column and waits for the store to confirm it.
    ///
    /// The write still goes through the queue, behind everything enqueued
    /// before it.
    pub async fn write_field_now(
        &self,
        trip_id: TripId,
        field: TripField,
        value: FieldValue,
    ) -> Result<(), TripError> {
        let (tx, rx) = oneshot::channel();
        let op = WriteOp::Field {
            trip_id,
            field,
            value,
        };
        self.submit(op, Some(tx)).await?;

        match rx.await {
            Ok(result) => result.map_err(TripError::from),
            Err(_) => Err(TripError::TransientRemote("trip writer stopped".to_string())),
        }
    }

    async fn submit(
        &self,
        op: WriteOp,
        done: Option<oneshot::Sender<Result<(), RemoteError>>>,
    ) -> Result<(), TripError> {
        let trip_id = op.trip_id();
        let field = op.ledger_field();
        if let Some(field) = field {
            self.ledger.add(trip_id, field);
        }

        if self.writes.send(WriterMsg::Write { op, done }).await.is_err() {
            if let Some(field) = field {
                self.ledger.settle(trip_id, field);
            }
            return Err(TripError::TransientRemote("trip writer stopped".to_string()));
        }
        Ok(())
    }

    /// Waits until every write queued so far has settled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(WriterMsg::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Reads the driver's trips, falling back to the last snapshot when the
    /// store is unreachable.
    pub async fn fetch(&mut self, driver_id: DriverId) -> Result<FetchOutcome, TripError> {
        let store = &self.store;
        let result = retry_remote(
            self.ctx.as_ref(),
            &self.read_retry,
            "fetch_current_and_upcoming_trips",
            || store.fetch_current_and_upcoming_trips(driver_id),
        )
        .await;

        match result {
            Ok(records) => {
                self.snapshot = Some(records.clone());
                Ok(FetchOutcome::Fresh(records))
            }
            Err(err) if err.is_transient() => match &self.snapshot {
                Some(records) => {
                    tracing::warn!(error = %err, "Trip read failed, serving last snapshot");
                    Ok(FetchOutcome::Stale {
                        records: records.clone(),
                        reason: err.to_string(),
                    })
                }
                None => Err(err.into()),
            },
            Err(err) => Err(err.into()),
        }
    }
}

async fn run_writer<Ctx: TripContext, S: RemoteStore>(
    ctx: Arc<Ctx>,
    store: Arc<S>,
    retry: RetryPolicy,
    ledger: Arc<PendingLedger>,
    mut rx: mpsc::Receiver<WriterMsg>,
) {
    while let Some(msg) = rx.recv().await {
        let (op, done) = match msg {
            WriterMsg::Write { op, done } => (op, done),
            WriterMsg::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        let store_ref = store.as_ref();
        let op_ref = &op;
        let result =
            retry_remote(ctx.as_ref(), &retry, op.label(), || op_ref.issue(store_ref)).await;

        if let Err(err) = &result {
            tracing::warn!(trip = %op.trip_id(), op = ?op, error = %err, "Trip write failed");
            // Permanent rejections go into the trip history; the local
            // optimistic state is left as it is.
            if !err.is_transient() && !matches!(op, WriteOp::Event { .. }) {
                let message = format!("{} rejected: {err}", op.label());
                if let Err(log_err) = store.insert_event(op.trip_id(), &message).await {
                    tracing::debug!(error = %log_err, "Could not record rejected write");
                }
            }
        }

        if let Some(field) = op.ledger_field() {
            ledger.settle(op.trip_id(), field);
        }
        if let Some(done) = done {
            let _ = done.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{driver, sample_trip, ManualContext, MemoryStore};

    fn adapter(store: &MemoryStore) -> RemoteSyncAdapter<ManualContext, MemoryStore> {
        RemoteSyncAdapter::new(
            Arc::new(ManualContext::new()),
            Arc::new(store.clone()),
            RetryPolicy::exponential(5),
            32,
        )
    }

    #[tokio::test]
    async fn test_status_write_succeeds_after_three_transient_failures() {
        let trip = sample_trip(1);
        let store = MemoryStore::with_trips(&[trip.clone()]);
        store.fail_next_writes(3);
        let sync = adapter(&store);

        sync.enqueue_status(trip.id, TripStatus::InProgress).await;
        assert!(sync.ledger().is_pending(trip.id, TripField::Status));

        sync.flush().await;
        assert_eq!(store.write_calls(), 4);
        assert_eq!(store.record(trip.id).unwrap().status, "in_progress");
        assert!(sync.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_writes_issue_in_queue_order() {
        let trip = sample_trip(1);
        let store = MemoryStore::with_trips(&[trip.clone()]);
        let sync = adapter(&store);

        sync.enqueue_status(trip.id, TripStatus::InProgress).await;
        sync.enqueue_status(trip.id, TripStatus::Delivered).await;
        sync.flush().await;

        assert_eq!(store.record(trip.id).unwrap().status, "delivered");
    }

    #[tokio::test]
    async fn test_rejected_write_is_recorded_as_event() {
        let trip = sample_trip(1);
        let store = MemoryStore::with_trips(&[trip.clone()]);
        store.reject_writes(true);
        let sync = adapter(&store);

        sync.enqueue_field(trip.id, TripField::EndTime, FieldValue::Millis(5)).await;
        sync.flush().await;

        assert_eq!(store.write_calls(), 1);
        let events = store.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].1.contains("update_trip_field rejected"));
        assert!(sync.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_write_field_now_reports_rejection() {
        let trip = sample_trip(1);
        let store = MemoryStore::with_trips(&[trip.clone()]);
        store.reject_writes(true);
        let sync = adapter(&store);

        let err = sync
            .write_field_now(trip.id, TripField::PreTripInspection, FieldValue::Bool(true))
            .await
            .unwrap_err();
        assert!(matches!(err, TripError::Validation(_)));
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_snapshot() {
        let trip = sample_trip(1);
        let store = MemoryStore::with_trips(&[trip.clone()]);
        let mut sync = adapter(&store);

        store.fail_reads(true);
        assert!(matches!(
            sync.fetch(driver()).await,
            Err(TripError::TransientRemote(_))
        ));

        store.fail_reads(false);
        assert!(matches!(sync.fetch(driver()).await, Ok(FetchOutcome::Fresh(ref r)) if r.len() == 1));

        store.fail_reads(true);
        match sync.fetch(driver()).await.unwrap() {
            FetchOutcome::Stale { records, .. } => assert_eq!(records.len(), 1),
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[test]
    fn test_reconcile_holds_pending_and_adopts_settled() {
        let ledger = PendingLedger::default();
        let mut local = sample_trip(1);
        local.status = TripStatus::InProgress;
        local.started_at = Some(1_000);
        local.pre_trip_inspection_done = true;

        let mut remote = sample_trip(1);
        remote.notes = "gate code 4411".into();
        remote.pre_trip_inspection_done = false;

        ledger.add(local.id, TripField::Status);
        ledger.add(local.id, TripField::StartTime);

        let merged = reconcile(&local, remote, &ledger);
        assert_eq!(merged.trip.status, TripStatus::InProgress);
        assert_eq!(merged.trip.started_at, Some(1_000));
        assert!(!merged.trip.pre_trip_inspection_done);
        assert_eq!(merged.trip.notes, "gate code 4411");
        assert_eq!(merged.held, vec![TripField::Status, TripField::StartTime]);
        assert_eq!(merged.diverged, vec![TripField::PreTripInspection]);
    }

    #[test]
    fn test_reconcile_identical_reports_nothing() {
        let ledger = PendingLedger::default();
        let trip = sample_trip(1);
        let merged = reconcile(&trip, trip.clone(), &ledger);
        assert!(merged.diverged.is_empty());
        assert!(merged.held.is_empty());
        assert_eq!(merged.trip, trip);
    }

    #[test]
    fn test_ledger_counts_repeated_writes() {
        let ledger = PendingLedger::default();
        let id = TripId::from_seed(1);
        ledger.add(id, TripField::Status);
        ledger.add(id, TripField::Status);
        ledger.settle(id, TripField::Status);
        assert!(ledger.is_pending(id, TripField::Status));
        ledger.settle(id, TripField::Status);
        assert!(!ledger.is_pending(id, TripField::Status));
        ledger.settle(id, TripField::Status);
        assert!(ledger.is_empty());
    }
}
