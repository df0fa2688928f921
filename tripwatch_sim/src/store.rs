//! In-memory remote store with fault injection.
//!
//! Stands in for the fleet backend. Faults are configured per run:
//! a countdown of transient write failures, a seeded random failure rate,
//! a hard "reject everything" switch and a read outage.

use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tripwatch_env::{
    DriverId, FieldValue, NotificationRow, RemoteError, RemoteStore, TripField, TripId, TripRecord,
};
use uuid::Uuid;

/// Fault switches for the simulated backend.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// The next N writes fail with a transient error
    pub transient_write_failures: u32,

    /// Probability (0.0 - 1.0) that any write fails transiently
    pub write_failure_rate: f64,

    /// Every write is rejected as invalid
    pub reject_writes: bool,

    /// Reads time out
    pub read_outage: bool,
}

/// Counters exposed to scenario assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub reads: u64,
    pub failed_reads: u64,
    pub write_attempts: u64,
    pub failed_writes: u64,
    pub rejected_writes: u64,
    /// Notification inserts that repeated an id already stored
    pub duplicate_notifications: u64,
}

struct StoreState {
    trips: Vec<TripRecord>,
    notifications: Vec<NotificationRow>,
    notification_ids: HashSet<Uuid>,
    events: Vec<(TripId, String)>,
    faults: FaultPlan,
    metrics: StoreMetrics,
    rng: ChaCha8Rng,
}

/// Shared handle to the simulated backend. Clones see the same data.
#[derive(Clone)]
pub struct SimRemoteStore {
    state: Arc<Mutex<StoreState>>,
}

impl SimRemoteStore {
    /// Creates an empty store whose random faults draw from `rng`.
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                trips: Vec::new(),
                notifications: Vec::new(),
                notification_ids: HashSet::new(),
                events: Vec::new(),
                faults: FaultPlan::default(),
                metrics: StoreMetrics::default(),
                rng,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a trip row in schedule order.
    pub fn insert_trip(&self, record: TripRecord) {
        self.lock().trips.push(record);
    }

    pub fn record(&self, trip_id: TripId) -> Option<TripRecord> {
        self.lock().trips.iter().find(|r| r.id == trip_id).cloned()
    }

    /// Changes a status as a dispatcher would from the back office.
    pub fn set_status(&self, trip_id: TripId, status: &str) {
        if let Some(record) = self.lock().trips.iter_mut().find(|r| r.id == trip_id) {
            record.status = status.to_string();
        }
    }

    pub fn notifications(&self) -> Vec<NotificationRow> {
        self.lock().notifications.clone()
    }

    pub fn events(&self) -> Vec<(TripId, String)> {
        self.lock().events.clone()
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.lock().metrics.clone()
    }

    pub fn set_faults(&self, faults: FaultPlan) {
        self.lock().faults = faults;
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.lock().faults.transient_write_failures = n;
    }

    pub fn reject_writes(&self, reject: bool) {
        self.lock().faults.reject_writes = reject;
    }

    pub fn set_read_outage(&self, outage: bool) {
        self.lock().faults.read_outage = outage;
    }

    /// Applies the fault plan to one write attempt.
    fn gate_write(&self, what: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.metrics.write_attempts += 1;

        if state.faults.reject_writes {
            state.metrics.rejected_writes += 1;
            return Err(RemoteError::validation(format!("{what} rejected by backend")));
        }
        if state.faults.transient_write_failures > 0 {
            state.faults.transient_write_failures -= 1;
            state.metrics.failed_writes += 1;
            return Err(RemoteError::transient("connection reset"));
        }
        let rate = state.faults.write_failure_rate;
        if rate > 0.0 && state.rng.gen_bool(rate.min(1.0)) {
            state.metrics.failed_writes += 1;
            return Err(RemoteError::Timeout(3000));
        }
        Ok(())
    }

    fn with_trip<T>(
        &self,
        trip_id: TripId,
        edit: impl FnOnce(&mut TripRecord) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut state = self.lock();
        let record = state
            .trips
            .iter_mut()
            .find(|r| r.id == trip_id)
            .ok_or_else(|| RemoteError::validation(format!("no trip {trip_id}")))?;
        edit(record)
    }
}

#[async_trait]
impl RemoteStore for SimRemoteStore {
    async fn fetch_current_and_upcoming_trips(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<TripRecord>, RemoteError> {
        let mut state = self.lock();
        state.metrics.reads += 1;
        if state.faults.read_outage {
            state.metrics.failed_reads += 1;
            return Err(RemoteError::Timeout(5000));
        }

        Ok(state
            .trips
            .iter()
            .filter(|r| r.driver_id == Some(driver_id))
            // Delivered trips leave the feed; cancelled ones stay so the
            // session can tear its current trip down
            .filter(|r| r.status != "delivered")
            .cloned()
            .collect())
    }

    async fn update_trip_status(&self, trip_id: TripId, status: &str) -> Result<(), RemoteError> {
        self.gate_write("update_trip_status")?;
        self.with_trip(trip_id, |record| {
            record.status = status.to_string();
            Ok(())
        })
    }

    async fn update_trip_field(
        &self,
        trip_id: TripId,
        field: TripField,
        value: FieldValue,
    ) -> Result<(), RemoteError> {
        self.gate_write("update_trip_field")?;
        self.with_trip(trip_id, |record| {
            match (field, value) {
                (TripField::PreTripInspection, FieldValue::Bool(done)) => {
                    record.has_completed_pre_trip = done
                }
                (TripField::PostTripInspection, FieldValue::Bool(done)) => {
                    record.has_completed_post_trip = done
                }
                (TripField::StartTime, FieldValue::Millis(ms)) => record.start_time = Some(ms),
                (TripField::StartTime, FieldValue::Null) => record.start_time = None,
                (TripField::EndTime, FieldValue::Millis(ms)) => record.end_time = Some(ms),
                (TripField::EndTime, FieldValue::Null) => record.end_time = None,
                (TripField::Status, FieldValue::Text(status)) => record.status = status,
                (field, value) => {
                    return Err(RemoteError::validation(format!(
                        "{field} cannot hold {value:?}"
                    )))
                }
            }
            Ok(())
        })
    }

    async fn insert_notification(&self, row: NotificationRow) -> Result<(), RemoteError> {
        self.gate_write("insert_notification")?;
        let mut state = self.lock();
        if !state.notification_ids.insert(row.id) {
            state.metrics.duplicate_notifications += 1;
            return Ok(());
        }
        state.notifications.push(row);
        Ok(())
    }

    async fn insert_event(&self, trip_id: TripId, message: &str) -> Result<(), RemoteError> {
        self.lock().events.push((trip_id, message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tripwatch_env::VehicleId;

    fn record(seed: u64, status: &str) -> TripRecord {
        TripRecord {
            id: TripId::from_seed(seed),
            status: status.into(),
            has_completed_pre_trip: false,
            has_completed_post_trip: false,
            start_time: None,
            end_time: None,
            driver_id: Some(DriverId::from_seed(1)),
            vehicle_id: VehicleId::from_seed(2),
            pickup: "Depot".into(),
            destination: "Port".into(),
            source_latitude: 52.5,
            source_longitude: 13.4,
            destination_latitude: 52.6,
            destination_longitude: 13.5,
            distance: "12 km".into(),
            notes: String::new(),
        }
    }

    fn store() -> SimRemoteStore {
        SimRemoteStore::new(ChaCha8Rng::seed_from_u64(1))
    }

    #[tokio::test]
    async fn test_fetch_hides_delivered_trips() {
        let store = store();
        store.insert_trip(record(1, "assigned"));
        store.insert_trip(record(2, "delivered"));
        store.insert_trip(record(3, "cancelled"));

        let rows = store
            .fetch_current_and_upcoming_trips(DriverId::from_seed(1))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![TripId::from_seed(1), TripId::from_seed(3)]);
    }

    #[tokio::test]
    async fn test_fault_countdown_then_success() {
        let store = store();
        store.insert_trip(record(1, "assigned"));
        store.fail_next_writes(2);

        let id = TripId::from_seed(1);
        assert!(store.update_trip_status(id, "in_progress").await.unwrap_err().is_transient());
        assert!(store.update_trip_status(id, "in_progress").await.is_err());
        store.update_trip_status(id, "in_progress").await.unwrap();

        assert_eq!(store.record(id).unwrap().status, "in_progress");
        let metrics = store.metrics();
        assert_eq!(metrics.write_attempts, 3);
        assert_eq!(metrics.failed_writes, 2);
    }

    #[tokio::test]
    async fn test_rejection_is_permanent() {
        let store = store();
        store.insert_trip(record(1, "assigned"));
        store.reject_writes(true);

        let err = store
            .update_trip_field(TripId::from_seed(1), TripField::EndTime, FieldValue::Millis(1))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_duplicate_notification_is_idempotent() {
        let store = store();
        let row = NotificationRow {
            id: Uuid::new_v4(),
            message: "hello".into(),
            kind: "trip_alert".into(),
            audience: "driver".into(),
            created_at: 0,
            is_read: false,
        };
        store.insert_notification(row.clone()).await.unwrap();
        store.insert_notification(row).await.unwrap();

        assert_eq!(store.notifications().len(), 1);
        assert_eq!(store.metrics().duplicate_notifications, 1);
    }

    #[tokio::test]
    async fn test_read_outage() {
        let store = store();
        store.set_read_outage(true);
        let err = store
            .fetch_current_and_upcoming_trips(DriverId::from_seed(1))
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Timeout(5000));
    }
}
