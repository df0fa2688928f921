//! In-crate fakes for unit tests. The full-featured simulation doubles live
//! in `tripwatch_sim`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tripwatch_env::{
    DriverId, FieldValue, NotificationRow, RemoteError, RemoteStore, TripContext, TripField,
    TripId, TripRecord, VehicleId,
};

use crate::event::SessionEvent;
use crate::geofence::Coordinate;
use crate::trip::{Trip, TripStatus};
use crate::trip_timer::TickScheduler;

pub fn driver() -> DriverId {
    DriverId::from_seed(100)
}

/// An assigned 40 km trip from central Berlin heading north-east.
pub fn sample_trip(seed: u64) -> Trip {
    Trip {
        id: TripId::from_seed(seed),
        pickup: "Depot 4".into(),
        destination: "Harbour Gate".into(),
        source: Coordinate::new(52.5200, 13.4050),
        destination_point: Coordinate::new(52.7800, 13.7900),
        distance: "40 km".into(),
        status: TripStatus::Assigned,
        pre_trip_inspection_done: false,
        post_trip_inspection_done: false,
        started_at: None,
        ended_at: None,
        notes: String::new(),
        vehicle_id: VehicleId::from_seed(seed + 1000),
        driver_id: Some(driver()),
    }
}

/// Virtual clock; `sleep` advances it instantly.
#[derive(Clone, Default)]
pub struct ManualContext {
    now_ns: Arc<Mutex<u64>>,
}

impl ManualContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now_ns.lock().unwrap() += by.as_nanos() as u64;
    }
}

#[async_trait]
impl TripContext for ManualContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(*self.now_ns.lock().unwrap())
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_704_067_200) + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        0
    }
}

/// Tick scheduler that only records what it was asked to do; tests call
/// `on_tick` themselves.
#[derive(Default)]
pub struct RecordingTicker {
    started: Mutex<Vec<u64>>,
    stopped: Mutex<Vec<u64>>,
}

impl RecordingTicker {
    pub fn started(&self) -> Vec<u64> {
        self.started.lock().unwrap().clone()
    }

    /// Generations started and not yet stopped.
    pub fn running(&self) -> Vec<u64> {
        let stopped = self.stopped.lock().unwrap();
        self.started
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|g| !stopped.contains(g))
            .collect()
    }
}

impl TickScheduler for RecordingTicker {
    fn start(&self, generation: u64, _interval: Duration, _sink: tokio::sync::mpsc::Sender<SessionEvent>) {
        self.started.lock().unwrap().push(generation);
    }

    fn stop(&self, generation: u64) {
        self.stopped.lock().unwrap().push(generation);
    }
}

#[derive(Default)]
struct MemoryState {
    trips: HashMap<TripId, TripRecord>,
    order: Vec<TripId>,
    notifications: Vec<NotificationRow>,
    events: Vec<(TripId, String)>,
    transient_failures: u32,
    reject_writes: bool,
    fail_reads: bool,
    write_calls: u32,
}

/// Minimal in-memory store with fault switches.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn with_trips(trips: &[Trip]) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for trip in trips {
                state.order.push(trip.id);
                state.trips.insert(trip.id, trip.to_record());
            }
        }
        store
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().unwrap().transient_failures = n;
    }

    pub fn reject_writes(&self, reject: bool) {
        self.state.lock().unwrap().reject_writes = reject;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn record(&self, id: TripId) -> Option<TripRecord> {
        self.state.lock().unwrap().trips.get(&id).cloned()
    }

    pub fn set_status(&self, id: TripId, status: &str) {
        if let Some(record) = self.state.lock().unwrap().trips.get_mut(&id) {
            record.status = status.to_string();
        }
    }

    /// Edits a row as another client would, bypassing fault switches.
    pub fn write_directly(&self, id: TripId, edit: impl FnOnce(&mut TripRecord)) {
        if let Some(record) = self.state.lock().unwrap().trips.get_mut(&id) {
            edit(record);
        }
    }

    pub fn notifications(&self) -> Vec<NotificationRow> {
        self.state.lock().unwrap().notifications.clone()
    }

    pub fn events(&self) -> Vec<(TripId, String)> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn write_calls(&self) -> u32 {
        self.state.lock().unwrap().write_calls
    }

    fn gate_write(&self) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.write_calls += 1;
        if state.reject_writes {
            return Err(RemoteError::validation("rejected by test store"));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(RemoteError::transient("connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch_current_and_upcoming_trips(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<TripRecord>, RemoteError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(RemoteError::Timeout(5000));
        }
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.trips.get(id))
            .filter(|r| r.driver_id == Some(driver_id))
            .cloned()
            .collect())
    }

    async fn update_trip_status(&self, trip_id: TripId, status: &str) -> Result<(), RemoteError> {
        self.gate_write()?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| RemoteError::validation("no such trip"))?;
        record.status = status.to_string();
        Ok(())
    }

    async fn update_trip_field(
        &self,
        trip_id: TripId,
        field: TripField,
        value: FieldValue,
    ) -> Result<(), RemoteError> {
        self.gate_write()?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .trips
            .get_mut(&trip_id)
            .ok_or_else(|| RemoteError::validation("no such trip"))?;
        match (field, value) {
            (TripField::PreTripInspection, FieldValue::Bool(b)) => record.has_completed_pre_trip = b,
            (TripField::PostTripInspection, FieldValue::Bool(b)) => record.has_completed_post_trip = b,
            (TripField::StartTime, FieldValue::Millis(ms)) => record.start_time = Some(ms),
            (TripField::EndTime, FieldValue::Millis(ms)) => record.end_time = Some(ms),
            (TripField::Status, FieldValue::Text(s)) => record.status = s,
            (field, value) => {
                return Err(RemoteError::validation(format!("bad value {value:?} for {field}")))
            }
        }
        Ok(())
    }

    async fn insert_notification(&self, row: NotificationRow) -> Result<(), RemoteError> {
        self.gate_write()?;
        self.state.lock().unwrap().notifications.push(row);
        Ok(())
    }

    async fn insert_event(&self, trip_id: TripId, message: &str) -> Result<(), RemoteError> {
        self.state.lock().unwrap().events.push((trip_id, message.to_string()));
        Ok(())
    }
}
