//! Scenario runner - drives a real trip session through named scenarios.
//!
//! Each run owns a single-threaded runtime, a virtual clock, the fault
//! injecting store and a manual ticker. The harness only talks to the
//! session through its handle, the same way an app would, then inspects the
//! simulated backend to decide pass/fail.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tripwatch_core::trip::parse_distance_km;
use tripwatch_core::{
    AlertEvent, Coordinate, DeliveryPolicy, EngineConfig, ErrorKind, InspectionPhase,
    NotificationCategory, PositionSample, RefreshReport, SessionHandle, TripError, TripSession,
    TripStateMachine, TripStatus,
};
use tripwatch_env::{
    DriverId, MonitoringAvailability, TripContext, TripField, TripId, TripRecord, VehicleId,
};

use crate::context::SimContext;
use crate::location::SimLocationSource;
use crate::oracle::{Oracle, DEFAULT_POSITION_NOISE_M};
use crate::scenarios::ScenarioId;
use crate::store::{FaultPlan, SimRemoteStore};
use crate::ticker::ManualTicker;

/// RNG stream for GPS noise.
const STREAM_GPS: u64 = 1;
/// RNG stream for network faults.
const STREAM_FAULTS: u64 = 2;

const DEPOT: Coordinate = Coordinate {
    latitude: 52.5200,
    longitude: 13.4050,
};
const HARBOUR: Coordinate = Coordinate {
    latitude: 52.6500,
    longitude: 13.5500,
};
const AIRFIELD: Coordinate = Coordinate {
    latitude: 52.5600,
    longitude: 13.2900,
};

/// A pickup/destination pair used to build trip rows.
struct Leg {
    pickup: &'static str,
    source: Coordinate,
    destination: &'static str,
    target: Coordinate,
    distance: &'static str,
}

const CITY_RUN: Leg = Leg {
    pickup: "Depot 4",
    source: DEPOT,
    destination: "Harbour Gate",
    target: HARBOUR,
    distance: "18 km",
};

const RETURN_RUN: Leg = Leg {
    pickup: "Harbour Gate",
    source: HARBOUR,
    destination: "Airfield Cargo",
    target: AIRFIELD,
    distance: "20 km",
};

/// Errors that abort a scenario before its checks run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid engine config: {0}")]
    Config(String),

    #[error("Command failed: {0}")]
    Command(#[from] TripError),

    #[error("Session task failed: {0}")]
    Session(String),
}

/// Reads an [`EngineConfig`] from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, SimError> {
    let json = std::fs::read_to_string(path)?;
    EngineConfig::from_json(&json).map_err(|e| SimError::Config(e.user_message()))
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Virtual time at the end of the run
    pub virtual_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    /// GPS fixes submitted
    pub positions: u64,

    /// Timer ticks delivered to the session
    pub ticks: u64,

    /// Alerts seen on the local stream
    pub alerts: u64,

    /// Notification rows stored remotely
    pub notifications: u64,

    /// Write attempts against the store, retries included
    pub write_attempts: u64,

    /// Transient plus rejected write failures
    pub failed_writes: u64,

    /// Trip events logged remotely
    pub events: u64,
}

/// Runs trip scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Base engine config; scenarios override only what they test
    config: EngineConfig,
}

impl ScenarioRunner {
    /// Creates a new runner with the default engine config.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => return self.aborted(scenario, SimError::Io(err)),
        };
        runtime.block_on(self.run_async(scenario))
    }

    async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        let (policy, availability) = match scenario {
            ScenarioId::StrictInspection => (
                DeliveryPolicy::RequireInspections,
                MonitoringAvailability::Available,
            ),
            ScenarioId::NoRegionMonitoring => (
                DeliveryPolicy::ImplicitConfirm,
                MonitoringAvailability::PermissionDenied,
            ),
            _ => (
                DeliveryPolicy::ImplicitConfirm,
                MonitoringAvailability::Available,
            ),
        };
        let config = self.config.clone().with_delivery_policy(policy);

        let mut h = match Harness::start(self.seed, config, availability, DEPOT) {
            Ok(h) => h,
            Err(err) => return self.aborted(scenario, err),
        };
        let mut checks = Checks::default();

        let outcome = match scenario {
            ScenarioId::HappyDelivery => happy_delivery(&mut h, &mut checks).await,
            ScenarioId::DuplicateStart => duplicate_start(&mut h, &mut checks).await,
            ScenarioId::OverdueTrip => overdue_trip(&mut h, &mut checks).await,
            ScenarioId::FlakyNetwork => flaky_network(&mut h, &mut checks).await,
            ScenarioId::SourceDwell => source_dwell(&mut h, &mut checks).await,
            ScenarioId::StrictInspection => strict_inspection(&mut h, &mut checks).await,
            ScenarioId::RejectedWrite => rejected_write(&mut h, &mut checks).await,
            ScenarioId::NoRegionMonitoring => no_region_monitoring(&mut h, &mut checks).await,
            ScenarioId::RemoteCancel => remote_cancel(&mut h, &mut checks).await,
        };
        if let Err(err) = outcome {
            checks.fail(format!("aborted: {err}"));
        }

        let virtual_secs = h.ctx.now().as_secs_f64();
        match h.finish().await {
            Ok((machine, metrics)) => {
                checks.eq("unsettled writes at shutdown", machine.pending_writes(), 0);
                self.result(scenario, checks, virtual_secs, metrics)
            }
            Err(err) => self.aborted(scenario, err),
        }
    }

    fn result(
        &self,
        scenario: ScenarioId,
        checks: Checks,
        virtual_secs: f64,
        metrics: ScenarioMetrics,
    ) -> ScenarioResult {
        let failure_reason = checks.into_reason();
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            virtual_secs,
            failure_reason,
            metrics,
        }
    }

    fn aborted(&self, scenario: ScenarioId, err: SimError) -> ScenarioResult {
        warn!(scenario = scenario.name(), error = %err, "Scenario aborted");
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            virtual_secs: 0.0,
            failure_reason: Some(err.to_string()),
            metrics: ScenarioMetrics::default(),
        }
    }
}

// =============================================================================
// Checks
// =============================================================================

#[derive(Debug, Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn check(&mut self, ok: bool, what: &str) {
        if !ok {
            self.failures.push(what.to_string());
        }
    }

    fn eq<T: PartialEq + std::fmt::Debug>(&mut self, what: &str, actual: T, expected: T) {
        if actual != expected {
            self.failures
                .push(format!("{what}: expected {expected:?}, got {actual:?}"));
        }
    }

    fn fail(&mut self, what: impl Into<String>) {
        self.failures.push(what.into());
    }

    fn expect_err<T: std::fmt::Debug>(
        &mut self,
        what: &str,
        result: Result<T, TripError>,
        kind: ErrorKind,
    ) {
        match result {
            Err(err) => self.eq(what, err.kind(), kind),
            Ok(value) => self.fail(format!("{what}: expected {kind:?}, got Ok({value:?})")),
        }
    }

    fn into_reason(self) -> Option<String> {
        (!self.failures.is_empty()).then(|| self.failures.join("; "))
    }
}

// =============================================================================
// Harness
// =============================================================================

type SimMachine = TripStateMachine<SimContext, SimRemoteStore>;

struct Harness {
    ctx: Arc<SimContext>,
    store: Arc<SimRemoteStore>,
    location: Arc<SimLocationSource>,
    ticker: Arc<ManualTicker>,
    oracle: Oracle,
    handle: SessionHandle,
    session: JoinHandle<SimMachine>,
    alerts: broadcast::Receiver<AlertEvent>,
    seen: Vec<AlertEvent>,
    positions: u64,
    driver: DriverId,
    config: EngineConfig,
}

impl Harness {
    /// Spawns a session on the current runtime with the vehicle parked at `start`.
    fn start(
        seed: u64,
        config: EngineConfig,
        availability: MonitoringAvailability,
        start: Coordinate,
    ) -> Result<Self, SimError> {
        let ctx = SimContext::shared(seed);
        let store = Arc::new(SimRemoteStore::new(ctx.rng_stream(STREAM_FAULTS)));
        let location = Arc::new(SimLocationSource::new(availability));
        let ticker = Arc::new(ManualTicker::new());
        let driver = DriverId::from_seed(seed);

        let (session, handle) = TripSession::new(
            Arc::clone(&ctx),
            Arc::clone(&store),
            location.clone(),
            ticker.clone(),
            driver,
            config.clone(),
        )
        .map_err(|e| SimError::Config(e.user_message()))?;

        let alerts = handle.subscribe_alerts();
        let session = tokio::spawn(session.run());
        let oracle = Oracle::new(ctx.rng_stream(STREAM_GPS), start);

        Ok(Self {
            ctx,
            store,
            location,
            ticker,
            oracle,
            handle,
            session,
            alerts,
            seen: Vec::new(),
            positions: 0,
            driver,
            config,
        })
    }

    /// Adds an assigned trip for this driver to the backend.
    fn add_trip(&self, n: u64, leg: &Leg) -> TripId {
        let id = TripId::from_seed(n);
        self.store.insert_trip(TripRecord {
            id,
            status: TripStatus::Assigned.as_str().to_string(),
            has_completed_pre_trip: false,
            has_completed_post_trip: false,
            start_time: None,
            end_time: None,
            driver_id: Some(self.driver),
            vehicle_id: VehicleId::from_seed(n + 500),
            pickup: leg.pickup.to_string(),
            destination: leg.destination.to_string(),
            source_latitude: leg.source.latitude,
            source_longitude: leg.source.longitude,
            destination_latitude: leg.target.latitude,
            destination_longitude: leg.target.longitude,
            distance: leg.distance.to_string(),
            notes: String::new(),
        });
        id
    }

    fn remote_status(&self, trip_id: TripId) -> String {
        self.store
            .record(trip_id)
            .map(|record| record.status)
            .unwrap_or_default()
    }

    fn record(&self, trip_id: TripId) -> Option<TripRecord> {
        self.store.record(trip_id)
    }

    /// Estimated duration of a leg as the engine computes it.
    fn eta(&self, leg: &Leg) -> Duration {
        match parse_distance_km(leg.distance) {
            Some(km) => Duration::from_secs_f64(km / self.config.average_speed_kmh * 3600.0),
            None => self.config.default_trip_duration(),
        }
    }

    /// Route steps that cover `fraction` of a leg's ETA, one tick per step.
    fn steps_for(&self, leg: &Leg, fraction: f64) -> usize {
        let tick = self.config.tick_interval().as_secs_f64();
        ((self.eta(leg).as_secs_f64() * fraction / tick) as usize).max(1)
    }

    /// Waits until the session has processed everything queued so far and
    /// every remote write has settled.
    async fn settle(&mut self) -> Result<(), SimError> {
        self.handle.flush_remote().await?;
        self.drain_alerts();
        Ok(())
    }

    fn drain_alerts(&mut self) {
        loop {
            match self.alerts.try_recv() {
                Ok(alert) => self.seen.push(alert),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Alert stream lagged");
                }
                Err(_) => break,
            }
        }
    }

    async fn refresh(&mut self) -> Result<RefreshReport, SimError> {
        let report = self.handle.refresh_trips(self.driver).await?;
        self.settle().await?;
        Ok(report)
    }

    async fn sample(&mut self) -> Result<(), SimError> {
        let fix = self.oracle.gps_fix();
        self.handle
            .submit_position(PositionSample::new(fix, self.ctx.unix_millis()))
            .await?;
        self.positions += 1;
        Ok(())
    }

    fn tick(&self) {
        self.ticker.fire(self.ctx.now());
    }

    /// One tick interval of driving towards `to`.
    async fn step_to(&mut self, to: Coordinate) -> Result<(), SimError> {
        self.ctx.advance_time(self.config.tick_interval());
        self.oracle.move_to(to);
        self.sample().await?;
        self.tick();
        self.settle().await
    }

    async fn drive_to(&mut self, target: Coordinate, steps: usize) -> Result<(), SimError> {
        for waypoint in self.oracle.route(target, steps) {
            self.step_to(waypoint).await?;
        }
        debug!(
            t = self.ctx.now().as_secs(),
            lat = target.latitude,
            lon = target.longitude,
            "Reached waypoint"
        );
        Ok(())
    }

    /// Stays put and reports `samples` fixes, `every` apart.
    async fn dwell(&mut self, samples: usize, every: Duration) -> Result<(), SimError> {
        for _ in 0..samples {
            self.ctx.advance_time(every);
            self.sample().await?;
        }
        self.tick();
        self.settle().await
    }

    /// Lets time pass without moving, ticking every interval.
    async fn idle(&mut self, duration: Duration) -> Result<(), SimError> {
        let interval = self.config.tick_interval();
        let mut waited = Duration::ZERO;
        while waited < duration {
            self.ctx.advance_time(interval);
            waited += interval;
            self.tick();
            self.settle().await?;
        }
        Ok(())
    }

    fn count_alerts(&self, needle: &str) -> usize {
        self.seen.iter().filter(|a| a.message.contains(needle)).count()
    }

    fn count_category(&self, category: NotificationCategory) -> usize {
        self.seen.iter().filter(|a| a.category == category).count()
    }

    fn stored_notifications(&self, needle: &str) -> usize {
        self.store
            .notifications()
            .iter()
            .filter(|n| n.message.contains(needle))
            .count()
    }

    /// Shuts the session down and collects its machine and the run metrics.
    async fn finish(mut self) -> Result<(SimMachine, ScenarioMetrics), SimError> {
        self.handle.shutdown().await;
        let machine = (&mut self.session)
            .await
            .map_err(|e| SimError::Session(e.to_string()))?;
        self.drain_alerts();

        let store = self.store.metrics();
        let metrics = ScenarioMetrics {
            positions: self.positions,
            ticks: self.ticker.ticks_fired(),
            alerts: self.seen.len() as u64,
            notifications: self.store.notifications().len() as u64,
            write_attempts: store.write_attempts,
            failed_writes: store.failed_writes + store.rejected_writes,
            events: self.store.events().len() as u64,
        };
        Ok((machine, metrics))
    }
}

fn midpoint(leg: &Leg) -> Coordinate {
    Coordinate::new(
        (leg.source.latitude + leg.target.latitude) / 2.0,
        (leg.source.longitude + leg.target.longitude) / 2.0,
    )
}

const SAMPLE_GAP: Duration = Duration::from_secs(10);

// =============================================================================
// Scenarios
// =============================================================================

/// TRIP-001: HappyDelivery - start at the pickup and arrive.
///
/// **Assertion**: delivered remotely with both flags and `end_time` set,
/// one ready-to-start, one approaching notice, no delay notices.
async fn happy_delivery(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-001: HappyDelivery");

    let trip = h.add_trip(1, &CITY_RUN);
    let report = h.refresh().await?;
    checks.eq("current trip after refresh", report.current, Some(trip));

    h.dwell(3, SAMPLE_GAP).await?;
    checks.eq("ready-to-start notices", h.count_alerts("ready to start"), 1);

    let started = h.handle.start_trip(trip).await?;
    checks.eq("local status after start", started.status, TripStatus::InProgress);
    h.settle().await?;
    checks.eq("remote status after start", h.remote_status(trip).as_str(), "in_progress");

    let steps = h.steps_for(&CITY_RUN, 0.9);
    h.drive_to(CITY_RUN.target, steps).await?;

    match h.record(trip) {
        Some(record) => {
            checks.eq("remote status", record.status.as_str(), "delivered");
            checks.check(
                record.has_completed_pre_trip && record.has_completed_post_trip,
                "both inspection flags set on delivery",
            );
            checks.check(record.end_time.is_some(), "end_time set on delivery");
        }
        None => checks.fail("trip row missing"),
    }
    checks.eq("arrival notices", h.count_category(NotificationCategory::Arrival), 1);
    checks.eq("approaching notices", h.count_alerts("min from"), 1);
    checks.eq("delay notices", h.count_category(NotificationCategory::Delay), 0);
    checks.eq("stored arrival rows", h.stored_notifications("delivered"), 1);
    checks.check(
        h.ticker.active_generations().is_empty(),
        "timer stopped after delivery",
    );
    Ok(())
}

/// TRIP-002: DuplicateStart - one in-progress trip per driver.
///
/// **Assertion**: second start is a `Conflict` and changes nothing; the
/// next trip becomes current after delivery and completes manually.
async fn duplicate_start(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-002: DuplicateStart");

    let first = h.add_trip(1, &CITY_RUN);
    let second = h.add_trip(2, &RETURN_RUN);
    h.refresh().await?;
    h.dwell(1, SAMPLE_GAP).await?;

    h.handle.start_trip(first).await?;
    checks.expect_err(
        "start while another trip runs",
        h.handle.start_trip(second).await,
        ErrorKind::Conflict,
    );
    checks.expect_err(
        "start an in-progress trip",
        h.handle.start_trip(first).await,
        ErrorKind::Validation,
    );
    h.settle().await?;
    checks.eq("first remote status", h.remote_status(first).as_str(), "in_progress");
    checks.eq("second remote status", h.remote_status(second).as_str(), "assigned");

    let steps = h.steps_for(&CITY_RUN, 0.9);
    h.drive_to(CITY_RUN.target, steps).await?;
    checks.eq("first remote status", h.remote_status(first).as_str(), "delivered");

    // The harbour is the second trip's pickup
    h.dwell(1, SAMPLE_GAP).await?;
    checks.eq("ready-to-start notices", h.count_alerts("ready to start"), 2);

    h.handle.start_trip(second).await?;
    h.handle
        .complete_inspection(second, InspectionPhase::Pre)
        .await?;
    checks.expect_err(
        "complete with post-trip outstanding",
        h.handle.complete_trip(second).await,
        ErrorKind::Validation,
    );
    h.handle
        .complete_inspection(second, InspectionPhase::Post)
        .await?;
    let done = h.handle.complete_trip(second).await?;
    checks.eq("manual completion status", done.status, TripStatus::Delivered);

    h.settle().await?;
    checks.eq("second remote status", h.remote_status(second).as_str(), "delivered");
    Ok(())
}

/// TRIP-003: OverdueTrip - the vehicle stalls halfway.
///
/// **Assertion**: approaching, overdue and duration-exceeded each fire
/// exactly once, however long the stall lasts.
async fn overdue_trip(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-003: OverdueTrip");

    let trip = h.add_trip(1, &CITY_RUN);
    h.refresh().await?;
    h.dwell(1, SAMPLE_GAP).await?;
    h.handle.start_trip(trip).await?;
    h.settle().await?;

    h.drive_to(midpoint(&CITY_RUN), 5).await?;

    let stall = h.eta(&CITY_RUN).max(h.config.max_allowed_duration())
        + h.config.tick_interval() * 2;
    h.idle(stall).await?;

    checks.eq("approaching notices", h.count_alerts("min from"), 1);
    checks.eq("overdue notices", h.count_alerts("past its estimated arrival"), 1);
    checks.eq("duration notices", h.count_alerts("over the"), 1);

    // Edge-triggered: more ticks, no more alerts
    let before = h.seen.len();
    h.idle(h.config.tick_interval() * 10).await?;
    checks.eq("alerts during extra stall", h.seen.len() - before, 0);

    let stored_delays = h
        .store
        .notifications()
        .iter()
        .filter(|n| n.kind == NotificationCategory::Delay.as_str())
        .count();
    checks.eq("stored delay rows", stored_delays, 2);

    h.drive_to(CITY_RUN.target, 5).await?;
    checks.eq("remote status", h.remote_status(trip).as_str(), "delivered");
    Ok(())
}

/// TRIP-004: FlakyNetwork - retries and stale reads.
///
/// **Assertion**: three transient failures are absorbed by retry, a later
/// refresh shows no divergence, and a read outage serves the snapshot.
async fn flaky_network(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-004: FlakyNetwork");

    let trip = h.add_trip(1, &CITY_RUN);
    h.refresh().await?;
    h.dwell(1, SAMPLE_GAP).await?;

    h.store.fail_next_writes(3);
    let started = h.handle.start_trip(trip).await?;
    checks.eq("local status right away", started.status, TripStatus::InProgress);
    h.settle().await?;

    checks.eq("transient write failures", h.store.metrics().failed_writes, 3);
    match h.record(trip) {
        Some(record) => {
            checks.eq("remote status", record.status.as_str(), "in_progress");
            checks.eq("remote start_time", record.start_time, started.started_at);
        }
        None => checks.fail("trip row missing"),
    }

    let report = h.refresh().await?;
    checks.check(!report.is_stale(), "refresh after retries is fresh");
    checks.eq("diverged fields after retries", report.diverged.len(), 0);

    h.store.set_read_outage(true);
    let report = h.refresh().await?;
    checks.check(report.is_stale(), "refresh during outage is stale");
    checks.eq("current trip during outage", report.current, Some(trip));
    h.store.set_read_outage(false);

    h.store.set_faults(FaultPlan {
        write_failure_rate: 0.1,
        ..FaultPlan::default()
    });
    let steps = h.steps_for(&CITY_RUN, 0.9);
    h.drive_to(CITY_RUN.target, steps).await?;
    checks.eq("remote status", h.remote_status(trip).as_str(), "delivered");

    let report = h.refresh().await?;
    checks.eq("diverged fields after delivery", report.diverged.len(), 0);
    checks.eq("current trip after delivery", report.current, None);
    Ok(())
}

/// TRIP-005: SourceDwell - GPS jitter across the pickup boundary.
///
/// **Assertion**: exactly one ready-to-start, and the trip is not started.
async fn source_dwell(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-005: SourceDwell");

    let trip = h.add_trip(1, &CITY_RUN);
    h.refresh().await?;

    h.oracle.set_position_noise(35.0);
    h.dwell(30, SAMPLE_GAP).await?;
    h.oracle.set_position_noise(DEFAULT_POSITION_NOISE_M);

    // Leave and come back
    let away = Coordinate::new(DEPOT.latitude + 0.01, DEPOT.longitude);
    h.drive_to(away, 2).await?;
    h.drive_to(DEPOT, 2).await?;
    h.dwell(3, SAMPLE_GAP).await?;

    checks.eq("ready-to-start notices", h.count_alerts("ready to start"), 1);
    checks.eq("stored ready-to-start rows", h.stored_notifications("ready to start"), 1);
    checks.eq("remote status", h.remote_status(trip).as_str(), "assigned");
    Ok(())
}

/// TRIP-006: StrictInspection - arrival waits for the driver.
///
/// **Assertion**: no delivery until both inspections are done inside the
/// destination zone; the last inspection completes the delivery.
async fn strict_inspection(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-006: StrictInspection");

    let trip = h.add_trip(1, &CITY_RUN);
    h.refresh().await?;
    h.dwell(1, SAMPLE_GAP).await?;
    h.handle.start_trip(trip).await?;
    h.settle().await?;

    let steps = h.steps_for(&CITY_RUN, 0.9);
    h.drive_to(CITY_RUN.target, steps).await?;
    checks.eq("remote status on arrival", h.remote_status(trip).as_str(), "in_progress");
    checks.eq("arrival notices", h.count_alerts("Arrived at Harbour Gate"), 1);

    checks.expect_err(
        "complete with inspections outstanding",
        h.handle.complete_trip(trip).await,
        ErrorKind::Validation,
    );

    h.dwell(3, SAMPLE_GAP).await?;
    checks.eq("arrival notices while waiting", h.count_alerts("Arrived at Harbour Gate"), 1);

    let after_pre = h.handle.complete_inspection(trip, InspectionPhase::Pre).await?;
    checks.eq("status after pre-trip", after_pre.status, TripStatus::InProgress);
    let after_post = h.handle.complete_inspection(trip, InspectionPhase::Post).await?;
    checks.eq("status after post-trip", after_post.status, TripStatus::Delivered);

    h.settle().await?;
    match h.record(trip) {
        Some(record) => {
            checks.eq("remote status", record.status.as_str(), "delivered");
            checks.check(record.end_time.is_some(), "end_time set on delivery");
        }
        None => checks.fail("trip row missing"),
    }
    Ok(())
}

/// TRIP-007: RejectedWrite - the backend refuses every write.
///
/// **Assertion**: the start stands locally, the rejection is logged as a
/// trip event, and the next refresh adopts the remote status.
async fn rejected_write(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-007: RejectedWrite");

    let trip = h.add_trip(1, &CITY_RUN);
    h.refresh().await?;
    h.dwell(1, SAMPLE_GAP).await?;

    h.store.reject_writes(true);
    let started = h.handle.start_trip(trip).await?;
    checks.eq("local status after start", started.status, TripStatus::InProgress);
    h.settle().await?;

    checks.eq("remote status", h.remote_status(trip).as_str(), "assigned");
    checks.check(
        h.store.events().iter().any(|(id, msg)| *id == trip && msg.contains("rejected")),
        "rejection logged as a trip event",
    );
    checks.eq("local start notices", h.count_alerts("started"), 1);
    checks.eq("stored start rows", h.stored_notifications("started"), 0);

    let report = h.refresh().await?;
    checks.check(
        report.diverged.contains(&(trip, TripField::Status)),
        "refresh adopts the remote status",
    );
    checks.eq("current trip after refresh", report.current, Some(trip));
    checks.check(
        h.ticker.active_generations().is_empty(),
        "timer stopped once the trip is no longer running",
    );

    h.store.reject_writes(false);
    h.handle.start_trip(trip).await?;
    h.settle().await?;
    checks.eq("remote status after retry", h.remote_status(trip).as_str(), "in_progress");
    Ok(())
}

/// TRIP-008: NoRegionMonitoring - geofencing unavailable.
///
/// **Assertion**: the failure is reported once, the trip still starts,
/// arrival goes undetected until permission is granted and monitoring is
/// reactivated.
async fn no_region_monitoring(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-008: NoRegionMonitoring");

    let trip = h.add_trip(1, &CITY_RUN);
    h.refresh().await?;
    h.dwell(1, SAMPLE_GAP).await?;
    checks.eq("ready-to-start without geofencing", h.count_alerts("ready to start"), 0);

    let started = h.handle.start_trip(trip).await?;
    checks.eq("local status after start", started.status, TripStatus::InProgress);
    h.settle().await?;
    checks.eq("capability notices", h.count_alerts("not be detected"), 1);

    let steps = h.steps_for(&CITY_RUN, 0.9);
    h.drive_to(CITY_RUN.target, steps).await?;
    checks.eq("remote status without geofencing", h.remote_status(trip).as_str(), "in_progress");

    checks.expect_err(
        "reactivate without permission",
        h.handle.reactivate_monitoring().await,
        ErrorKind::Capability,
    );

    h.location.set(MonitoringAvailability::Available);
    h.handle.reactivate_monitoring().await?;
    h.dwell(1, SAMPLE_GAP).await?;
    checks.eq("remote status after reactivation", h.remote_status(trip).as_str(), "delivered");
    Ok(())
}

/// TRIP-009: RemoteCancel - dispatcher cancels the running trip.
///
/// **Assertion**: the cancelled trip is torn down, its timer raises nothing
/// further and the next trip becomes current.
async fn remote_cancel(h: &mut Harness, checks: &mut Checks) -> Result<(), SimError> {
    info!("TRIP-009: RemoteCancel");

    let first = h.add_trip(1, &CITY_RUN);
    let second = h.add_trip(2, &RETURN_RUN);
    h.refresh().await?;
    h.dwell(1, SAMPLE_GAP).await?;
    h.handle.start_trip(first).await?;
    h.settle().await?;
    h.drive_to(midpoint(&CITY_RUN), 5).await?;

    h.store.set_status(first, "cancelled");
    let report = h.refresh().await?;
    checks.eq("current trip after cancel", report.current, Some(second));
    checks.eq("known trips after cancel", report.trips, 1);
    checks.check(
        h.ticker.active_generations().is_empty(),
        "cancelled trip's timer stopped",
    );

    let delays = h.count_category(NotificationCategory::Delay);
    let stall = h.config.max_allowed_duration() + h.config.tick_interval() * 2;
    h.idle(stall).await?;
    checks.eq(
        "delay notices after cancel",
        h.count_category(NotificationCategory::Delay),
        delays,
    );

    checks.eq("first remote status", h.remote_status(first).as_str(), "cancelled");
    checks.eq("second remote status", h.remote_status(second).as_str(), "assigned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_delivery_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::HappyDelivery);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.positions > 0);
        assert!(result.metrics.ticks > 0);
        assert!(result.metrics.notifications >= 3);
    }

    #[test]
    fn test_strict_inspection_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::StrictInspection);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_flaky_network_deterministic() {
        // Same seed should give the same retry pattern
        let result1 = ScenarioRunner::new(7).run(ScenarioId::FlakyNetwork);
        let result2 = ScenarioRunner::new(7).run(ScenarioId::FlakyNetwork);

        assert!(result1.passed, "{:?}", result1.failure_reason);
        assert_eq!(result1.metrics, result2.metrics);
        assert!(result1.metrics.failed_writes >= 3);
    }

    #[test]
    fn test_rejected_write_logs_event() {
        let result = ScenarioRunner::new(42).run(ScenarioId::RejectedWrite);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.events > 0);
    }

    #[test]
    fn test_load_config() {
        let path = std::env::temp_dir().join(format!("tripwatch-sim-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "region_radius_m": 75.0 }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.region_radius_m, 75.0);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(load_config(&path), Err(SimError::Io(_))));
    }

    #[test]
    fn test_invalid_config_aborts_scenario() {
        let config = EngineConfig {
            tick_interval_secs: 0,
            ..EngineConfig::default()
        };
        let result = ScenarioRunner::new(1)
            .with_config(config)
            .run(ScenarioId::HappyDelivery);

        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("tick_interval_secs"));
    }
}
