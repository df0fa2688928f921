//! The "TRIP" Engine - status transitions for one driver's trips
//!
//! ```text
//! pending ─┐
//!          ├─ start_trip ─► in_progress ─ destination enter / complete_trip ─► delivered
//! assigned ┘                     │
//!                                └─ cancelled (observed on refresh only)
//! ```
//!
//! The machine owns the current trip, its timer and the geofence monitor.
//! Every entry point takes `&mut self`; the session feeds it one event at a
//! time, so nothing here needs a lock. Remote writes are queued on the sync
//! adapter and never awaited, except inspections, which are confirmed
//! remotely before the local flag flips.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tripwatch_env::{DriverId, FieldValue, LocationSource, RemoteStore, TripContext, TripField, TripId};

use crate::config::{DeliveryPolicy, EngineConfig};
use crate::error::TripError;
use crate::event::SessionEvent;
use crate::geofence::{Crossing, GeofenceMonitor, PositionSample, RegionEvent, RegionId};
use crate::notification::{AlertEvent, Audience, NotificationCategory, NotificationDispatcher};
use crate::sync::{reconcile, FetchOutcome, RefreshReport, RemoteSyncAdapter};
use crate::trip::{InspectionPhase, Trip, TripStatus};
use crate::trip_timer::{TickScheduler, TimerAlert, TripTimer};

/// The trip the session is currently tracking.
#[derive(Debug, Clone)]
pub struct ActiveTrip {
    pub trip: Trip,
    /// Present while the trip is `in_progress`
    pub timer: Option<TripTimer>,
    /// Inside the destination zone, waiting for inspections
    pub at_destination: bool,
    /// "Ready to start" was already sent for this trip
    pub ready_notified: bool,
}

impl ActiveTrip {
    fn new(trip: Trip) -> Self {
        Self {
            trip,
            timer: None,
            at_destination: false,
            ready_notified: false,
        }
    }
}

/// Session state: either nothing to track or exactly one current trip.
#[derive(Debug, Clone)]
pub enum SessionState {
    NoActiveTrip,
    ActiveTrip(ActiveTrip),
}

impl SessionState {
    pub fn active(&self) -> Option<&ActiveTrip> {
        match self {
            SessionState::ActiveTrip(active) => Some(active),
            SessionState::NoActiveTrip => None,
        }
    }

    fn active_mut(&mut self) -> Option<&mut ActiveTrip> {
        match self {
            SessionState::ActiveTrip(active) => Some(active),
            SessionState::NoActiveTrip => None,
        }
    }

    pub fn current_trip(&self) -> Option<&Trip> {
        self.active().map(|active| &active.trip)
    }
}

/// Trip lifecycle for a single driver.
pub struct TripStateMachine<Ctx: TripContext, S: RemoteStore> {
    ctx: Arc<Ctx>,
    config: EngineConfig,
    driver_id: DriverId,
    state: SessionState,
    /// Known trips other than the current one, in schedule order
    upcoming: Vec<Trip>,
    /// Trips delivered here that the store has not shown as closed yet
    closed: HashMap<TripId, Trip>,
    monitor: GeofenceMonitor,
    location: Arc<dyn LocationSource>,
    ticker: Arc<dyn TickScheduler>,
    tick_sink: mpsc::Sender<SessionEvent>,
    generations: u64,
    notifier: NotificationDispatcher<Ctx>,
    sync: RemoteSyncAdapter<Ctx, S>,
    snapshots: broadcast::Sender<Trip>,
}

impl<Ctx: TripContext, S: RemoteStore> TripStateMachine<Ctx, S> {
    /// Creates an idle machine. Call [`refresh`](Self::refresh) to load trips.
    ///
    /// `tick_sink` is the session queue that timer ticks are delivered to.
    pub fn new(
        ctx: Arc<Ctx>,
        store: Arc<S>,
        location: Arc<dyn LocationSource>,
        ticker: Arc<dyn TickScheduler>,
        tick_sink: mpsc::Sender<SessionEvent>,
        driver_id: DriverId,
        config: EngineConfig,
    ) -> Self {
        let notifier = NotificationDispatcher::new(
            Arc::clone(&ctx),
            Arc::clone(&store),
            config.notification_retry.policy(),
            config.queue_capacity,
            config.broadcast_capacity,
        );
        let sync = RemoteSyncAdapter::new(
            Arc::clone(&ctx),
            store,
            config.write_retry.policy(),
            config.queue_capacity,
        );
        let (snapshots, _) = broadcast::channel(config.broadcast_capacity);

        Self {
            ctx,
            config,
            driver_id,
            state: SessionState::NoActiveTrip,
            upcoming: Vec::new(),
            closed: HashMap::new(),
            monitor: GeofenceMonitor::new(),
            location,
            ticker,
            tick_sink,
            generations: 0,
            notifier,
            sync,
            snapshots,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_trip(&self) -> Option<&Trip> {
        self.state.current_trip()
    }

    pub fn upcoming(&self) -> &[Trip] {
        &self.upcoming
    }

    /// Every trip the session knows about, current first.
    pub fn trips(&self) -> impl Iterator<Item = &Trip> {
        self.state.current_trip().into_iter().chain(self.upcoming.iter())
    }

    pub fn trip(&self, trip_id: TripId) -> Option<&Trip> {
        self.trips().find(|trip| trip.id == trip_id)
    }

    fn trip_mut(&mut self, trip_id: TripId) -> Option<&mut Trip> {
        if let Some(active) = self.state.active_mut() {
            if active.trip.id == trip_id {
                return Some(&mut active.trip);
            }
        }
        self.upcoming.iter_mut().find(|trip| trip.id == trip_id)
    }

    fn in_progress_trip(&self) -> Option<&Trip> {
        self.trips().find(|trip| trip.status == TripStatus::InProgress)
    }

    pub fn monitor(&self) -> &GeofenceMonitor {
        &self.monitor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn driver_id(&self) -> DriverId {
        self.driver_id
    }

    pub fn notifier(&self) -> &NotificationDispatcher<Ctx> {
        &self.notifier
    }

    /// Engine-owned columns whose writes are not confirmed yet.
    pub fn pending_writes(&self) -> usize {
        self.sync.ledger().len()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.notifier.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Trip> {
        self.snapshots.subscribe()
    }

    pub(crate) fn alert_sender(&self) -> broadcast::Sender<AlertEvent> {
        self.notifier.alert_sender()
    }

    pub(crate) fn snapshot_sender(&self) -> broadcast::Sender<Trip> {
        self.snapshots.clone()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// `pending`/`assigned` → `in_progress`.
    pub async fn start_trip(&mut self, trip_id: TripId) -> Result<Trip, TripError> {
        let status = self
            .trip(trip_id)
            .ok_or_else(|| TripError::unknown_trip(trip_id))?
            .status;

        if let Some(other) = self.in_progress_trip().filter(|trip| trip.id != trip_id) {
            return Err(TripError::Conflict(format!(
                "trip {} is already in progress",
                other.id
            )));
        }
        if !status.can_start() {
            return Err(TripError::invalid_transition(trip_id, status, "start"));
        }

        self.make_current(trip_id);
        let mut trip = self
            .current_trip()
            .cloned()
            .ok_or_else(TripError::no_active_trip)?;

        let now_ms = self.ctx.unix_millis();
        trip.status = TripStatus::InProgress;
        trip.started_at = Some(now_ms);

        let timer = self.start_timer(&trip, Duration::ZERO);
        if let Some(active) = self.state.active_mut() {
            active.trip = trip.clone();
            active.timer = Some(timer);
            active.at_destination = false;
        }

        if !self.monitor.is_active() {
            self.activate_monitor(&trip);
        }

        self.sync.enqueue_status(trip.id, TripStatus::InProgress).await;
        self.sync
            .enqueue_field(trip.id, TripField::StartTime, FieldValue::Millis(now_ms))
            .await;

        tracing::info!(trip = %trip.id, destination = %trip.destination, "Trip started");
        self.notifier.notify(
            Some(trip.id),
            NotificationCategory::TripAlert,
            Audience::FleetOperator,
            format!("Trip from {} to {} started", trip.pickup, trip.destination),
        );
        if !trip.pre_trip_inspection_done {
            self.notifier.notify(
                Some(trip.id),
                NotificationCategory::InspectionRequired,
                Audience::Driver,
                format!("Complete the pre-trip inspection for the trip to {}", trip.destination),
            );
        }

        self.publish(&trip);
        Ok(trip)
    }

    /// Marks an inspection done. The store confirms first; only then does
    /// the local flag change.
    pub async fn complete_inspection(
        &mut self,
        trip_id: TripId,
        phase: InspectionPhase,
    ) -> Result<Trip, TripError> {
        let trip = self
            .trip(trip_id)
            .ok_or_else(|| TripError::unknown_trip(trip_id))?;
        if trip.status.is_terminal() {
            return Err(TripError::invalid_transition(trip_id, trip.status, "inspect"));
        }
        if trip.inspection_done(phase) {
            return Ok(trip.clone());
        }

        self.sync
            .write_field_now(trip_id, phase.field(), FieldValue::Bool(true))
            .await?;

        let trip = self
            .trip_mut(trip_id)
            .ok_or_else(|| TripError::unknown_trip(trip_id))?;
        trip.set_inspection(phase, true);
        let trip = trip.clone();

        tracing::info!(trip = %trip_id, %phase, "Inspection completed");
        self.publish(&trip);

        if self.held_delivery_ready(trip_id) {
            return self.deliver("inspections completed at destination").await;
        }
        Ok(trip)
    }

    /// Manual `in_progress` → `delivered`; both inspections must be done.
    pub async fn complete_trip(&mut self, trip_id: TripId) -> Result<Trip, TripError> {
        let trip = self
            .trip(trip_id)
            .ok_or_else(|| TripError::unknown_trip(trip_id))?;
        if trip.status != TripStatus::InProgress {
            return Err(TripError::invalid_transition(trip_id, trip.status, "complete"));
        }
        if !trip.inspections_complete() {
            let missing = missing_inspections(trip);
            return Err(TripError::validation(format!(
                "trip {trip_id} has outstanding inspections: {}",
                join_phases(&missing)
            )));
        }
        self.deliver("completed by driver").await
    }

    /// Retries geofence activation for the current trip.
    pub fn reactivate_monitoring(&mut self) -> Result<(), TripError> {
        let trip = self
            .current_trip()
            .cloned()
            .ok_or_else(TripError::no_active_trip)?;
        let regions = trip.regions(self.config.region_radius_m);
        self.monitor.activate(&regions, self.location.as_ref())?;
        tracing::info!(trip = %trip.id, "Region monitoring reactivated");
        Ok(())
    }

    /// Re-reads the driver's trips and reconciles them with local state.
    pub async fn refresh(&mut self, driver_id: DriverId) -> Result<RefreshReport, TripError> {
        if driver_id != self.driver_id {
            return Err(TripError::validation(format!(
                "session belongs to driver {}, not {driver_id}",
                self.driver_id
            )));
        }

        let records = match self.sync.fetch(driver_id).await? {
            FetchOutcome::Fresh(records) => records,
            FetchOutcome::Stale { reason, .. } => {
                return Ok(RefreshReport {
                    trips: self.trips().count(),
                    current: self.current_trip().map(|trip| trip.id),
                    stale: Some(reason),
                    ..RefreshReport::default()
                });
            }
        };

        let mut remote = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id;
            match Trip::from_record(record) {
                Ok(trip) => remote.push(trip),
                Err(err) => tracing::warn!(trip = %id, error = %err, "Skipping unreadable trip row"),
            }
        }

        let mut report = RefreshReport::default();
        self.closed.retain(|id, _| remote.iter().any(|trip| trip.id == *id));

        if let Some(local) = self.current_trip().cloned() {
            match remote.iter().position(|trip| trip.id == local.id) {
                Some(idx) => {
                    let merged = reconcile(&local, remote.remove(idx), self.sync.ledger());
                    report.diverged.extend(merged.diverged.iter().map(|f| (local.id, *f)));
                    report.held.extend(merged.held.iter().map(|f| (local.id, *f)));

                    if merged.trip.status.is_terminal() {
                        tracing::info!(
                            trip = %local.id,
                            status = %merged.trip.status,
                            "Current trip closed remotely"
                        );
                        self.teardown_current();
                    } else {
                        self.update_current(merged.trip);
                    }
                }
                None => {
                    tracing::info!(trip = %local.id, "Current trip no longer assigned");
                    self.teardown_current();
                }
            }
        }

        let mut upcoming = Vec::with_capacity(remote.len());
        for incoming in remote {
            if let Some(closed) = self.closed.get(&incoming.id).cloned() {
                if incoming.status.is_terminal() {
                    self.closed.remove(&incoming.id);
                    continue;
                }
                // A delivery never reopens; a failed closing write is sent again
                if !self.sync.ledger().is_pending(closed.id, TripField::Status) {
                    self.resend_closing_writes(&closed).await;
                }
                report.held.push((closed.id, TripField::Status));
                continue;
            }
            let merged = match self.upcoming.iter().find(|trip| trip.id == incoming.id) {
                Some(local) => {
                    let merged = reconcile(local, incoming, self.sync.ledger());
                    report.diverged.extend(merged.diverged.iter().map(|f| (local.id, *f)));
                    report.held.extend(merged.held.iter().map(|f| (local.id, *f)));
                    merged.trip
                }
                None if self.sync.ledger().is_pending(incoming.id, TripField::Status) => {
                    // Finished locally, the store has not caught up yet
                    report.held.push((incoming.id, TripField::Status));
                    continue;
                }
                None => incoming,
            };
            if !merged.status.is_terminal() {
                upcoming.push(merged);
            }
        }
        self.upcoming = upcoming;
        self.settle_current();

        report.trips = self.trips().count();
        report.current = self.current_trip().map(|trip| trip.id);
        tracing::debug!(
            trips = report.trips,
            diverged = report.diverged.len(),
            held = report.held.len(),
            "Trips refreshed"
        );
        Ok(report)
    }

    /// Waits for queued trip writes and notification rows to settle.
    pub async fn flush_remote(&self) {
        self.sync.flush().await;
        self.notifier.flush().await;
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Feeds a GPS fix through the geofence monitor.
    pub async fn on_position(&mut self, sample: PositionSample) -> Vec<RegionEvent> {
        let events = self
            .monitor
            .on_position_sample(sample.coordinate, sample.timestamp_ms);
        let tracked = self.current_trip().map(|trip| trip.id);

        for event in &events {
            // A delivery may have moved on to the next trip
            if self.current_trip().map(|trip| trip.id) != tracked {
                break;
            }
            if let Err(err) = self.handle_region_event(*event).await {
                tracing::warn!(error = %err, ?event, "Region event failed");
            }
        }
        events
    }

    /// Applies one enter/exit event to the current trip.
    pub async fn handle_region_event(&mut self, event: RegionEvent) -> Result<(), TripError> {
        let busy = self.in_progress_trip().is_some();
        let Some(active) = self.state.active_mut() else {
            tracing::debug!(?event, "Region event without a current trip");
            return Ok(());
        };

        match (event.region, event.direction, active.trip.status) {
            (RegionId::Source, Crossing::Enter, status) if status.can_start() && !busy => {
                if active.ready_notified {
                    tracing::debug!(trip = %active.trip.id, "Ready-to-start already sent");
                    return Ok(());
                }
                active.ready_notified = true;
                let (trip_id, destination) = (active.trip.id, active.trip.destination.clone());
                self.notifier.notify(
                    Some(trip_id),
                    NotificationCategory::TripAlert,
                    Audience::Driver,
                    format!("You are at the pickup. The trip to {destination} is ready to start"),
                );
            }
            (RegionId::Destination, Crossing::Enter, TripStatus::InProgress) => {
                self.arrive_at_destination().await?;
            }
            (RegionId::Destination, Crossing::Exit, TripStatus::InProgress) => {
                if active.at_destination {
                    active.at_destination = false;
                    tracing::info!(
                        trip = %active.trip.id,
                        "Left destination with inspections outstanding"
                    );
                }
            }
            _ => tracing::debug!(?event, "Region event ignored"),
        }
        Ok(())
    }

    /// Evaluates the current timer. Ticks from any other generation are
    /// ignored.
    pub fn on_tick(&mut self, generation: u64, at: Duration) -> Vec<TimerAlert> {
        let Some(active) = self.state.active_mut() else {
            tracing::debug!(generation, "Tick without a current trip");
            return Vec::new();
        };
        let Some(timer) = active
            .timer
            .as_mut()
            .filter(|timer| timer.generation() == generation)
        else {
            tracing::debug!(generation, "Ignoring stale tick");
            return Vec::new();
        };

        let alerts = timer.evaluate(at);
        let trip_id = active.trip.id;
        let destination = active.trip.destination.clone();

        for alert in &alerts {
            tracing::info!(trip = %trip_id, ?alert, "Timer alert");
            self.notify_timer_alert(trip_id, &destination, alert);
        }
        alerts
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn arrive_at_destination(&mut self) -> Result<(), TripError> {
        let policy = self.config.delivery_policy;
        let Some(active) = self.state.active_mut() else {
            return Ok(());
        };
        let missing = missing_inspections(&active.trip);

        if missing.is_empty() {
            self.deliver("arrived at destination").await?;
            return Ok(());
        }

        match policy {
            DeliveryPolicy::ImplicitConfirm => {
                let trip_id = active.trip.id;
                self.sync
                    .enqueue_event(
                        trip_id,
                        format!(
                            "{} inspection confirmed implicitly on arrival",
                            join_phases(&missing)
                        ),
                    )
                    .await;
                self.deliver("arrived at destination").await?;
            }
            DeliveryPolicy::RequireInspections => {
                if active.at_destination {
                    return Ok(());
                }
                active.at_destination = true;
                let (trip_id, destination) = (active.trip.id, active.trip.destination.clone());
                tracing::info!(trip = %trip_id, "At destination, waiting for inspections");
                self.notifier.notify(
                    Some(trip_id),
                    NotificationCategory::InspectionRequired,
                    Audience::Driver,
                    format!(
                        "Arrived at {destination}. Complete the {} inspection to finish the delivery",
                        join_phases(&missing)
                    ),
                );
            }
        }
        Ok(())
    }

    fn held_delivery_ready(&self, trip_id: TripId) -> bool {
        self.state.active().is_some_and(|active| {
            active.trip.id == trip_id
                && active.trip.status == TripStatus::InProgress
                && active.at_destination
                && active.trip.inspections_complete()
                && self.monitor.is_inside(RegionId::Destination)
        })
    }

    /// `in_progress` → `delivered`, then moves on to the next trip.
    async fn deliver(&mut self, reason: &str) -> Result<Trip, TripError> {
        let active = self.teardown_current().ok_or_else(TripError::no_active_trip)?;
        let mut trip = active.trip;
        let now_ms = self.ctx.unix_millis();

        for phase in missing_inspections(&trip) {
            trip.set_inspection(phase, true);
            self.sync
                .enqueue_field(trip.id, phase.field(), FieldValue::Bool(true))
                .await;
        }
        trip.status = TripStatus::Delivered;
        trip.ended_at = Some(now_ms);

        self.sync.enqueue_status(trip.id, TripStatus::Delivered).await;
        self.sync
            .enqueue_field(trip.id, TripField::EndTime, FieldValue::Millis(now_ms))
            .await;
        self.sync
            .enqueue_event(trip.id, format!("Delivered to {}: {reason}", trip.destination))
            .await;

        tracing::info!(trip = %trip.id, reason, "Trip delivered");
        self.notifier.notify(
            Some(trip.id),
            NotificationCategory::Arrival,
            Audience::FleetOperator,
            format!("Trip to {} delivered", trip.destination),
        );
        self.publish(&trip);
        self.closed.insert(trip.id, trip.clone());

        self.select_next();
        Ok(trip)
    }

    async fn resend_closing_writes(&self, trip: &Trip) {
        tracing::info!(
            trip = %trip.id,
            status = %trip.status,
            "Store still shows a closed trip as open, resending"
        );
        for phase in [InspectionPhase::Pre, InspectionPhase::Post] {
            self.sync
                .enqueue_field(trip.id, phase.field(), FieldValue::Bool(trip.inspection_done(phase)))
                .await;
        }
        self.sync.enqueue_status(trip.id, trip.status).await;
        if let Some(ended_at) = trip.ended_at {
            self.sync
                .enqueue_field(trip.id, TripField::EndTime, FieldValue::Millis(ended_at))
                .await;
        }
    }

    fn notify_timer_alert(&self, trip_id: TripId, destination: &str, alert: &TimerAlert) {
        let (category, audience, message) = match alert {
            TimerAlert::DurationExceeded { elapsed } => (
                NotificationCategory::Delay,
                Audience::FleetOperator,
                format!(
                    "Trip to {destination} has been running for {} min, over the {} min limit",
                    elapsed.as_secs() / 60,
                    self.config.max_allowed_duration().as_secs() / 60
                ),
            ),
            TimerAlert::ApproachingDestination { remaining } => (
                NotificationCategory::TripAlert,
                Audience::Driver,
                format!("About {} min from {destination}", remaining.as_secs().div_ceil(60)),
            ),
            TimerAlert::ArrivalOverdue { .. } => (
                NotificationCategory::Delay,
                Audience::FleetOperator,
                format!("Trip to {destination} is past its estimated arrival"),
            ),
        };
        self.notifier.notify(Some(trip_id), category, audience, message);
    }

    fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }

    fn start_timer(&mut self, trip: &Trip, already_elapsed: Duration) -> TripTimer {
        let generation = self.next_generation();
        self.ticker
            .start(generation, self.config.tick_interval(), self.tick_sink.clone());
        TripTimer::resume(trip, self.ctx.now(), already_elapsed, generation, &self.config)
    }

    fn activate_monitor(&mut self, trip: &Trip) {
        let already_failing = self.monitor.last_error().is_some();
        let regions = trip.regions(self.config.region_radius_m);

        if let Err(err) = self.monitor.activate(&regions, self.location.as_ref()) {
            if !already_failing {
                self.notifier.notify(
                    Some(trip.id),
                    NotificationCategory::TripAlert,
                    Audience::Driver,
                    format!("{err}. Arrival will not be detected automatically"),
                );
            }
        }
    }

    /// Stops the timer and monitor and clears the current trip.
    fn teardown_current(&mut self) -> Option<ActiveTrip> {
        let SessionState::ActiveTrip(mut active) =
            std::mem::replace(&mut self.state, SessionState::NoActiveTrip)
        else {
            return None;
        };
        if let Some(timer) = active.timer.take() {
            self.ticker.stop(timer.generation());
        }
        self.monitor.deactivate();
        Some(active)
    }

    /// Makes `trip` current, resuming its timer if it is already running.
    fn install_current(&mut self, trip: Trip) {
        let timer = if trip.status == TripStatus::InProgress {
            let elapsed = self.elapsed_since_start(&trip);
            tracing::info!(trip = %trip.id, ?elapsed, "Resuming in-progress trip");
            Some(self.start_timer(&trip, elapsed))
        } else {
            None
        };

        tracing::info!(trip = %trip.id, status = %trip.status, "Current trip selected");
        self.activate_monitor(&trip);
        self.publish(&trip);
        self.state = SessionState::ActiveTrip(ActiveTrip {
            timer,
            ..ActiveTrip::new(trip)
        });
    }

    fn elapsed_since_start(&self, trip: &Trip) -> Duration {
        let now_ms = self.ctx.unix_millis();
        let started = trip.started_at.unwrap_or(now_ms);
        Duration::from_millis((now_ms - started).max(0) as u64)
    }

    fn make_current(&mut self, trip_id: TripId) {
        if self.current_trip().map(|trip| trip.id) == Some(trip_id) {
            return;
        }
        let Some(idx) = self.upcoming.iter().position(|trip| trip.id == trip_id) else {
            return;
        };
        let trip = self.upcoming.remove(idx);
        if let Some(previous) = self.teardown_current() {
            self.upcoming.insert(0, previous.trip);
        }
        self.install_current(trip);
    }

    /// Replaces the current trip with its reconciled copy.
    fn update_current(&mut self, merged: Trip) {
        let resume = merged.status == TripStatus::InProgress
            && self.state.active().is_some_and(|active| active.timer.is_none());
        let timer = if resume {
            let elapsed = self.elapsed_since_start(&merged);
            tracing::info!(trip = %merged.id, "Trip started elsewhere, resuming timer");
            Some(self.start_timer(&merged, elapsed))
        } else {
            None
        };

        let Some(active) = self.state.active_mut() else {
            return;
        };
        let changed = active.trip != merged;
        if merged.status.can_start() {
            if let Some(stale) = active.timer.take() {
                self.ticker.stop(stale.generation());
            }
        }
        if timer.is_some() {
            active.timer = timer;
        }
        active.trip = merged;

        if changed {
            let trip = active.trip.clone();
            self.publish(&trip);
        }
    }

    /// Picks the next trip once the current one is gone.
    fn select_next(&mut self) {
        let idx = self
            .upcoming
            .iter()
            .position(|trip| trip.status == TripStatus::InProgress)
            .or_else(|| self.upcoming.iter().position(|trip| trip.status.can_start()));

        match idx {
            Some(idx) => {
                let trip = self.upcoming.remove(idx);
                self.install_current(trip);
            }
            None => tracing::debug!("No further trips for this driver"),
        }
    }

    /// After a refresh: fill an empty slot, or switch to a trip that was
    /// started elsewhere.
    fn settle_current(&mut self) {
        let current_started = self
            .current_trip()
            .map(|trip| trip.status == TripStatus::InProgress);
        let started_elsewhere = self
            .upcoming
            .iter()
            .position(|trip| trip.status == TripStatus::InProgress);

        match (current_started, started_elsewhere) {
            (None, _) => self.select_next(),
            (Some(false), Some(idx)) => {
                let trip = self.upcoming.remove(idx);
                if let Some(previous) = self.teardown_current() {
                    self.upcoming.insert(0, previous.trip);
                }
                self.install_current(trip);
            }
            _ => {}
        }
    }

    fn publish(&self, trip: &Trip) {
        let _ = self.snapshots.send(trip.clone());
    }
}

fn missing_inspections(trip: &Trip) -> Vec<InspectionPhase> {
    [InspectionPhase::Pre, InspectionPhase::Post]
        .into_iter()
        .filter(|phase| !trip.inspection_done(*phase))
        .collect()
}

fn join_phases(phases: &[InspectionPhase]) -> String {
    phases
        .iter()
        .map(|phase| phase.to_string())
        .collect::<Vec<_>>()
        .join(" and ")
}
