//! Per-driver session: a single queue in front of the state machine.
//!
//! ```text
//! GPS feed ──┐
//! ticker ────┼──► mpsc<SessionEvent> ──► TripSession::run ──► TripStateMachine
//! handle ────┘                                  │
//!     ▲                                         │
//!     └──────── oneshot reply ◄─────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tripwatch_env::{DriverId, LocationSource, RemoteStore, TripContext, TripId};

use crate::config::EngineConfig;
use crate::error::TripError;
use crate::event::{Command, Reply, SessionEvent};
use crate::geofence::PositionSample;
use crate::notification::AlertEvent;
use crate::state_machine::TripStateMachine;
use crate::sync::RefreshReport;
use crate::trip::{InspectionPhase, Trip};
use crate::trip_timer::TickScheduler;

/// Owns one driver's state machine and consumes its event queue.
pub struct TripSession<Ctx: TripContext, S: RemoteStore> {
    machine: TripStateMachine<Ctx, S>,
    events: mpsc::Receiver<SessionEvent>,
}

impl<Ctx: TripContext, S: RemoteStore> TripSession<Ctx, S> {
    /// Builds a session and the handle used to talk to it.
    pub fn new(
        ctx: Arc<Ctx>,
        store: Arc<S>,
        location: Arc<dyn LocationSource>,
        ticker: Arc<dyn TickScheduler>,
        driver_id: DriverId,
        config: EngineConfig,
    ) -> Result<(Self, SessionHandle), TripError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let machine =
            TripStateMachine::new(ctx, store, location, ticker, tx.clone(), driver_id, config);
        let handle = SessionHandle {
            events: tx,
            alerts: machine.alert_sender(),
            snapshots: machine.snapshot_sender(),
        };

        Ok((
            Self {
                machine,
                events: rx,
            },
            handle,
        ))
    }

    pub fn machine(&self) -> &TripStateMachine<Ctx, S> {
        &self.machine
    }

    /// Processes events until `Shutdown`, then drains remote writes and
    /// hands the machine back.
    pub async fn run(mut self) -> TripStateMachine<Ctx, S> {
        tracing::info!(driver = %self.machine.driver_id(), "Trip session started");

        while let Some(event) = self.events.recv().await {
            if !self.process(event).await {
                break;
            }
        }

        self.machine.flush_remote().await;
        tracing::info!(driver = %self.machine.driver_id(), "Trip session stopped");
        self.machine
    }

    /// Applies one event. Returns `false` on shutdown.
    pub async fn process(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Position(sample) => {
                self.machine.on_position(sample).await;
            }
            SessionEvent::Tick { generation, at } => {
                self.machine.on_tick(generation, at);
            }
            SessionEvent::Command(command) => self.execute(command).await,
            SessionEvent::Shutdown => return false,
        }
        true
    }

    async fn execute(&mut self, command: Command) {
        let name = command.name();
        tracing::debug!(command = name, "Executing command");

        match command {
            Command::StartTrip { trip_id, reply } => {
                respond(name, reply, self.machine.start_trip(trip_id).await)
            }
            Command::CompleteInspection {
                trip_id,
                phase,
                reply,
            } => respond(
                name,
                reply,
                self.machine.complete_inspection(trip_id, phase).await,
            ),
            Command::CompleteTrip { trip_id, reply } => {
                respond(name, reply, self.machine.complete_trip(trip_id).await)
            }
            Command::RefreshTrips { driver_id, reply } => {
                respond(name, reply, self.machine.refresh(driver_id).await)
            }
            Command::ReactivateMonitoring { reply } => {
                respond(name, reply, self.machine.reactivate_monitoring())
            }
            Command::FlushRemote { reply } => {
                self.machine.flush_remote().await;
                respond(name, reply, Ok(()))
            }
        }
    }
}

fn respond<T>(name: &str, reply: Reply<T>, result: Result<T, TripError>) {
    if let Err(err) = &result {
        tracing::warn!(command = name, kind = ?err.kind(), error = %err, "Command failed");
    }
    if reply.send(result).is_err() {
        tracing::debug!(command = name, "Caller dropped before the reply");
    }
}

fn session_closed() -> TripError {
    TripError::validation("trip session is not running")
}

/// Cloneable front door to a running [`TripSession`].
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    alerts: broadcast::Sender<AlertEvent>,
    snapshots: broadcast::Sender<Trip>,
}

impl SessionHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, TripError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(SessionEvent::Command(command(tx)))
            .await
            .map_err(|_| session_closed())?;
        rx.await.map_err(|_| session_closed())?
    }

    pub async fn start_trip(&self, trip_id: TripId) -> Result<Trip, TripError> {
        self.request(|reply| Command::StartTrip { trip_id, reply })
            .await
    }

    pub async fn complete_inspection(
        &self,
        trip_id: TripId,
        phase: InspectionPhase,
    ) -> Result<Trip, TripError> {
        self.request(|reply| Command::CompleteInspection {
            trip_id,
            phase,
            reply,
        })
        .await
    }

    pub async fn complete_trip(&self, trip_id: TripId) -> Result<Trip, TripError> {
        self.request(|reply| Command::CompleteTrip { trip_id, reply })
            .await
    }

    pub async fn refresh_trips(&self, driver_id: DriverId) -> Result<RefreshReport, TripError> {
        self.request(|reply| Command::RefreshTrips { driver_id, reply })
            .await
    }

    pub async fn reactivate_monitoring(&self) -> Result<(), TripError> {
        self.request(|reply| Command::ReactivateMonitoring { reply })
            .await
    }

    /// Resolves once every remote write queued so far has settled.
    pub async fn flush_remote(&self) -> Result<(), TripError> {
        self.request(|reply| Command::FlushRemote { reply }).await
    }

    /// Queues a GPS fix. Does not wait for it to be processed.
    pub async fn submit_position(&self, sample: PositionSample) -> Result<(), TripError> {
        self.events
            .send(SessionEvent::Position(sample))
            .await
            .map_err(|_| session_closed())
    }

    pub async fn shutdown(&self) {
        let _ = self.events.send(SessionEvent::Shutdown).await;
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Trip> {
        self.snapshots.subscribe()
    }

    /// Raw queue access, e.g. for injecting ticks in tests.
    pub fn event_sender(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }
}
