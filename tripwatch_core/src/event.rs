//! Events serialized onto a session's single processing queue.

use std::time::Duration;
use tokio::sync::oneshot;
use tripwatch_env::{DriverId, TripId};

use crate::error::TripError;
use crate::geofence::PositionSample;
use crate::sync::RefreshReport;
use crate::trip::{InspectionPhase, Trip};

/// Reply channel for a command.
pub type Reply<T> = oneshot::Sender<Result<T, TripError>>;

/// Anything that may touch trip state. Producers on other tasks only ever
/// enqueue these; the session consumes them one at a time.
#[derive(Debug)]
pub enum SessionEvent {
    /// GPS fix from the location feed
    Position(PositionSample),

    /// Timer tick. `at` is the monotonic time the tick was produced.
    Tick { generation: u64, at: Duration },

    /// Operator/UI command
    Command(Command),

    /// Stop the session loop
    Shutdown,
}

/// Inbound command surface.
#[derive(Debug)]
pub enum Command {
    StartTrip {
        trip_id: TripId,
        reply: Reply<Trip>,
    },
    CompleteInspection {
        trip_id: TripId,
        phase: InspectionPhase,
        reply: Reply<Trip>,
    },
    CompleteTrip {
        trip_id: TripId,
        reply: Reply<Trip>,
    },
    RefreshTrips {
        driver_id: DriverId,
        reply: Reply<RefreshReport>,
    },
    ReactivateMonitoring {
        reply: Reply<()>,
    },
    /// Resolves once every remote write queued before it has settled
    FlushRemote {
        reply: Reply<()>,
    },
}

impl Command {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartTrip { .. } => "start_trip",
            Command::CompleteInspection { .. } => "complete_inspection",
            Command::CompleteTrip { .. } => "complete_trip",
            Command::RefreshTrips { .. } => "refresh_trips",
            Command::ReactivateMonitoring { .. } => "reactivate_monitoring",
            Command::FlushRemote { .. } => "flush_remote",
        }
    }
}
