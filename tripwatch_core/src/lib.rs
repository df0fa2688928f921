//! TripWatch Core - Trip Lifecycle & Geofence Event Engine
//!
//! Tracks a vehicle through a delivery trip and reacts to three asynchronous
//! sources, each serialized onto one session queue:
//! 1. **Location**: geofence enter/exit at pickup and destination ([`geofence`])
//! 2. **Time**: elapsed-duration and ETA alerts ([`trip_timer`])
//! 3. **Operators**: start, inspection and refresh commands ([`session`])
//!
//! Side effects leave through the [`notification`] dispatcher and the
//! [`sync`] adapter, both of which tolerate a slow or flaky remote store.

pub mod config;
pub mod error;
pub mod event;
pub mod geofence;
pub mod notification;
pub mod retry;
pub mod session;
pub mod state_machine;
pub mod sync;
pub mod trip;
pub mod trip_timer;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use config::{DeliveryPolicy, EngineConfig, RetryConfig};
pub use error::{ErrorKind, TripError};
pub use event::{Command, SessionEvent};
pub use geofence::{
    Coordinate, Crossing, GeofenceMonitor, GeofenceRegion, PositionSample, RegionEvent, RegionId,
};
pub use notification::{AlertEvent, Audience, NotificationCategory, NotificationDispatcher};
pub use retry::RetryPolicy;
pub use session::{SessionHandle, TripSession};
pub use state_machine::{ActiveTrip, SessionState, TripStateMachine};
pub use sync::{FetchOutcome, RefreshReport, RemoteSyncAdapter};
pub use trip::{InspectionPhase, Trip, TripStatus};
pub use trip_timer::{IntervalTicker, TickScheduler, TimerAlert, TripTimer};
