//! Remote persistence abstraction for the trip engine.

use async_trait::async_trait;
use crate::error::RemoteError;
use crate::types::{DriverId, FieldValue, NotificationRow, TripField, TripId, TripRecord};

/// The durable owner of trip and notification records.
///
/// # Implementations
///
/// - **Production**: an HTTP/SQL client for the fleet backend (lives in the
///   application shell)
/// - **Simulation**: `SimRemoteStore`, in-memory with fault injection
///
/// # Failure Semantics
///
/// Every call may fail with a transient error (retryable) or a permanent
/// validation error. See [`RemoteError::is_transient`].
///
/// ```text
/// Engine                     Store
///   |-- update_trip_status -->|
///   |<-- Err(Transient) ------|   (retry with backoff)
///   |-- update_trip_status -->|
///   |<-- Ok ------------------|
/// ```
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Returns the driver's in-progress trip and upcoming trips, in schedule order.
    async fn fetch_current_and_upcoming_trips(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<TripRecord>, RemoteError>;

    /// Writes the `status` column.
    async fn update_trip_status(&self, trip_id: TripId, status: &str) -> Result<(), RemoteError>;

    /// Writes a single engine-owned column.
    async fn update_trip_field(
        &self,
        trip_id: TripId,
        field: TripField,
        value: FieldValue,
    ) -> Result<(), RemoteError>;

    /// Inserts a row into `notifications`.
    async fn insert_notification(&self, row: NotificationRow) -> Result<(), RemoteError>;

    /// Appends a free-text event to the trip's history.
    async fn insert_event(&self, trip_id: TripId, message: &str) -> Result<(), RemoteError>;
}
