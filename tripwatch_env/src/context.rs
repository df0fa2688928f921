//! Core environment context trait for the trip engine.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" clock and task spawning so that the
/// trip engine can run in both production (tokio) and simulation (virtual
/// clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
#[async_trait]
pub trait TripContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for trip timers and elapsed-duration checks.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for persisted timestamps.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as Unix milliseconds (the remote schema's timestamp unit).
    fn unix_millis(&self) -> i64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// The name is only used for logging.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
