//! TripWatch Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the trip engine
//! to run in both **Production** (tokio + a real backend) and **Simulation**
//! (virtual clock + in-memory store) environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! Everything the engine does not own is intercepted behind a trait:
//! - Time (`now()`, `unix_millis()`, `sleep()`)
//! - Remote persistence (`RemoteStore`)
//! - Device capabilities (`LocationSource`)
//!
//! # Example
//!
//! ```ignore
//! use tripwatch_env::{TripContext, RemoteStore};
//!
//! async fn refresh_loop<Ctx: TripContext, S: RemoteStore>(ctx: &Ctx, store: &S, driver: DriverId) {
//!     loop {
//!         let trips = store.fetch_current_and_upcoming_trips(driver).await;
//!         ctx.sleep(Duration::from_secs(30)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod location;
mod store;
mod tokio_impl;
mod types;

pub use context::TripContext;
pub use error::RemoteError;
pub use location::{CapabilityError, LocationSource, MonitoringAvailability, StaticLocationSource};
pub use store::RemoteStore;
pub use tokio_impl::TokioContext;
pub use types::{
    DriverId, FieldValue, NotificationRow, TripField, TripId, TripRecord, VehicleId,
};
