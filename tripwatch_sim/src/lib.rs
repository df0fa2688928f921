//! TripWatch Deterministic Simulation Testing (DST) Harness
//!
//! Runs the real trip session against simulated surroundings so that a
//! whole delivery, including network trouble, replays identically from a
//! single 64-bit seed.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock; retry backoff advances it instead of waiting
//! - **Ticks**: Fired by the harness with an explicit timestamp
//! - **Backend**: In-memory store with scripted and seeded write faults
//! - **GPS**: Oracle positions plus seeded Gaussian noise
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │   Oracle ──fixes──► SessionHandle ──► TripSession        │
//! │   ManualTicker ──ticks──────────────►   │                │
//! │                                         ▼                │
//! │                              SimRemoteStore (faults)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tripwatch_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::FlakyNetwork);
//! assert!(result.passed);
//! ```

mod context;
mod location;
mod oracle;
mod runner;
pub mod scenarios;
mod store;
mod ticker;

pub use context::SimContext;
pub use location::SimLocationSource;
pub use oracle::{Oracle, DEFAULT_POSITION_NOISE_M};
pub use runner::{load_config, ScenarioMetrics, ScenarioResult, ScenarioRunner, SimError};
pub use scenarios::ScenarioId;
pub use store::{FaultPlan, SimRemoteStore, StoreMetrics};
pub use ticker::ManualTicker;
