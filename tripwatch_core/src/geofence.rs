//! The "SPACE" Engine - circular geofences over raw position samples
//!
//! Turns a continuous stream of GPS fixes into discrete enter/exit events:
//! - Haversine distance for containment (metres on a spherical earth)
//! - Per-region {outside, inside} state so repeated samples on the same
//!   side of a boundary never produce a second event

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use tripwatch_env::{CapabilityError, LocationSource};

/// At most the source and destination zones are watched at once.
pub const MAX_ACTIVE_REGIONS: usize = 2;

/// Default geofence radius in metres.
pub const DEFAULT_REGION_RADIUS_M: f64 = 50.0;

/// WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Great-circle distance in metres.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        self.to_point().haversine_distance(&other.to_point())
    }

    fn to_point(self) -> Point<f64> {
        // geo points are (x = lon, y = lat)
        Point::new(self.longitude, self.latitude)
    }
}

/// A single GPS fix pushed into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub coordinate: Coordinate,
    /// Unix milliseconds
    pub timestamp_ms: i64,
}

impl PositionSample {
    pub fn new(coordinate: Coordinate, timestamp_ms: i64) -> Self {
        Self { coordinate, timestamp_ms }
    }
}

/// Logical name of a trip geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionId {
    /// Pickup zone
    Source,
    /// Drop-off zone
    Destination,
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionId::Source => write!(f, "source"),
            RegionId::Destination => write!(f, "destination"),
        }
    }
}

/// Immutable circular zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceRegion {
    pub id: RegionId,
    pub center: Coordinate,
    pub radius_m: f64,
    pub notify_on_entry: bool,
    pub notify_on_exit: bool,
}

impl GeofenceRegion {
    /// Region notifying on both entry and exit.
    pub fn new(id: RegionId, center: Coordinate, radius_m: f64) -> Self {
        Self {
            id,
            center,
            radius_m,
            notify_on_entry: true,
            notify_on_exit: true,
        }
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        self.center.distance_m(coordinate) <= self.radius_m
    }
}

/// Direction of a boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crossing {
    Enter,
    Exit,
}

/// One detected crossing. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionEvent {
    pub region: RegionId,
    pub direction: Crossing,
    pub coordinate: Coordinate,
    /// Unix milliseconds
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Containment {
    Outside,
    Inside,
}

#[derive(Debug, Clone)]
struct WatchedRegion {
    region: GeofenceRegion,
    state: Containment,
}

/// Watches device position against the active regions.
#[derive(Debug, Default)]
pub struct GeofenceMonitor {
    watched: Vec<WatchedRegion>,
    last_error: Option<CapabilityError>,
}

impl GeofenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active region set.
    ///
    /// If the device cannot monitor regions the monitor is left inactive and
    /// the capability error is returned; nothing is retried.
    pub fn activate(
        &mut self,
        regions: &[GeofenceRegion],
        location: &dyn LocationSource,
    ) -> Result<(), CapabilityError> {
        self.watched.clear();

        if let Err(err) = location.check_region_monitoring() {
            tracing::warn!(error = %err, "Region monitoring unavailable");
            self.last_error = Some(err.clone());
            return Err(err);
        }
        self.last_error = None;

        if regions.len() > MAX_ACTIVE_REGIONS {
            tracing::warn!(
                requested = regions.len(),
                max = MAX_ACTIVE_REGIONS,
                "Too many regions, ignoring the extra ones"
            );
        }

        self.watched = regions
            .iter()
            .take(MAX_ACTIVE_REGIONS)
            .map(|region| WatchedRegion {
                region: *region,
                state: Containment::Outside,
            })
            .collect();

        tracing::debug!(regions = self.watched.len(), "Geofence monitor activated");
        Ok(())
    }

    /// Clears all regions and containment state.
    pub fn deactivate(&mut self) {
        if !self.watched.is_empty() {
            tracing::debug!("Geofence monitor deactivated");
        }
        self.watched.clear();
    }

    pub fn is_active(&self) -> bool {
        !self.watched.is_empty()
    }

    /// The capability error from the last activation attempt, if any.
    pub fn last_error(&self) -> Option<&CapabilityError> {
        self.last_error.as_ref()
    }

    pub fn active_regions(&self) -> impl Iterator<Item = &GeofenceRegion> {
        self.watched.iter().map(|w| &w.region)
    }

    /// Whether the last sample placed the device inside `region`.
    pub fn is_inside(&self, region: RegionId) -> bool {
        self.watched
            .iter()
            .any(|w| w.region.id == region && w.state == Containment::Inside)
    }

    /// Feeds one position sample and returns the crossings it caused.
    pub fn on_position_sample(&mut self, coordinate: Coordinate, timestamp_ms: i64) -> Vec<RegionEvent> {
        let mut events = Vec::new();

        for watched in &mut self.watched {
            let now = if watched.region.contains(&coordinate) {
                Containment::Inside
            } else {
                Containment::Outside
            };

            if now == watched.state {
                continue;
            }
            watched.state = now;

            let (direction, wanted) = match now {
                Containment::Inside => (Crossing::Enter, watched.region.notify_on_entry),
                Containment::Outside => (Crossing::Exit, watched.region.notify_on_exit),
            };

            if wanted {
                events.push(RegionEvent {
                    region: watched.region.id,
                    direction,
                    coordinate,
                    timestamp_ms,
                });
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use tripwatch_env::{MonitoringAvailability, StaticLocationSource};

    fn depot() -> Coordinate {
        Coordinate::new(52.5200, 13.4050) // Berlin
    }

    /// Roughly `metres` north of `c`.
    fn north_of(c: Coordinate, metres: f64) -> Coordinate {
        Coordinate::new(c.latitude + metres / 111_195.0, c.longitude)
    }

    fn active_monitor() -> GeofenceMonitor {
        let mut monitor = GeofenceMonitor::new();
        monitor
            .activate(
                &[GeofenceRegion::new(RegionId::Source, depot(), DEFAULT_REGION_RADIUS_M)],
                &StaticLocationSource::available(),
            )
            .unwrap();
        monitor
    }

    #[test]
    fn test_haversine_distance() {
        let a = depot();
        let b = north_of(a, 1000.0);
        assert_relative_eq!(a.distance_m(&b), 1000.0, max_relative = 0.01);
        assert_relative_eq!(a.distance_m(&a), 0.0);
    }

    #[test]
    fn test_enter_then_exit() {
        let mut monitor = active_monitor();

        assert!(monitor.on_position_sample(north_of(depot(), 200.0), 0).is_empty());

        let events = monitor.on_position_sample(north_of(depot(), 10.0), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, Crossing::Enter);
        assert_eq!(events[0].region, RegionId::Source);
        assert!(monitor.is_inside(RegionId::Source));

        let events = monitor.on_position_sample(north_of(depot(), 80.0), 2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, Crossing::Exit);
    }

    #[test]
    fn test_repeated_samples_inside_fire_once() {
        let mut monitor = active_monitor();
        let mut total = 0;
        for i in 0..20 {
            total += monitor.on_position_sample(north_of(depot(), (i % 5) as f64), i).len();
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn test_notify_flags_suppress_events_but_track_state() {
        let mut monitor = GeofenceMonitor::new();
        let mut region = GeofenceRegion::new(RegionId::Destination, depot(), 50.0);
        region.notify_on_exit = false;
        monitor.activate(&[region], &StaticLocationSource::available()).unwrap();

        assert_eq!(monitor.on_position_sample(depot(), 0).len(), 1);
        assert!(monitor.on_position_sample(north_of(depot(), 500.0), 1).is_empty());
        // Re-entry is a new crossing
        assert_eq!(monitor.on_position_sample(depot(), 2).len(), 1);
    }

    #[test]
    fn test_activation_capability_error() {
        let mut monitor = GeofenceMonitor::new();
        let result = monitor.activate(
            &[GeofenceRegion::new(RegionId::Source, depot(), 50.0)],
            &StaticLocationSource(MonitoringAvailability::Unsupported),
        );

        assert_eq!(result, Err(CapabilityError::Unsupported));
        assert!(!monitor.is_active());
        assert_eq!(monitor.last_error(), Some(&CapabilityError::Unsupported));
        assert!(monitor.on_position_sample(depot(), 0).is_empty());
    }

    #[test]
    fn test_deactivate_clears_state() {
        let mut monitor = active_monitor();
        monitor.on_position_sample(depot(), 0);
        monitor.deactivate();

        assert!(!monitor.is_active());
        assert!(!monitor.is_inside(RegionId::Source));
        assert!(monitor.on_position_sample(depot(), 1).is_empty());
    }

    #[test]
    fn test_region_limit() {
        let mut monitor = GeofenceMonitor::new();
        let regions = [
            GeofenceRegion::new(RegionId::Source, depot(), 50.0),
            GeofenceRegion::new(RegionId::Destination, north_of(depot(), 5000.0), 50.0),
            GeofenceRegion::new(RegionId::Destination, north_of(depot(), 9000.0), 50.0),
        ];
        monitor.activate(&regions, &StaticLocationSource::available()).unwrap();
        assert_eq!(monitor.active_regions().count(), MAX_ACTIVE_REGIONS);
    }

    proptest! {
        /// Enter only on the first inside sample after being outside, exit only
        /// on the first outside sample after being inside.
        #[test]
        fn prop_crossings_are_edges(offsets in proptest::collection::vec(0.0f64..150.0, 1..200)) {
            let mut monitor = active_monitor();
            let mut inside = false;

            for (i, metres) in offsets.iter().enumerate() {
                let sample = north_of(depot(), *metres);
                let now_inside = depot().distance_m(&sample) <= DEFAULT_REGION_RADIUS_M;
                let events = monitor.on_position_sample(sample, i as i64);

                match (inside, now_inside) {
                    (false, true) => {
                        prop_assert_eq!(events.len(), 1);
                        prop_assert_eq!(events[0].direction, Crossing::Enter);
                    }
                    (true, false) => {
                        prop_assert_eq!(events.len(), 1);
                        prop_assert_eq!(events[0].direction, Crossing::Exit);
                    }
                    _ => prop_assert!(events.is_empty()),
                }
                inside = now_inside;
            }
        }
    }
}
