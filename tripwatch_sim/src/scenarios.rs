//! Named trip scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// TRIP-001: Start, drive, arrive, delivered
    HappyDelivery,

    /// TRIP-002: Second start while a trip is running
    DuplicateStart,

    /// TRIP-003: Trip runs past its ETA and duration limit
    OverdueTrip,

    /// TRIP-004: Transient write failures and a read outage
    FlakyNetwork,

    /// TRIP-005: Jittery GPS at the pickup
    SourceDwell,

    /// TRIP-006: Delivery held until inspections are done
    StrictInspection,

    /// TRIP-007: Backend rejects every write
    RejectedWrite,

    /// TRIP-008: Device without region monitoring
    NoRegionMonitoring,

    /// TRIP-009: Dispatcher cancels the running trip
    RemoteCancel,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::HappyDelivery,
            ScenarioId::DuplicateStart,
            ScenarioId::OverdueTrip,
            ScenarioId::FlakyNetwork,
            ScenarioId::SourceDwell,
            ScenarioId::StrictInspection,
            ScenarioId::RejectedWrite,
            ScenarioId::NoRegionMonitoring,
            ScenarioId::RemoteCancel,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::HappyDelivery => "happy_delivery",
            ScenarioId::DuplicateStart => "duplicate_start",
            ScenarioId::OverdueTrip => "overdue_trip",
            ScenarioId::FlakyNetwork => "flaky_network",
            ScenarioId::SourceDwell => "source_dwell",
            ScenarioId::StrictInspection => "strict_inspection",
            ScenarioId::RejectedWrite => "rejected_write",
            ScenarioId::NoRegionMonitoring => "no_region_monitoring",
            ScenarioId::RemoteCancel => "remote_cancel",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::HappyDelivery => {
                "Start at the pickup, drive the route, implicit delivery on arrival"
            }
            ScenarioId::DuplicateStart => {
                "Start a second trip while one is in progress, expect a conflict"
            }
            ScenarioId::OverdueTrip => "Stall en route, expect one delay alert per condition",
            ScenarioId::FlakyNetwork => {
                "3 failed writes then success, a read outage falls back to the snapshot"
            }
            ScenarioId::SourceDwell => "GPS jitter around the pickup, exactly one ready-to-start",
            ScenarioId::StrictInspection => {
                "Arrival with inspections outstanding waits for the driver"
            }
            ScenarioId::RejectedWrite => "Every write rejected, local state kept and event logged",
            ScenarioId::NoRegionMonitoring => {
                "Geofencing unavailable, manual completion, reactivation after permission"
            }
            ScenarioId::RemoteCancel => "Running trip cancelled from the back office",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "happy_delivery" | "happydelivery" | "trip-001" => Ok(ScenarioId::HappyDelivery),
            "duplicate_start" | "duplicatestart" | "trip-002" => Ok(ScenarioId::DuplicateStart),
            "overdue_trip" | "overduetrip" | "trip-003" => Ok(ScenarioId::OverdueTrip),
            "flaky_network" | "flakynetwork" | "trip-004" => Ok(ScenarioId::FlakyNetwork),
            "source_dwell" | "sourcedwell" | "trip-005" => Ok(ScenarioId::SourceDwell),
            "strict_inspection" | "strictinspection" | "trip-006" => {
                Ok(ScenarioId::StrictInspection)
            }
            "rejected_write" | "rejectedwrite" | "trip-007" => Ok(ScenarioId::RejectedWrite),
            "no_region_monitoring" | "noregionmonitoring" | "trip-008" => {
                Ok(ScenarioId::NoRegionMonitoring)
            }
            "remote_cancel" | "remotecancel" | "trip-009" => Ok(ScenarioId::RemoteCancel),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
