//! Trip model and its mapping to the remote `trips` row.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tripwatch_env::{DriverId, TripField, TripId, TripRecord, VehicleId};

use crate::error::TripError;
use crate::geofence::{Coordinate, GeofenceRegion, RegionId};

/// Lifecycle status of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Created, not started
    Pending,
    /// Driver set, not started
    Assigned,
    InProgress,
    /// Terminal
    Delivered,
    /// Terminal. Only ever set by the backend, observed on refresh.
    Cancelled,
}

impl TripStatus {
    /// Value stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Pending => "pending",
            TripStatus::Assigned => "assigned",
            TripStatus::InProgress => "in_progress",
            TripStatus::Delivered => "delivered",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Delivered | TripStatus::Cancelled)
    }

    /// Whether `start_trip` is a legal transition from here.
    pub fn can_start(&self) -> bool {
        matches!(self, TripStatus::Pending | TripStatus::Assigned)
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = TripError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TripStatus::Pending),
            "assigned" => Ok(TripStatus::Assigned),
            "in_progress" => Ok(TripStatus::InProgress),
            "delivered" => Ok(TripStatus::Delivered),
            "cancelled" | "canceled" => Ok(TripStatus::Cancelled),
            other => Err(TripError::validation(format!("unknown trip status '{other}'"))),
        }
    }
}

/// Which inspection an operator completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InspectionPhase {
    Pre,
    Post,
}

impl InspectionPhase {
    pub fn field(&self) -> TripField {
        match self {
            InspectionPhase::Pre => TripField::PreTripInspection,
            InspectionPhase::Post => TripField::PostTripInspection,
        }
    }
}

impl std::fmt::Display for InspectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InspectionPhase::Pre => write!(f, "pre-trip"),
            InspectionPhase::Post => write!(f, "post-trip"),
        }
    }
}

/// A delivery trip as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub pickup: String,
    pub destination: String,
    pub source: Coordinate,
    pub destination_point: Coordinate,
    /// Free text, e.g. `"40 km"`
    pub distance: String,
    pub status: TripStatus,
    pub pre_trip_inspection_done: bool,
    pub post_trip_inspection_done: bool,
    /// Unix milliseconds
    pub started_at: Option<i64>,
    /// Unix milliseconds. Set iff `status == Delivered`.
    pub ended_at: Option<i64>,
    pub notes: String,
    pub vehicle_id: VehicleId,
    pub driver_id: Option<DriverId>,
}

impl Trip {
    pub fn inspection_done(&self, phase: InspectionPhase) -> bool {
        match phase {
            InspectionPhase::Pre => self.pre_trip_inspection_done,
            InspectionPhase::Post => self.post_trip_inspection_done,
        }
    }

    pub fn set_inspection(&mut self, phase: InspectionPhase, done: bool) {
        match phase {
            InspectionPhase::Pre => self.pre_trip_inspection_done = done,
            InspectionPhase::Post => self.post_trip_inspection_done = done,
        }
    }

    pub fn inspections_complete(&self) -> bool {
        self.pre_trip_inspection_done && self.post_trip_inspection_done
    }

    /// Parsed `distance` in kilometres, if it makes sense.
    pub fn distance_km(&self) -> Option<f64> {
        parse_distance_km(&self.distance)
    }

    /// Source and destination zones for this trip.
    pub fn regions(&self, radius_m: f64) -> [GeofenceRegion; 2] {
        [
            GeofenceRegion::new(RegionId::Source, self.source, radius_m),
            GeofenceRegion::new(RegionId::Destination, self.destination_point, radius_m),
        ]
    }

    /// Decodes a remote row.
    pub fn from_record(record: TripRecord) -> Result<Self, TripError> {
        let status: TripStatus = record.status.parse()?;
        Ok(Self {
            id: record.id,
            pickup: record.pickup,
            destination: record.destination,
            source: Coordinate::new(record.source_latitude, record.source_longitude),
            destination_point: Coordinate::new(
                record.destination_latitude,
                record.destination_longitude,
            ),
            distance: record.distance,
            status,
            pre_trip_inspection_done: record.has_completed_pre_trip,
            post_trip_inspection_done: record.has_completed_post_trip,
            started_at: record.start_time,
            ended_at: record.end_time,
            notes: record.notes,
            vehicle_id: record.vehicle_id,
            driver_id: record.driver_id,
        })
    }

    /// Encodes into a remote row.
    pub fn to_record(&self) -> TripRecord {
        TripRecord {
            id: self.id,
            status: self.status.as_str().to_string(),
            has_completed_pre_trip: self.pre_trip_inspection_done,
            has_completed_post_trip: self.post_trip_inspection_done,
            start_time: self.started_at,
            end_time: self.ended_at,
            driver_id: self.driver_id,
            vehicle_id: self.vehicle_id,
            pickup: self.pickup.clone(),
            destination: self.destination.clone(),
            source_latitude: self.source.latitude,
            source_longitude: self.source.longitude,
            destination_latitude: self.destination_point.latitude,
            destination_longitude: self.destination_point.longitude,
            distance: self.distance.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Parses free-text distances such as `"40 km"`, `"12.5km"`, `"800 m"`,
/// `"25 mi"` or a bare number (kilometres).
pub fn parse_distance_km(text: &str) -> Option<f64> {
    let text = text.trim().to_ascii_lowercase();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;

    let km = match unit.trim() {
        "" | "km" | "kms" | "kilometers" | "kilometres" => value,
        "m" | "meters" | "metres" => value / 1000.0,
        "mi" | "mile" | "miles" => value * 1.609_344,
        _ => return None,
    };

    (km.is_finite() && km > 0.0).then_some(km)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_record() -> TripRecord {
        TripRecord {
            id: TripId::from_seed(1),
            status: "assigned".into(),
            has_completed_pre_trip: true,
            has_completed_post_trip: false,
            start_time: None,
            end_time: None,
            driver_id: Some(DriverId::from_seed(7)),
            vehicle_id: VehicleId::from_seed(3),
            pickup: "Depot 4".into(),
            destination: "Harbour Gate".into(),
            source_latitude: 52.52,
            source_longitude: 13.405,
            destination_latitude: 52.70,
            destination_longitude: 13.60,
            distance: "40 km".into(),
            notes: "call on arrival".into(),
        }
    }

    #[test]
    fn test_parse_distance() {
        assert_eq!(parse_distance_km("40 km"), Some(40.0));
        assert_eq!(parse_distance_km("12.5KM"), Some(12.5));
        assert_eq!(parse_distance_km("800 m"), Some(0.8));
        assert_eq!(parse_distance_km("7"), Some(7.0));
        assert!((parse_distance_km("10 miles").unwrap() - 16.09344).abs() < 1e-9);
        assert_eq!(parse_distance_km("far away"), None);
        assert_eq!(parse_distance_km(""), None);
        assert_eq!(parse_distance_km("0 km"), None);
        assert_eq!(parse_distance_km("40 parsecs"), None);
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            TripStatus::Pending,
            TripStatus::Assigned,
            TripStatus::InProgress,
            TripStatus::Delivered,
            TripStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TripStatus>().unwrap(), status);
        }
        assert!("archived".parse::<TripStatus>().is_err());
    }

    #[test]
    fn test_from_record() {
        let trip = Trip::from_record(sample_record()).unwrap();
        assert_eq!(trip.status, TripStatus::Assigned);
        assert!(trip.pre_trip_inspection_done);
        assert!(!trip.inspections_complete());
        assert_eq!(trip.distance_km(), Some(40.0));
        assert_eq!(trip.to_record(), sample_record());
    }

    #[test]
    fn test_from_record_rejects_unknown_status() {
        let mut record = sample_record();
        record.status = "teleported".into();
        assert!(matches!(Trip::from_record(record), Err(TripError::Validation(_))));
    }

    #[test]
    fn test_regions() {
        let trip = Trip::from_record(sample_record()).unwrap();
        let [source, destination] = trip.regions(50.0);
        assert_eq!(source.id, RegionId::Source);
        assert_eq!(destination.center, trip.destination_point);
        assert_eq!(destination.radius_m, 50.0);
    }
}
