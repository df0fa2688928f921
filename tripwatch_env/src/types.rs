//! Shared identifiers and the remote persistence schema.
//!
//! Field names on [`TripRecord`] and [`NotificationRow`] are a contract with
//! the storage collaborator; do not rename them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an id from a UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Creates a deterministic id from a seed (for simulation).
            pub fn from_seed(seed: u64) -> Self {
                let mut bytes = [0u8; 16];
                bytes[0..8].copy_from_slice(&seed.to_le_bytes());
                bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
                Self(Uuid::from_bytes(bytes))
            }

            /// Returns the inner UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Show first 8 chars for readability
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }
    };
}

uuid_id!(
    /// Opaque unique identifier of a trip.
    TripId
);
uuid_id!(
    /// Identifier of a driver (one engine session per driver).
    DriverId
);
uuid_id!(
    /// Identifier of the vehicle assigned to a trip.
    VehicleId
);

/// A row of the remote `trips` table.
///
/// `status` stays a plain string here; the engine parses it into its own
/// status enum so that unknown values are a validation problem of the engine,
/// not a decode failure of the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub id: TripId,
    pub status: String,
    pub has_completed_pre_trip: bool,
    pub has_completed_post_trip: bool,
    /// Unix milliseconds
    pub start_time: Option<i64>,
    /// Unix milliseconds
    pub end_time: Option<i64>,
    pub driver_id: Option<DriverId>,
    pub vehicle_id: VehicleId,
    #[serde(default)]
    pub pickup: String,
    #[serde(default)]
    pub destination: String,
    pub source_latitude: f64,
    pub source_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    /// Free-text distance such as `"40 km"`
    #[serde(default)]
    pub distance: String,
    #[serde(default)]
    pub notes: String,
}

/// A row of the remote `notifications` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: Uuid,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// `driver` or `fleet_operator`; empty on rows written before the column existed
    #[serde(default)]
    pub audience: String,
    /// Unix milliseconds
    pub created_at: i64,
    pub is_read: bool,
}

/// Engine-owned columns of the `trips` table that `update_trip_field` may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TripField {
    Status,
    PreTripInspection,
    PostTripInspection,
    StartTime,
    EndTime,
}

impl TripField {
    /// Column name in the remote schema.
    pub fn column(&self) -> &'static str {
        match self {
            TripField::Status => "status",
            TripField::PreTripInspection => "has_completed_pre_trip",
            TripField::PostTripInspection => "has_completed_post_trip",
            TripField::StartTime => "start_time",
            TripField::EndTime => "end_time",
        }
    }
}

impl std::fmt::Display for TripField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// Value written to a single trip column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Millis(i64),
    Text(String),
    Null,
}
