//! Error taxonomy at the command boundary.

use thiserror::Error;
use tripwatch_env::{CapabilityError, RemoteError, TripId};

use crate::trip::TripStatus;

/// Every error that crosses the inbound command surface.
///
/// Lower-level failures (store errors, parse errors) are converted into one
/// of these four kinds before they leave the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TripError {
    /// Geofencing unsupported or permission denied. Not retried.
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// Another trip is already in progress for the driver.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Network trouble that outlived the retry budget.
    #[error("Remote temporarily unavailable: {0}")]
    TransientRemote(String),

    /// Malformed payload or a rejected precondition. Not retried.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Coarse category handed to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Capability,
    Conflict,
    TransientRemote,
    Validation,
}

impl TripError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TripError::Capability(_) => ErrorKind::Capability,
            TripError::Conflict(_) => ErrorKind::Conflict,
            TripError::TransientRemote(_) => ErrorKind::TransientRemote,
            TripError::Validation(_) => ErrorKind::Validation,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        TripError::Validation(msg.into())
    }

    pub fn unknown_trip(trip_id: TripId) -> Self {
        TripError::Validation(format!("unknown trip {trip_id}"))
    }

    pub fn invalid_transition(trip_id: TripId, from: TripStatus, action: &str) -> Self {
        TripError::Validation(format!("cannot {action} trip {trip_id} while {from}"))
    }

    pub fn no_active_trip() -> Self {
        TripError::Validation("no active trip".to_string())
    }

    /// Short human-readable message without the kind prefix.
    pub fn user_message(&self) -> String {
        match self {
            TripError::Capability(err) => err.to_string(),
            TripError::Conflict(msg)
            | TripError::TransientRemote(msg)
            | TripError::Validation(msg) => msg.clone(),
        }
    }
}

impl From<RemoteError> for TripError {
    fn from(err: RemoteError) -> Self {
        if err.is_transient() {
            TripError::TransientRemote(err.to_string())
        } else {
            TripError::Validation(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_conversion() {
        let err: TripError = RemoteError::Timeout(3000).into();
        assert_eq!(err.kind(), ErrorKind::TransientRemote);

        let err: TripError = RemoteError::validation("unknown column").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_capability_conversion() {
        let err: TripError = CapabilityError::PermissionDenied.into();
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert_eq!(err.user_message(), "Location permission denied");
    }
}
