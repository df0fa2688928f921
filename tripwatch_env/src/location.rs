//! Device location capabilities.

use thiserror::Error;

/// Whether the device can monitor circular regions right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringAvailability {
    Available,
    /// Hardware/OS has no region monitoring
    Unsupported,
    /// User has not granted (always-on) location permission
    PermissionDenied,
}

/// Region monitoring could not start.
///
/// Reported once and never retried automatically; the caller resolves the
/// cause (e.g. asks for permission) and activates again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("Region monitoring is not supported on this device")]
    Unsupported,

    #[error("Location permission denied")]
    PermissionDenied,
}

/// Abstraction over the platform's location facility.
///
/// Position samples themselves are pushed into the engine's event queue by
/// whatever feeds GPS; this trait only answers capability questions.
pub trait LocationSource: Send + Sync + 'static {
    fn region_monitoring(&self) -> MonitoringAvailability;

    /// Converts the availability into a result.
    fn check_region_monitoring(&self) -> Result<(), CapabilityError> {
        match self.region_monitoring() {
            MonitoringAvailability::Available => Ok(()),
            MonitoringAvailability::Unsupported => Err(CapabilityError::Unsupported),
            MonitoringAvailability::PermissionDenied => Err(CapabilityError::PermissionDenied),
        }
    }
}

/// A location source with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticLocationSource(pub MonitoringAvailability);

impl StaticLocationSource {
    pub fn available() -> Self {
        Self(MonitoringAvailability::Available)
    }
}

impl LocationSource for StaticLocationSource {
    fn region_monitoring(&self) -> MonitoringAvailability {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_region_monitoring() {
        assert!(StaticLocationSource::available().check_region_monitoring().is_ok());
        assert_eq!(
            StaticLocationSource(MonitoringAvailability::PermissionDenied).check_region_monitoring(),
            Err(CapabilityError::PermissionDenied)
        );
    }
}
