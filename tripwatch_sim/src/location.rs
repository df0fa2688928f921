//! Switchable location capability for scenarios.

use std::sync::Mutex;
use tripwatch_env::{LocationSource, MonitoringAvailability};

/// A location source whose availability can change mid-run, e.g. when the
/// driver grants permission after a failed activation.
#[derive(Debug)]
pub struct SimLocationSource {
    availability: Mutex<MonitoringAvailability>,
}

impl SimLocationSource {
    pub fn new(availability: MonitoringAvailability) -> Self {
        Self {
            availability: Mutex::new(availability),
        }
    }

    pub fn set(&self, availability: MonitoringAvailability) {
        *self.availability.lock().unwrap_or_else(|e| e.into_inner()) = availability;
    }
}

impl Default for SimLocationSource {
    fn default() -> Self {
        Self::new(MonitoringAvailability::Available)
    }
}

impl LocationSource for SimLocationSource {
    fn region_monitoring(&self) -> MonitoringAvailability {
        *self.availability.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripwatch_env::CapabilityError;

    #[test]
    fn test_availability_toggles() {
        let source = SimLocationSource::new(MonitoringAvailability::Unsupported);
        assert_eq!(source.check_region_monitoring(), Err(CapabilityError::Unsupported));

        source.set(MonitoringAvailability::Available);
        assert!(source.check_region_monitoring().is_ok());
    }
}
