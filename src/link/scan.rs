//! Bookkeeping for one time-boxed discovery window.
//!
//! The coordinator does not touch the radio or own a timer; the link actor
//! feeds it advertisements and asks for the outcome when the window closes.

use crate::link::types::DeviceDescriptor;
use uuid::Uuid;

/// Result of feeding one advertisement to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First sighting of this address in the current window.
    New { priority: bool },
    /// Already seen; any new information was merged into the existing entry.
    Duplicate,
    /// Already seen, and this advertisement was the first to carry the
    /// expected service.
    BecamePriority,
}

/// How a discovery window ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// At least one device was found.
    Complete(Vec<DeviceDescriptor>),
    /// The window elapsed with nothing found.
    Failed,
}

/// Collects unique devices for the current scan window.
#[derive(Debug, Clone)]
pub struct ScanCoordinator {
    expected_service: Uuid,
    devices: Vec<DeviceDescriptor>,
}

impl ScanCoordinator {
    pub fn new(expected_service: Uuid) -> Self {
        Self {
            expected_service,
            devices: Vec::new(),
        }
    }

    /// Start a new window, forgetting the previous results.
    pub fn begin(&mut self) {
        self.devices.clear();
    }

    /// Record an advertisement.
    pub fn observe(&mut self, device: DeviceDescriptor) -> Observation {
        let key = device.key();
        if let Some(existing) = self.devices.iter_mut().find(|d| d.key() == key) {
            let was_priority = existing.advertises(&self.expected_service);
            if !existing.has_name() && device.has_name() {
                existing.display_name = device.display_name;
            }
            existing
                .advertised_services
                .extend(device.advertised_services);
            if device.rssi.is_some() {
                existing.rssi = device.rssi;
            }
            if !was_priority && existing.advertises(&self.expected_service) {
                return Observation::BecamePriority;
            }
            return Observation::Duplicate;
        }

        let priority = device.advertises(&self.expected_service);
        self.devices.push(device);
        Observation::New { priority }
    }

    /// Devices seen so far, in discovery order.
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Devices advertising the expected service.
    pub fn priority_devices(&self) -> Vec<DeviceDescriptor> {
        self.devices
            .iter()
            .filter(|d| d.advertises(&self.expected_service))
            .cloned()
            .collect()
    }

    pub fn find(&self, address: &str) -> Option<&DeviceDescriptor> {
        let key = address.to_ascii_lowercase();
        self.devices.iter().find(|d| d.key() == key)
    }

    /// The window elapsed.
    pub fn finish(&mut self) -> ScanOutcome {
        if self.devices.is_empty() {
            ScanOutcome::Failed
        } else {
            ScanOutcome::Complete(std::mem::take(&mut self.devices))
        }
    }

    /// The caller stopped the scan early. Never a failure.
    pub fn cancel(&mut self) -> Vec<DeviceDescriptor> {
        std::mem::take(&mut self.devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HEART_RATE_SERVICE_UUID;

    fn other_service() -> Uuid {
        Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb)
    }

    #[test]
    fn test_dedup_is_case_insensitive() {
        let mut scan = ScanCoordinator::new(HEART_RATE_SERVICE_UUID);
        scan.begin();

        assert_eq!(
            scan.observe(DeviceDescriptor::new("aa:bb", None, [other_service()])),
            Observation::New { priority: false }
        );
        assert_eq!(
            scan.observe(DeviceDescriptor::new("AA:BB", None, [])),
            Observation::Duplicate
        );
        assert_eq!(scan.devices().len(), 1);
    }

    #[test]
    fn test_later_name_fills_in() {
        let mut scan = ScanCoordinator::new(HEART_RATE_SERVICE_UUID);
        scan.observe(DeviceDescriptor::new("AA:BB", None, []));
        scan.observe(DeviceDescriptor::new("aa:bb", Some("Strap"), [HEART_RATE_SERVICE_UUID]));

        let device = scan.find("AA:BB").unwrap();
        assert_eq!(device.display_name, "Strap");
        assert!(device.advertises(&HEART_RATE_SERVICE_UUID));
        assert_eq!(scan.priority_devices().len(), 1);
    }

    #[test]
    fn test_late_service_promotes_known_device() {
        let mut scan = ScanCoordinator::new(HEART_RATE_SERVICE_UUID);
        assert_eq!(
            scan.observe(DeviceDescriptor::new("AA:77", None, [])),
            Observation::New { priority: false }
        );
        assert_eq!(
            scan.observe(DeviceDescriptor::new("aa:77", None, [HEART_RATE_SERVICE_UUID])),
            Observation::BecamePriority
        );
        // Only the first advertisement carrying the service promotes.
        assert_eq!(
            scan.observe(DeviceDescriptor::new("AA:77", None, [HEART_RATE_SERVICE_UUID])),
            Observation::Duplicate
        );
        assert_eq!(scan.devices().len(), 1);
        assert_eq!(scan.priority_devices().len(), 1);
    }

    #[test]
    fn test_priority_flag() {
        let mut scan = ScanCoordinator::new(HEART_RATE_SERVICE_UUID);
        assert_eq!(
            scan.observe(DeviceDescriptor::new("11", Some("HR"), [HEART_RATE_SERVICE_UUID])),
            Observation::New { priority: true }
        );
    }

    #[test]
    fn test_finish_and_cancel() {
        let mut scan = ScanCoordinator::new(HEART_RATE_SERVICE_UUID);
        scan.begin();
        assert_eq!(scan.finish(), ScanOutcome::Failed);
        assert!(scan.cancel().is_empty());

        scan.observe(DeviceDescriptor::new("11", None, []));
        match scan.finish() {
            ScanOutcome::Complete(devices) => assert_eq!(devices.len(), 1),
            ScanOutcome::Failed => panic!("expected a completed scan"),
        }

        scan.observe(DeviceDescriptor::new("22", None, []));
        assert_eq!(scan.cancel().len(), 1);
        assert!(scan.devices().is_empty());
    }

    #[test]
    fn test_begin_clears_previous_window() {
        let mut scan = ScanCoordinator::new(HEART_RATE_SERVICE_UUID);
        scan.observe(DeviceDescriptor::new("11", None, []));
        scan.begin();
        assert!(scan.devices().is_empty());
    }
}
