//! Bluetooth LE scan result aggregation
//!
//! Collects the devices reported during one scan window, keyed by address.

use std::collections::BTreeMap;

use log::trace;

use crate::gatt::types::{BdAddr, Device};

/// Deduplicates discovered peripherals by address during a scan window.
///
/// Advertisement reports for an address already seen overwrite the earlier
/// entry, so the snapshot always holds the latest device handle.
#[derive(Debug, Default)]
pub struct ScanResultAggregator {
    results: BTreeMap<BdAddr, Device>,
}

impl ScanResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for the device's address
    pub fn add_result(&mut self, device: Device) {
        trace!("Scan result {} ({:?})", device.address, device.name);
        self.results.insert(device.address, device);
    }

    /// Drop every entry. Called at the start of each scan.
    pub fn reset(&mut self) {
        self.results.clear();
    }

    /// Current address to device mapping
    pub fn snapshot(&self) -> BTreeMap<BdAddr, Device> {
        self.results.clone()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(last: u8, name: &str) -> Device {
        Device {
            address: BdAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, last]),
            name: Some(name.to_string()),
            rssi: Some(-60),
        }
    }

    #[test]
    fn test_duplicate_reports_keep_latest() {
        let mut aggregator = ScanResultAggregator::new();
        aggregator.add_result(device(0x01, "first"));
        aggregator.add_result(device(0x02, "other"));
        aggregator.add_result(device(0x01, "second"));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.len(), 2);
        let entry = &snapshot[&BdAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x01])];
        assert_eq!(entry.name.as_deref(), Some("second"));
    }

    #[test]
    fn test_reset_clears_previous_window() {
        let mut aggregator = ScanResultAggregator::new();
        aggregator.add_result(device(0x01, "first"));
        assert!(!aggregator.is_empty());

        aggregator.reset();
        assert!(aggregator.is_empty());
        assert!(aggregator.snapshot().is_empty());
    }
}
