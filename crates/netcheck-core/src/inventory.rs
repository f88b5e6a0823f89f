//! Device inventory: enumeration, filtering and connection establishment.
//!
//! Construction from external sources lives outside the engine; the runner
//! only consumes enumeration, per-device tags and the connect step.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::info;

use crate::device::Device;

/// The set of devices under management for one run.
#[derive(Clone, Default)]
pub struct Inventory {
    devices: Vec<Arc<dyn Device>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_devices(devices: Vec<Arc<dyn Device>>) -> Self {
        Self { devices }
    }

    pub fn add(&mut self, device: Arc<dyn Device>) {
        self.devices.push(device);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> &[Arc<dyn Device>] {
        &self.devices
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Device>> {
        self.devices.iter().find(|device| device.name() == name)
    }

    /// A view narrowed by tags and/or device names.
    ///
    /// A device is kept when it matches every given filter: at least one
    /// query tag (any overlap) and, separately, its name.
    pub fn filtered(&self, tags: Option<&HashSet<String>>, names: Option<&HashSet<String>>) -> Inventory {
        let devices = self
            .devices
            .iter()
            .filter(|device| {
                if let Some(tags) = tags {
                    if tags.is_disjoint(device.tags()) {
                        return false;
                    }
                }
                if let Some(names) = names {
                    if !names.contains(device.name()) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        Inventory { devices }
    }

    /// Probes every device concurrently, memoizing reachability.
    ///
    /// Returns the number of devices that came up established.
    pub async fn connect(&self) -> usize {
        let probes = join_all(self.devices.iter().map(|device| device.ensure_established())).await;
        let established = probes.into_iter().filter(|up| *up).count();
        info!("connected to {}/{} device(s)", established, self.devices.len());
        established
    }

    /// The sub-inventory of devices whose session is established.
    ///
    /// Cheap after [`connect`](Inventory::connect): reachability is memoized
    /// per device for the run.
    pub async fn established(&self) -> Inventory {
        let mut devices = Vec::new();
        for device in &self.devices {
            if device.ensure_established().await {
                devices.push(Arc::clone(device));
            }
        }
        Inventory { devices }
    }
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.devices.iter().map(|device| device.name()).collect();
        f.debug_struct("Inventory").field("devices", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDevice;

    fn inventory() -> Inventory {
        Inventory::from_devices(vec![
            Arc::new(MockDevice::reachable("leaf1", &["leaf"], "DCS-7280SR3-48YC8")),
            Arc::new(MockDevice::reachable("spine1", &["spine"], "DCS-7500R3-36CQ")),
            Arc::new(MockDevice::unreachable("leaf2")),
        ])
    }

    fn tag_set(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn test_filter_by_tags() {
        let filtered = inventory().filtered(Some(&tag_set(&["leaf"])), None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.devices()[0].name(), "leaf1");
    }

    #[test]
    fn test_filter_by_device_name_tag() {
        // A device always carries its own name as a tag.
        let filtered = inventory().filtered(Some(&tag_set(&["spine1"])), None);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_filter_by_names() {
        let filtered = inventory().filtered(None, Some(&tag_set(&["leaf1", "leaf2"])));
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_counts_established() {
        let inventory = inventory();
        assert_eq!(inventory.connect().await, 2);

        let established = inventory.established().await;
        assert_eq!(established.len(), 2);
        assert!(established.get("leaf2").is_none());
    }

    #[tokio::test]
    async fn test_connect_probes_each_device_once() {
        let device = Arc::new(MockDevice::reachable("leaf1", &[], "DCS-7280SR3-48YC8"));
        let inventory = Inventory::from_devices(vec![Arc::clone(&device) as Arc<dyn Device>]);

        inventory.connect().await;
        inventory.established().await;
        inventory.connect().await;

        assert_eq!(device.refresh_calls(), 1);
    }
}
