use std::collections::HashMap;

use crate::constants::defaults;
use crate::helpers::rand_hex;

use super::entities::Device;

pub type Snapshot = HashMap<String, Device>;

/// Authoritative id → device map
///
/// Holds no lock: it is owned by the protocol loop, which is the only writer.
/// Other tasks only ever see cloned snapshots.
#[derive(Debug, Default)]
pub struct Registry {
    devices: HashMap<String, Device>,
}

impl Registry {
    pub fn from_snapshot(devices: Snapshot) -> Self {
        Registry { devices }
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    pub fn upsert(&mut self, id: impl Into<String>, device: Device) {
        self.devices.insert(id.into(), device);
    }

    pub fn remove(&mut self, id: &str) -> Option<Device> {
        self.devices.remove(id)
    }

    pub fn devices(&self) -> &HashMap<String, Device> {
        &self.devices
    }

    pub fn snapshot(&self) -> Snapshot {
        self.devices.clone()
    }

    /// Move the device under `old_id` to a freshly generated id and drop its token.
    /// Returns the new id, or `None` if there was nothing under `old_id`.
    pub fn reassign(&mut self, old_id: &str) -> Option<String> {
        let mut device = self.remove(old_id)?;
        let new_id = loop {
            let candidate = rand_hex(defaults::DEVICE_ID_BYTES);
            if !self.devices.contains_key(&candidate) {
                break candidate;
            }
            log::warn!("Generated device ID {candidate} already in use; drawing another");
        };
        device.id = new_id.clone();
        device.token.clear();
        self.upsert(new_id.clone(), device);
        Some(new_id)
    }
}
