use audiod_core::config::{default_privacy_table, PrivacyEntry};
use audiod_core::{
    DeviceChange, DeviceChangeKind, DeviceDescriptor, DeviceRole, DeviceType, DeviceUsage,
    Partition, PrivacyClass,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;

struct DeviceSets {
    generation: u64,
    /// Every connected device in connection order.
    connected: Vec<DeviceDescriptor>,
    partitions: HashMap<Partition, Vec<DeviceDescriptor>>,
    subscribers: Vec<mpsc::UnboundedSender<DeviceChange>>,
}

/// Owns the connected-device sets, partitioned by privacy, role and usage.
///
/// Every mutation bumps a generation counter and is published to subscribers
/// while the set lock is still held, so receivers observe changes in the
/// order they were applied.
pub struct DeviceManager {
    privacy_table: Vec<PrivacyEntry>,
    default_render_type: DeviceType,
    default_capture_type: DeviceType,
    epoch: Instant,
    sets: Mutex<DeviceSets>,
}

impl DeviceManager {
    pub fn new(privacy_table: Vec<PrivacyEntry>) -> Self {
        Self {
            privacy_table,
            default_render_type: DeviceType::Speaker,
            default_capture_type: DeviceType::Mic,
            epoch: Instant::now(),
            sets: Mutex::new(DeviceSets {
                generation: 0,
                connected: Vec::new(),
                partitions: HashMap::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn with_default_types(mut self, render: DeviceType, capture: DeviceType) -> Self {
        self.default_render_type = render;
        self.default_capture_type = capture;
        self
    }

    fn lock(&self) -> MutexGuard<'_, DeviceSets> {
        // A panic while holding the lock cannot leave the sets half-updated:
        // every mutation is a push or a retain on owned vectors.
        self.sets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Receives every `DeviceChange` from this point on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Partitions a descriptor belongs to according to the privacy table.
    pub fn classify(&self, desc: &DeviceDescriptor) -> Vec<Partition> {
        let mut result = Vec::new();
        if desc.is_remote() {
            match desc.device_role {
                DeviceRole::Output => result.push(Partition::RemoteRender),
                DeviceRole::Input => result.push(Partition::RemoteCapture),
                DeviceRole::None => {}
            }
        }
        for partition in Partition::ALL {
            let Some(privacy) = partition.privacy() else {
                continue;
            };
            if desc.device_role != partition.role() {
                continue;
            }
            let usage = match partition {
                Partition::CommRender(_) | Partition::CommCapture(_) => Some(DeviceUsage::Voice),
                Partition::MediaRender(_) | Partition::MediaCapture(_) => Some(DeviceUsage::Media),
                _ => None,
            };
            if self.table_matches(desc.device_type, privacy, partition.role(), usage) {
                result.push(partition);
            }
        }
        result
    }

    fn table_matches(
        &self,
        device_type: DeviceType,
        privacy: PrivacyClass,
        role: DeviceRole,
        usage: Option<DeviceUsage>,
    ) -> bool {
        self.privacy_table.iter().any(|entry| {
            entry.device_type == device_type
                && entry.privacy == privacy
                && entry.roles.contains(&role)
                && usage.map_or(!entry.usages.is_empty(), |u| entry.usages.contains(&u))
        })
    }

    /// Adds a device, or refreshes it if the same endpoint is already known.
    ///
    /// A zero timestamp is replaced with the current monotonic time. A
    /// refreshed device moves to the end of connection order.
    pub fn on_device_connected(&self, desc: DeviceDescriptor) -> DeviceChange {
        let mut desc = desc;
        if desc.connect_timestamp_ms == 0 {
            desc.connect_timestamp_ms = self.now_ms();
        }
        let partitions = self.classify(&desc);
        if let Some(privacy) = partitions.iter().find_map(|p| p.privacy()) {
            desc.privacy = privacy;
        }

        let mut sets = self.lock();
        let previous = remove_endpoint(&mut sets, &desc);
        let kind = if previous.is_empty() {
            DeviceChangeKind::Connected
        } else {
            DeviceChangeKind::Reconnected
        };

        sets.connected.push(desc.clone());
        for partition in &partitions {
            sets.partitions
                .entry(*partition)
                .or_default()
                .push(desc.clone());
        }

        let mut touched = previous;
        for partition in partitions {
            if !touched.contains(&partition) {
                touched.push(partition);
            }
        }

        tracing::info!(
            device_type = ?desc.device_type,
            role = ?desc.device_role,
            ts = desc.connect_timestamp_ms,
            partitions = touched.len(),
            "device {:?}",
            kind
        );
        publish(&mut sets, kind, desc, touched)
    }

    /// Removes a device matched by type, mac address and network id. Unknown
    /// devices are ignored and produce no change.
    pub fn on_device_disconnected(&self, desc: &DeviceDescriptor) -> Option<DeviceChange> {
        let mut sets = self.lock();
        let known = sets
            .connected
            .iter()
            .find(|d| d.same_endpoint(desc))
            .cloned()?;
        let touched = remove_endpoint(&mut sets, desc);
        tracing::info!(
            device_type = ?known.device_type,
            partitions = touched.len(),
            "device disconnected"
        );
        Some(publish(&mut sets, DeviceChangeKind::Disconnected, known, touched))
    }

    pub fn partition(&self, partition: Partition) -> Vec<DeviceDescriptor> {
        self.lock()
            .partitions
            .get(&partition)
            .cloned()
            .unwrap_or_default()
    }

    pub fn comm_render(&self, privacy: PrivacyClass) -> Vec<DeviceDescriptor> {
        self.partition(Partition::CommRender(privacy))
    }

    pub fn comm_capture(&self, privacy: PrivacyClass) -> Vec<DeviceDescriptor> {
        self.partition(Partition::CommCapture(privacy))
    }

    pub fn media_render(&self, privacy: PrivacyClass) -> Vec<DeviceDescriptor> {
        self.partition(Partition::MediaRender(privacy))
    }

    pub fn media_capture(&self, privacy: PrivacyClass) -> Vec<DeviceDescriptor> {
        self.partition(Partition::MediaCapture(privacy))
    }

    pub fn capture(&self, privacy: PrivacyClass) -> Vec<DeviceDescriptor> {
        self.partition(Partition::Capture(privacy))
    }

    pub fn remote_render(&self) -> Vec<DeviceDescriptor> {
        self.partition(Partition::RemoteRender)
    }

    pub fn remote_capture(&self) -> Vec<DeviceDescriptor> {
        self.partition(Partition::RemoteCapture)
    }

    /// Union of the partitions for one role and privacy class, in connection
    /// order and without duplicates.
    pub fn devices(&self, role: DeviceRole, privacy: PrivacyClass) -> Vec<DeviceDescriptor> {
        let sets = self.lock();
        sets.connected
            .iter()
            .filter(|d| {
                Partition::ALL.iter().any(|p| {
                    p.role() == role
                        && p.privacy() == Some(privacy)
                        && sets
                            .partitions
                            .get(p)
                            .is_some_and(|members| members.iter().any(|m| m.same_endpoint(d)))
                })
            })
            .cloned()
            .collect()
    }

    pub fn connected_devices(&self) -> Vec<DeviceDescriptor> {
        self.lock().connected.clone()
    }

    pub fn default_render_device(&self) -> DeviceDescriptor {
        self.latest_of(self.default_render_type, DeviceRole::Output)
    }

    pub fn default_capture_device(&self) -> DeviceDescriptor {
        self.latest_of(self.default_capture_type, DeviceRole::Input)
    }

    fn latest_of(&self, device_type: DeviceType, role: DeviceRole) -> DeviceDescriptor {
        let sets = self.lock();
        let candidates: Vec<&DeviceDescriptor> = sets
            .connected
            .iter()
            .filter(|d| d.device_type == device_type && d.device_role == role)
            .collect();
        latest(candidates.into_iter())
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new(default_privacy_table())
    }
}

/// Most recently connected device; later entries win ties.
pub fn latest<'a>(devices: impl Iterator<Item = &'a DeviceDescriptor>) -> DeviceDescriptor {
    devices
        .fold(None::<&DeviceDescriptor>, |best, d| match best {
            Some(b) if b.connect_timestamp_ms > d.connect_timestamp_ms => Some(b),
            _ => Some(d),
        })
        .cloned()
        .unwrap_or_else(DeviceDescriptor::none)
}

fn remove_endpoint(sets: &mut DeviceSets, desc: &DeviceDescriptor) -> Vec<Partition> {
    sets.connected.retain(|d| !d.same_endpoint(desc));
    let mut touched = Vec::new();
    for (partition, members) in sets.partitions.iter_mut() {
        let before = members.len();
        members.retain(|d| !d.same_endpoint(desc));
        if members.len() != before {
            touched.push(*partition);
        }
    }
    touched
}

fn publish(
    sets: &mut DeviceSets,
    kind: DeviceChangeKind,
    device: DeviceDescriptor,
    partitions: Vec<Partition>,
) -> DeviceChange {
    sets.generation += 1;
    let change = DeviceChange {
        generation: sets.generation,
        kind,
        device,
        partitions,
    };
    sets.subscribers
        .retain(|tx| tx.send(change.clone()).is_ok());
    change
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speaker(ts: u64) -> DeviceDescriptor {
        DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output).with_timestamp(ts)
    }

    fn a2dp(mac: &str, ts: u64) -> DeviceDescriptor {
        DeviceDescriptor::new(DeviceType::BluetoothA2dp, DeviceRole::Output)
            .with_mac(mac)
            .with_timestamp(ts)
    }

    #[test]
    fn test_speaker_joins_public_render_partitions() {
        let manager = DeviceManager::default();
        manager.on_device_connected(speaker(10));

        assert_eq!(manager.media_render(PrivacyClass::Public).len(), 1);
        assert_eq!(manager.comm_render(PrivacyClass::Public).len(), 1);
        assert!(manager.media_render(PrivacyClass::Private).is_empty());
        assert!(manager.media_capture(PrivacyClass::Public).is_empty());
    }

    #[test]
    fn test_a2dp_is_private_media_only() {
        let manager = DeviceManager::default();
        let change = manager.on_device_connected(a2dp("aa", 10));

        assert_eq!(
            change.partitions,
            vec![Partition::MediaRender(PrivacyClass::Private)]
        );
        assert_eq!(change.device.privacy, PrivacyClass::Private);
        assert!(manager.comm_render(PrivacyClass::Private).is_empty());
    }

    #[test]
    fn test_mic_joins_capture_partitions() {
        let manager = DeviceManager::default();
        manager.on_device_connected(DeviceDescriptor::new(DeviceType::Mic, DeviceRole::Input));

        assert_eq!(manager.media_capture(PrivacyClass::Public).len(), 1);
        assert_eq!(manager.comm_capture(PrivacyClass::Public).len(), 1);
        assert_eq!(manager.capture(PrivacyClass::Public).len(), 1);
    }

    #[test]
    fn test_zero_timestamp_replaced_with_now() {
        let manager = DeviceManager::default();
        let change = manager.on_device_connected(speaker(0));
        assert!(change.device.connect_timestamp_ms > 0);
    }

    #[test]
    fn test_reconnect_updates_instead_of_duplicating() {
        let manager = DeviceManager::default();
        manager.on_device_connected(a2dp("aa", 10));
        let change = manager.on_device_connected(a2dp("aa", 50));

        assert_eq!(change.kind, DeviceChangeKind::Reconnected);
        let members = manager.media_render(PrivacyClass::Private);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].connect_timestamp_ms, 50);
        assert_eq!(manager.connected_devices().len(), 1);
    }

    #[test]
    fn test_disconnect_matches_type_and_mac() {
        let manager = DeviceManager::default();
        manager.on_device_connected(a2dp("aa", 10));
        manager.on_device_connected(a2dp("bb", 20));

        let change = manager.on_device_disconnected(&a2dp("aa", 0)).unwrap();
        assert_eq!(change.kind, DeviceChangeKind::Disconnected);
        let members = manager.media_render(PrivacyClass::Private);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].mac_address, "bb");
    }

    #[test]
    fn test_disconnect_unknown_is_noop() {
        let manager = DeviceManager::default();
        manager.on_device_connected(speaker(10));
        let generation = manager.generation();

        assert!(manager.on_device_disconnected(&a2dp("zz", 0)).is_none());
        assert_eq!(manager.generation(), generation);
    }

    #[test]
    fn test_remote_device_joins_remote_partition() {
        let manager = DeviceManager::default();
        let remote = DeviceDescriptor::new(DeviceType::RemoteCast, DeviceRole::Output)
            .with_network_id("peer-1")
            .with_timestamp(5);
        manager.on_device_connected(remote);

        assert_eq!(manager.remote_render().len(), 1);
        assert!(manager.remote_capture().is_empty());
        assert_eq!(manager.media_render(PrivacyClass::Public).len(), 1);
    }

    #[test]
    fn test_devices_by_role_and_privacy_dedupes() {
        let manager = DeviceManager::default();
        manager.on_device_connected(speaker(10));
        manager.on_device_connected(DeviceDescriptor::new(DeviceType::Mic, DeviceRole::Input));

        let outputs = manager.devices(DeviceRole::Output, PrivacyClass::Public);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].device_type, DeviceType::Speaker);
        let inputs = manager.devices(DeviceRole::Input, PrivacyClass::Public);
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn test_default_devices() {
        let manager = DeviceManager::default();
        assert!(manager.default_render_device().is_none());
        manager.on_device_connected(speaker(10));
        assert_eq!(
            manager.default_render_device().device_type,
            DeviceType::Speaker
        );
        assert!(manager.default_capture_device().is_none());
    }

    #[test]
    fn test_latest_tie_break_prefers_later_insertion() {
        let first = a2dp("aa", 100);
        let second = a2dp("bb", 100);
        let chosen = latest([&first, &second].into_iter());
        assert_eq!(chosen.mac_address, "bb");

        let older = a2dp("cc", 300);
        let chosen = latest([&older, &second].into_iter());
        assert_eq!(chosen.mac_address, "cc");
    }

    #[tokio::test]
    async fn test_subscribers_receive_changes_in_order() {
        let manager = DeviceManager::default();
        let mut rx = manager.subscribe();

        manager.on_device_connected(speaker(10));
        manager.on_device_connected(a2dp("aa", 20));
        manager.on_device_disconnected(&a2dp("aa", 0));

        let mut generations = Vec::new();
        for _ in 0..3 {
            let change = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            generations.push(change.generation);
        }
        assert_eq!(generations, vec![1, 2, 3]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let manager = DeviceManager::default();
        let rx = manager.subscribe();
        drop(rx);
        manager.on_device_connected(speaker(10));
        assert!(manager.lock().subscribers.is_empty());
    }
}
