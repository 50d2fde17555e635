use audiod_core::{
    AudioStreamType, DeviceDescriptor, DeviceRole, DeviceType, PolicyError, RingerMode,
    StreamIntent, VolumeConfig,
};
use audiod_stream::{StreamService, StreamSession};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

struct StreamVolume {
    volume: f32,
    muted: bool,
}

struct VolumeState {
    streams: HashMap<AudioStreamType, StreamVolume>,
    ringer_mode: RingerMode,
    /// Most recently activated first.
    active_devices: Vec<DeviceDescriptor>,
}

/// Per-stream-type volume and mute, ringer mode and the active device list.
///
/// Changes are pushed into the `StreamControls` of every live session of the
/// affected stream type, so the endpoint picks them up on its next cycle.
pub struct VolumePolicy {
    service: Arc<StreamService>,
    state: Mutex<VolumeState>,
}

fn stream_type_of(session: &StreamSession) -> Option<AudioStreamType> {
    match session.intent() {
        StreamIntent::Render(usage) => Some(usage.stream_type()),
        StreamIntent::Capture(_) => None,
    }
}

fn level_to_volume(level: u8, config: &VolumeConfig) -> f32 {
    if config.max_volume == 0 {
        return 0.0;
    }
    let level = level.clamp(config.min_volume, config.max_volume);
    level as f32 / config.max_volume as f32
}

impl VolumePolicy {
    pub fn new(config: &VolumeConfig, service: Arc<StreamService>) -> Self {
        let streams = AudioStreamType::ALL
            .into_iter()
            .map(|t| {
                let volume = level_to_volume(config.level_for(t), config);
                (t, StreamVolume { volume, muted: false })
            })
            .collect();
        Self {
            service,
            state: Mutex::new(VolumeState {
                streams,
                ringer_mode: RingerMode::Normal,
                active_devices: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VolumeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn effective(state: &VolumeState, stream_type: AudioStreamType) -> (f32, bool) {
        let entry = &state.streams[&stream_type];
        let silenced =
            stream_type == AudioStreamType::Ring && state.ringer_mode != RingerMode::Normal;
        (entry.volume, entry.muted || silenced)
    }

    fn push(&self, state: &VolumeState, filter: Option<AudioStreamType>) {
        for session in self.service.sessions() {
            let Some(stream_type) = stream_type_of(&session) else {
                continue;
            };
            if filter.is_some_and(|f| f != stream_type) {
                continue;
            }
            let (volume, muted) = Self::effective(state, stream_type);
            session.controls().set_volume(volume);
            session.controls().set_muted(muted);
        }
    }

    /// Applies the current policy to a freshly created session.
    pub fn attach(&self, session: &StreamSession) {
        let Some(stream_type) = stream_type_of(session) else {
            return;
        };
        let (volume, muted) = Self::effective(&self.lock(), stream_type);
        session.controls().set_volume(volume);
        session.controls().set_muted(muted);
    }

    pub fn set_stream_volume(
        &self,
        stream_type: AudioStreamType,
        volume: f32,
    ) -> Result<(), PolicyError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(PolicyError::InvalidParam(format!(
                "volume {volume} outside 0.0..=1.0"
            )));
        }
        let mut state = self.lock();
        if let Some(entry) = state.streams.get_mut(&stream_type) {
            entry.volume = volume;
        }
        self.push(&state, Some(stream_type));
        tracing::info!(stream_type = stream_type.name(), volume, "stream volume set");
        Ok(())
    }

    pub fn stream_volume(&self, stream_type: AudioStreamType) -> f32 {
        self.lock().streams[&stream_type].volume
    }

    pub fn set_stream_mute(&self, stream_type: AudioStreamType, muted: bool) {
        let mut state = self.lock();
        if let Some(entry) = state.streams.get_mut(&stream_type) {
            entry.muted = muted;
        }
        self.push(&state, Some(stream_type));
        tracing::info!(stream_type = stream_type.name(), muted, "stream mute set");
    }

    pub fn stream_mute(&self, stream_type: AudioStreamType) -> bool {
        self.lock().streams[&stream_type].muted
    }

    /// True while any session of this stream type is rendering.
    pub fn is_stream_active(&self, stream_type: AudioStreamType) -> bool {
        self.service
            .running_sessions()
            .iter()
            .any(|s| stream_type_of(s) == Some(stream_type))
    }

    pub fn set_ringer_mode(&self, mode: RingerMode) {
        let mut state = self.lock();
        state.ringer_mode = mode;
        self.push(&state, Some(AudioStreamType::Ring));
        tracing::info!(ringer_mode = ?mode, "ringer mode set");
    }

    pub fn ringer_mode(&self) -> RingerMode {
        self.lock().ringer_mode
    }

    /// Re-reads default levels after a config reload. Levels a client set
    /// explicitly are overwritten.
    pub fn apply_levels(&self, changes: &[(AudioStreamType, u8)], config: &VolumeConfig) {
        let mut state = self.lock();
        for (stream_type, level) in changes {
            if let Some(entry) = state.streams.get_mut(stream_type) {
                entry.volume = level_to_volume(*level, config);
            }
        }
        self.push(&state, None);
    }

    /// Activating a device moves it to the front of the active list.
    /// Deactivation is refused when it would leave its role without an
    /// active device.
    pub fn set_device_active(
        &self,
        device_type: DeviceType,
        active: bool,
    ) -> Result<(), PolicyError> {
        let role = device_type.default_role();
        if role == DeviceRole::None {
            return Err(PolicyError::Unsupported(format!(
                "device type {device_type:?} cannot be activated"
            )));
        }

        let mut state = self.lock();
        if active {
            state.active_devices.retain(|d| d.device_type != device_type);
            state
                .active_devices
                .insert(0, DeviceDescriptor::new(device_type, role));
        } else {
            let same_role = state
                .active_devices
                .iter()
                .filter(|d| d.device_role == role)
                .count();
            if same_role <= 1 {
                return Err(PolicyError::OperationFailed(format!(
                    "{device_type:?} is the only active {role:?} device"
                )));
            }
            state.active_devices.retain(|d| d.device_type != device_type);
        }
        tracing::info!(device_type = ?device_type, active, "device activity changed");
        Ok(())
    }

    pub fn is_device_active(&self, device_type: DeviceType) -> bool {
        self.lock()
            .active_devices
            .iter()
            .any(|d| d.device_type == device_type)
    }

    pub fn active_devices(&self) -> Vec<DeviceDescriptor> {
        self.lock().active_devices.clone()
    }
}
