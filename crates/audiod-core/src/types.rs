use serde::Deserialize;
use std::fmt;

/// Network id carried by every descriptor that lives on this machine.
pub const LOCAL_NETWORK_ID: &str = "LocalDevice";

// ── Device enums ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    None,
    Invalid,
    Earpiece,
    Speaker,
    WiredHeadset,
    WiredHeadphones,
    BluetoothSco,
    BluetoothA2dp,
    Mic,
    Wakeup,
    UsbHeadset,
    UsbArmHeadset,
    RemoteCast,
    FileSink,
    FileSource,
}

impl DeviceType {
    pub fn code(self) -> i32 {
        match self {
            DeviceType::None => -1,
            DeviceType::Invalid => 0,
            DeviceType::Earpiece => 1,
            DeviceType::Speaker => 2,
            DeviceType::WiredHeadset => 3,
            DeviceType::WiredHeadphones => 4,
            DeviceType::BluetoothSco => 7,
            DeviceType::BluetoothA2dp => 8,
            DeviceType::Mic => 15,
            DeviceType::Wakeup => 16,
            DeviceType::UsbHeadset => 22,
            DeviceType::UsbArmHeadset => 23,
            DeviceType::RemoteCast => 24,
            DeviceType::FileSink => 50,
            DeviceType::FileSource => 51,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let ty = match code {
            -1 => DeviceType::None,
            0 => DeviceType::Invalid,
            1 => DeviceType::Earpiece,
            2 => DeviceType::Speaker,
            3 => DeviceType::WiredHeadset,
            4 => DeviceType::WiredHeadphones,
            7 => DeviceType::BluetoothSco,
            8 => DeviceType::BluetoothA2dp,
            15 => DeviceType::Mic,
            16 => DeviceType::Wakeup,
            22 => DeviceType::UsbHeadset,
            23 => DeviceType::UsbArmHeadset,
            24 => DeviceType::RemoteCast,
            50 => DeviceType::FileSink,
            51 => DeviceType::FileSource,
            _ => return None,
        };
        Some(ty)
    }

    /// Role a bare device type implies when no descriptor is at hand.
    pub fn default_role(self) -> DeviceRole {
        match self {
            DeviceType::None | DeviceType::Invalid => DeviceRole::None,
            DeviceType::Mic | DeviceType::Wakeup | DeviceType::FileSource => DeviceRole::Input,
            _ => DeviceRole::Output,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    #[default]
    None,
    Input,
    Output,
}

impl DeviceRole {
    pub fn code(self) -> i32 {
        match self {
            DeviceRole::None => -1,
            DeviceRole::Input => 1,
            DeviceRole::Output => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(DeviceRole::None),
            1 => Some(DeviceRole::Input),
            2 => Some(DeviceRole::Output),
            _ => None,
        }
    }
}

/// Which streams may route to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyClass {
    #[default]
    Public,
    Private,
}

impl PrivacyClass {
    pub fn code(self) -> i32 {
        match self {
            PrivacyClass::Public => 0,
            PrivacyClass::Private => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PrivacyClass::Public),
            1 => Some(PrivacyClass::Private),
            _ => None,
        }
    }
}

/// Usage class a device advertises in the privacy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceUsage {
    Media,
    Voice,
}

// ── DeviceDescriptor ──────────────────────────────────────────

/// One physical or virtual audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub device_type: DeviceType,
    pub device_role: DeviceRole,
    pub connect_timestamp_ms: u64,
    pub privacy: PrivacyClass,
    pub network_id: String,
    pub mac_address: String,
    pub name: String,
}

impl DeviceDescriptor {
    pub fn new(device_type: DeviceType, device_role: DeviceRole) -> Self {
        Self {
            device_type,
            device_role,
            connect_timestamp_ms: 0,
            privacy: PrivacyClass::Public,
            network_id: LOCAL_NETWORK_ID.to_string(),
            mac_address: String::new(),
            name: String::new(),
        }
    }

    /// The "no device" sentinel returned when a query matches nothing.
    pub fn none() -> Self {
        Self::new(DeviceType::None, DeviceRole::None)
    }

    pub fn is_none(&self) -> bool {
        self.device_type == DeviceType::None
    }

    pub fn is_remote(&self) -> bool {
        self.network_id != LOCAL_NETWORK_ID
    }

    pub fn with_timestamp(mut self, ts_ms: u64) -> Self {
        self.connect_timestamp_ms = ts_ms;
        self
    }

    pub fn with_privacy(mut self, privacy: PrivacyClass) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_mac(mut self, mac: &str) -> Self {
        self.mac_address = mac.to_string();
        self
    }

    pub fn with_network_id(mut self, network_id: &str) -> Self {
        self.network_id = network_id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Identity used for connect/disconnect matching. Role is deliberately
    /// excluded: a reconnect may reassign it.
    pub fn same_endpoint(&self, other: &DeviceDescriptor) -> bool {
        self.device_type == other.device_type
            && self.mac_address == other.mac_address
            && self.network_id == other.network_id
    }
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?}@{}",
            self.device_type, self.device_role, self.connect_timestamp_ms
        )
    }
}

// ── Stream intent ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamUsage {
    #[default]
    Unknown,
    Media,
    Music,
    VoiceCommunication,
    VoiceAssistant,
    Alarm,
    VoiceMessage,
    Ringtone,
    Notification,
    Accessibility,
    System,
    Movie,
    Game,
    Audiobook,
    Navigation,
    Dtmf,
    EnforcedTone,
    Ultrasonic,
    VoiceRingtone,
    VoiceModemCommunication,
}

impl StreamUsage {
    pub fn code(self) -> i32 {
        match self {
            StreamUsage::Unknown => 0,
            StreamUsage::Media => 1,
            StreamUsage::Music => 101,
            StreamUsage::VoiceCommunication => 2,
            StreamUsage::VoiceAssistant => 3,
            StreamUsage::Alarm => 4,
            StreamUsage::VoiceMessage => 5,
            StreamUsage::Ringtone => 6,
            StreamUsage::Notification => 7,
            StreamUsage::Accessibility => 8,
            StreamUsage::System => 9,
            StreamUsage::Movie => 10,
            StreamUsage::Game => 11,
            StreamUsage::Audiobook => 12,
            StreamUsage::Navigation => 13,
            StreamUsage::Dtmf => 14,
            StreamUsage::EnforcedTone => 15,
            StreamUsage::Ultrasonic => 16,
            StreamUsage::VoiceRingtone => 25,
            StreamUsage::VoiceModemCommunication => 26,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let usage = match code {
            0 => StreamUsage::Unknown,
            1 => StreamUsage::Media,
            101 => StreamUsage::Music,
            2 => StreamUsage::VoiceCommunication,
            3 => StreamUsage::VoiceAssistant,
            4 => StreamUsage::Alarm,
            5 => StreamUsage::VoiceMessage,
            6 => StreamUsage::Ringtone,
            7 => StreamUsage::Notification,
            8 => StreamUsage::Accessibility,
            9 => StreamUsage::System,
            10 => StreamUsage::Movie,
            11 => StreamUsage::Game,
            12 => StreamUsage::Audiobook,
            13 => StreamUsage::Navigation,
            14 => StreamUsage::Dtmf,
            15 => StreamUsage::EnforcedTone,
            16 => StreamUsage::Ultrasonic,
            25 => StreamUsage::VoiceRingtone,
            26 => StreamUsage::VoiceModemCommunication,
            _ => return None,
        };
        Some(usage)
    }

    /// Ringtone-class usages prefer the communication render devices.
    pub fn is_ringtone_class(self) -> bool {
        matches!(self, StreamUsage::Ringtone | StreamUsage::VoiceRingtone)
    }

    pub fn category(self) -> RouterCategory {
        match self {
            StreamUsage::VoiceCommunication
            | StreamUsage::VoiceAssistant
            | StreamUsage::VoiceMessage
            | StreamUsage::VoiceModemCommunication => RouterCategory::CallRender,
            StreamUsage::Alarm
            | StreamUsage::Ringtone
            | StreamUsage::VoiceRingtone
            | StreamUsage::Ultrasonic => RouterCategory::RingRender,
            StreamUsage::Notification
            | StreamUsage::Accessibility
            | StreamUsage::System
            | StreamUsage::Dtmf
            | StreamUsage::EnforcedTone => RouterCategory::ToneRender,
            StreamUsage::Unknown
            | StreamUsage::Media
            | StreamUsage::Music
            | StreamUsage::Movie
            | StreamUsage::Game
            | StreamUsage::Audiobook
            | StreamUsage::Navigation => RouterCategory::MediaRender,
        }
    }

    /// Volume bucket this usage is governed by.
    pub fn stream_type(self) -> AudioStreamType {
        match self.category() {
            RouterCategory::CallRender => AudioStreamType::VoiceCall,
            RouterCategory::RingRender => AudioStreamType::Ring,
            RouterCategory::ToneRender => AudioStreamType::Notification,
            _ => AudioStreamType::Music,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceType {
    #[default]
    Mic,
    VoiceRecognition,
    PlaybackCapture,
    Wakeup,
    VoiceCommunication,
    Ultrasonic,
    VirtualCapture,
}

impl SourceType {
    pub fn code(self) -> i32 {
        match self {
            SourceType::Mic => 0,
            SourceType::VoiceRecognition => 1,
            SourceType::PlaybackCapture => 2,
            SourceType::Wakeup => 3,
            SourceType::VoiceCommunication => 7,
            SourceType::Ultrasonic => 8,
            SourceType::VirtualCapture => 9,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let source = match code {
            0 => SourceType::Mic,
            1 => SourceType::VoiceRecognition,
            2 => SourceType::PlaybackCapture,
            3 => SourceType::Wakeup,
            7 => SourceType::VoiceCommunication,
            8 => SourceType::Ultrasonic,
            9 => SourceType::VirtualCapture,
            _ => return None,
        };
        Some(source)
    }

    pub fn category(self) -> RouterCategory {
        match self {
            SourceType::VoiceCommunication | SourceType::VirtualCapture => {
                RouterCategory::CallCapture
            }
            _ => RouterCategory::RecordCapture,
        }
    }
}

/// Router chain a stream intent is resolved through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterCategory {
    MediaRender,
    CallRender,
    RingRender,
    ToneRender,
    RecordCapture,
    CallCapture,
}

impl RouterCategory {
    pub fn role(self) -> DeviceRole {
        match self {
            RouterCategory::RecordCapture | RouterCategory::CallCapture => DeviceRole::Input,
            _ => DeviceRole::Output,
        }
    }
}

/// What a stream was created for: playback with a usage, or capture with a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamIntent {
    Render(StreamUsage),
    Capture(SourceType),
}

impl StreamIntent {
    pub fn category(self) -> RouterCategory {
        match self {
            StreamIntent::Render(usage) => usage.category(),
            StreamIntent::Capture(source) => source.category(),
        }
    }

    pub fn role(self) -> DeviceRole {
        self.category().role()
    }
}

// ── Volume & ringer ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioStreamType {
    VoiceCall,
    Music,
    Ring,
    Notification,
    Alarm,
    VoiceAssistant,
}

impl AudioStreamType {
    pub const ALL: [AudioStreamType; 6] = [
        AudioStreamType::VoiceCall,
        AudioStreamType::Music,
        AudioStreamType::Ring,
        AudioStreamType::Notification,
        AudioStreamType::Alarm,
        AudioStreamType::VoiceAssistant,
    ];

    pub fn code(self) -> i32 {
        match self {
            AudioStreamType::VoiceCall => 0,
            AudioStreamType::Music => 1,
            AudioStreamType::Ring => 2,
            AudioStreamType::Notification => 5,
            AudioStreamType::Alarm => 4,
            AudioStreamType::VoiceAssistant => 9,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioStreamType::VoiceCall => "voice_call",
            AudioStreamType::Music => "music",
            AudioStreamType::Ring => "ring",
            AudioStreamType::Notification => "notification",
            AudioStreamType::Alarm => "alarm",
            AudioStreamType::VoiceAssistant => "voice_assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RingerMode {
    #[default]
    Normal,
    Silent,
    Vibrate,
}

impl RingerMode {
    pub fn code(self) -> i32 {
        match self {
            RingerMode::Normal => 0,
            RingerMode::Silent => 1,
            RingerMode::Vibrate => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(RingerMode::Normal),
            1 => Some(RingerMode::Silent),
            2 => Some(RingerMode::Vibrate),
            _ => None,
        }
    }
}

// ── Remote parameters ─────────────────────────────────────────

/// Key space of the networked parameter channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioParamKey {
    None,
    Volume,
    Interrupt,
    State,
    LowPower,
}

impl AudioParamKey {
    pub fn code(self) -> i32 {
        match self {
            AudioParamKey::None => 0,
            AudioParamKey::Volume => 1,
            AudioParamKey::Interrupt => 2,
            AudioParamKey::State => 5,
            AudioParamKey::LowPower => 1000,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(AudioParamKey::None),
            1 => Some(AudioParamKey::Volume),
            2 => Some(AudioParamKey::Interrupt),
            5 => Some(AudioParamKey::State),
            1000 => Some(AudioParamKey::LowPower),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioParamKey::None => "none",
            AudioParamKey::Volume => "volume",
            AudioParamKey::Interrupt => "interrupt",
            AudioParamKey::State => "state",
            AudioParamKey::LowPower => "low_power",
        }
    }
}

// ── Stream format ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    U8,
    #[default]
    S16Le,
    S24Le,
    S32Le,
    F32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le => 3,
            SampleFormat::S32Le | SampleFormat::F32Le => 4,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            SampleFormat::U8 => 8,
            SampleFormat::S16Le => 16,
            SampleFormat::S24Le => 24,
            SampleFormat::S32Le => 32,
            SampleFormat::F32Le => 33,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            8 => Some(SampleFormat::U8),
            16 => Some(SampleFormat::S16Le),
            24 => Some(SampleFormat::S24Le),
            32 => Some(SampleFormat::S32Le),
            33 => Some(SampleFormat::F32Le),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl StreamInfo {
    pub fn bytes_per_frame(&self) -> u32 {
        self.channels as u32 * self.format.bytes_per_sample()
    }
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::S16Le,
        }
    }
}

/// Everything a client states when it asks for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessConfig {
    pub intent: StreamIntent,
    pub stream_info: StreamInfo,
    pub client_uid: i32,
    pub total_size_frames: u32,
    pub span_size_frames: u32,
}
