use crate::error::ConfigError;
use crate::types::{
    AudioStreamType, DeviceDescriptor, DeviceRole, DeviceType, DeviceUsage, PrivacyClass,
    SampleFormat, LOCAL_NETWORK_ID,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub ipc: IpcConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default = "default_privacy_table")]
    pub privacy: Vec<PrivacyEntry>,

    #[serde(default)]
    pub device: Vec<DeviceSeedConfig>,

    #[serde(default)]
    pub volume: VolumeConfig,

    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default)]
    pub format: SampleFormat,

    #[serde(default = "default_span_size_frames")]
    pub span_size_frames: u32,

    #[serde(default = "default_span_count")]
    pub span_count: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            format: SampleFormat::default(),
            span_size_frames: default_span_size_frames(),
            span_count: default_span_count(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IpcConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    #[serde(default = "default_interface_token")]
    pub interface_token: String,

    /// Directory for the ring buffer files clients map.
    #[serde(default = "default_buffer_dir")]
    pub buffer_dir: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            interface_token: default_interface_token(),
            buffer_dir: default_buffer_dir(),
        }
    }
}

/// Ordered router names per category; the first router returning a real
/// device wins.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RoutingConfig {
    #[serde(default = "default_render_chain")]
    pub media_render: Vec<String>,

    #[serde(default = "default_render_chain")]
    pub call_render: Vec<String>,

    #[serde(default = "default_render_chain")]
    pub ring_render: Vec<String>,

    #[serde(default = "default_render_chain")]
    pub tone_render: Vec<String>,

    #[serde(default = "default_render_chain")]
    pub record_capture: Vec<String>,

    #[serde(default = "default_render_chain")]
    pub call_capture: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            media_render: default_render_chain(),
            call_render: default_render_chain(),
            ring_render: default_render_chain(),
            tone_render: default_render_chain(),
            record_capture: default_render_chain(),
            call_capture: default_render_chain(),
        }
    }
}

/// One row of the device privacy table.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PrivacyEntry {
    pub device_type: DeviceType,
    pub privacy: PrivacyClass,
    pub roles: Vec<DeviceRole>,
    pub usages: Vec<DeviceUsage>,
}

impl PrivacyEntry {
    fn new(
        device_type: DeviceType,
        privacy: PrivacyClass,
        roles: &[DeviceRole],
        usages: &[DeviceUsage],
    ) -> Self {
        Self {
            device_type,
            privacy,
            roles: roles.to_vec(),
            usages: usages.to_vec(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeviceSeedConfig {
    pub device_type: DeviceType,
    pub role: DeviceRole,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub mac_address: String,

    #[serde(default = "default_network_id")]
    pub network_id: String,

    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl DeviceSeedConfig {
    pub fn to_descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(self.device_type, self.role)
            .with_name(&self.name)
            .with_mac(&self.mac_address)
            .with_network_id(&self.network_id)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VolumeConfig {
    #[serde(default = "default_min_volume")]
    pub min_volume: u8,

    #[serde(default = "default_max_volume")]
    pub max_volume: u8,

    #[serde(default = "default_volume_level")]
    pub default_level: u8,

    /// Keyed by stream type name (`music`, `ring`, ...).
    #[serde(default)]
    pub levels: BTreeMap<String, u8>,
}

impl VolumeConfig {
    pub fn level_for(&self, stream_type: AudioStreamType) -> u8 {
        self.levels
            .get(stream_type.name())
            .copied()
            .unwrap_or(self.default_level)
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            min_volume: default_min_volume(),
            max_volume: default_max_volume(),
            default_level: default_volume_level(),
            levels: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_channels() -> u16 {
    2
}

fn default_span_size_frames() -> u32 {
    240
}

fn default_span_count() -> u32 {
    8
}

fn default_socket_path() -> String {
    "/tmp/audiod.sock".to_string()
}

fn default_interface_token() -> String {
    "audiod.IAudioProcess".to_string()
}

fn default_buffer_dir() -> String {
    let shm = std::path::Path::new("/dev/shm");
    if shm.is_dir() {
        shm.display().to_string()
    } else {
        std::env::temp_dir().display().to_string()
    }
}

fn default_render_chain() -> Vec<String> {
    vec![
        "privacy_priority".to_string(),
        "public_priority".to_string(),
        "default".to_string(),
    ]
}

fn default_network_id() -> String {
    LOCAL_NETWORK_ID.to_string()
}

fn default_adapter() -> String {
    "null".to_string()
}

fn default_min_volume() -> u8 {
    0
}

fn default_max_volume() -> u8 {
    15
}

fn default_volume_level() -> u8 {
    7
}

/// Built-in privacy table used when the config file has no `[[privacy]]` rows.
pub fn default_privacy_table() -> Vec<PrivacyEntry> {
    use DeviceRole::{Input, Output};
    use DeviceUsage::{Media, Voice};
    use PrivacyClass::{Private, Public};

    vec![
        PrivacyEntry::new(DeviceType::BluetoothA2dp, Private, &[Output], &[Media]),
        PrivacyEntry::new(DeviceType::BluetoothSco, Private, &[Output, Input], &[Voice]),
        PrivacyEntry::new(DeviceType::WiredHeadset, Private, &[Output, Input], &[Media, Voice]),
        PrivacyEntry::new(DeviceType::WiredHeadphones, Private, &[Output], &[Media, Voice]),
        PrivacyEntry::new(DeviceType::UsbHeadset, Private, &[Output, Input], &[Media, Voice]),
        PrivacyEntry::new(DeviceType::UsbArmHeadset, Private, &[Output, Input], &[Media, Voice]),
        PrivacyEntry::new(DeviceType::Earpiece, Private, &[Output], &[Voice]),
        PrivacyEntry::new(DeviceType::Speaker, Public, &[Output], &[Media, Voice]),
        PrivacyEntry::new(DeviceType::Mic, Public, &[Input], &[Media, Voice]),
        PrivacyEntry::new(DeviceType::RemoteCast, Public, &[Output], &[Media]),
        PrivacyEntry::new(DeviceType::FileSink, Public, &[Output], &[Media]),
        PrivacyEntry::new(DeviceType::FileSource, Public, &[Input], &[Media]),
    ]
}

/// Interpolate `${VAR}` patterns with environment variable values.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
    let mut result = input.to_string();
    let mut errors = Vec::new();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                errors.push(var_name.to_string());
            }
        }
    }

    if let Some(first_missing) = errors.into_iter().next() {
        return Err(ConfigError::EnvVarNotFound(first_missing));
    }

    Ok(result)
}

impl AppConfig {
    /// Load configuration from a TOML file, with environment variable interpolation.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string (for testing).
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(s)?;
        let config: AppConfig = toml::from_str(&interpolated)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let general = &self.general;
        if general.sample_rate == 0 {
            return Err(ConfigError::InvalidValue("sample_rate must be non-zero".to_string()));
        }
        if general.span_size_frames == 0 {
            return Err(ConfigError::InvalidValue(
                "span_size_frames must be non-zero".to_string(),
            ));
        }
        if !general.span_count.is_power_of_two() {
            return Err(ConfigError::InvalidValue(format!(
                "span_count must be a power of two, got {}",
                general.span_count
            )));
        }
        if general.channels == 0 {
            return Err(ConfigError::InvalidValue("channels must be non-zero".to_string()));
        }
        if self.volume.min_volume > self.volume.max_volume {
            return Err(ConfigError::InvalidValue(format!(
                "min_volume {} exceeds max_volume {}",
                self.volume.min_volume, self.volume.max_volume
            )));
        }
        if self.ipc.interface_token.is_empty() {
            return Err(ConfigError::InvalidValue(
                "interface_token must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_valid_toml() {
        let toml_str = r#"
[general]
log_level = "debug"
sample_rate = 44100
channels = 1
format = "f32_le"
span_size_frames = 480
span_count = 4

[ipc]
socket_path = "/run/audiod.sock"
interface_token = "test.Token"

[[device]]
device_type = "speaker"
role = "output"
name = "Built-in Speaker"
adapter = "loopback"
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.sample_rate, 44100);
        assert_eq!(config.general.channels, 1);
        assert_eq!(config.general.format, SampleFormat::F32Le);
        assert_eq!(config.general.span_size_frames, 480);
        assert_eq!(config.general.span_count, 4);
        assert_eq!(config.ipc.socket_path, "/run/audiod.sock");
        assert_eq!(config.ipc.interface_token, "test.Token");
        assert_eq!(config.device.len(), 1);
        assert_eq!(config.device[0].device_type, DeviceType::Speaker);
        assert_eq!(config.device[0].role, DeviceRole::Output);
        assert_eq!(config.device[0].adapter, "loopback");
        assert_eq!(config.device[0].network_id, LOCAL_NETWORK_ID);
    }

    #[test]
    fn test_config_default_values() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.sample_rate, 48000);
        assert_eq!(config.general.channels, 2);
        assert_eq!(config.general.span_count, 8);
        assert_eq!(config.ipc.interface_token, "audiod.IAudioProcess");
        assert_eq!(config.routing, RoutingConfig::default());
        assert_eq!(config.privacy, default_privacy_table());
        assert!(config.device.is_empty());
        assert_eq!(config.volume.max_volume, 15);
        assert!(config.parameters.is_empty());
    }

    #[test]
    fn test_config_env_var_interpolation() {
        std::env::set_var("AUDIOD_TEST_TOKEN", "secret123");
        let toml_str = r#"
[ipc]
interface_token = "${AUDIOD_TEST_TOKEN}"
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.ipc.interface_token, "secret123");
        std::env::remove_var("AUDIOD_TEST_TOKEN");
    }

    #[test]
    fn test_config_missing_env_var_error() {
        let toml_str = r#"
[general]
log_level = "${DEFINITELY_DOES_NOT_EXIST_12345}"
"#;
        let err = AppConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("DEFINITELY_DOES_NOT_EXIST_12345"));
    }

    #[test]
    fn test_config_buffer_dir() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert!(!config.ipc.buffer_dir.is_empty());
        let config = AppConfig::from_toml_str("[ipc]\nbuffer_dir = \"/run/audiod\"\n").unwrap();
        assert_eq!(config.ipc.buffer_dir, "/run/audiod");
    }

    #[test]
    fn test_config_invalid_toml_error() {
        assert!(AppConfig::from_toml_str("this is not valid toml [[[").is_err());
    }

    #[test]
    fn test_config_rejects_non_power_of_two_span_count() {
        let err = AppConfig::from_toml_str("[general]\nspan_count = 6\n").unwrap_err();
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn test_config_rejects_inverted_volume_range() {
        let err = AppConfig::from_toml_str("[volume]\nmin_volume = 9\nmax_volume = 3\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_config_custom_privacy_table_replaces_default() {
        let toml_str = r#"
[[privacy]]
device_type = "speaker"
privacy = "private"
roles = ["output"]
usages = ["media"]
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.privacy.len(), 1);
        assert_eq!(config.privacy[0].privacy, PrivacyClass::Private);
        assert_eq!(config.privacy[0].usages, vec![DeviceUsage::Media]);
    }

    #[test]
    fn test_config_routing_override() {
        let toml_str = r#"
[routing]
media_render = ["public_priority"]
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.routing.media_render, vec!["public_priority".to_string()]);
        assert_eq!(config.routing.call_render, default_render_chain());
    }

    #[test]
    fn test_config_volume_levels_and_parameters() {
        let toml_str = r#"
[volume]
default_level = 5

[volume.levels]
music = 10
ring = 12

[parameters]
"audio.spatial" = "on"
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.volume.level_for(AudioStreamType::Music), 10);
        assert_eq!(config.volume.level_for(AudioStreamType::Ring), 12);
        assert_eq!(config.volume.level_for(AudioStreamType::Alarm), 5);
        assert_eq!(config.parameters.get("audio.spatial").map(String::as_str), Some("on"));
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = std::env::temp_dir().join("audiod_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.toml");
        std::fs::write(
            &path,
            r#"
[general]
log_level = "warn"
sample_rate = 16000
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.general.sample_rate, 16000);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_config_load_from_file_not_found() {
        let result = AppConfig::load_from_file(Path::new("/nonexistent/path.toml"));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("failed to read config file"));
    }

    #[test]
    fn test_device_seed_to_descriptor() {
        let seed = DeviceSeedConfig {
            device_type: DeviceType::BluetoothA2dp,
            role: DeviceRole::Output,
            name: "Buds".to_string(),
            mac_address: "aa:bb".to_string(),
            network_id: LOCAL_NETWORK_ID.to_string(),
            adapter: "null".to_string(),
        };
        let desc = seed.to_descriptor();
        assert_eq!(desc.device_type, DeviceType::BluetoothA2dp);
        assert_eq!(desc.mac_address, "aa:bb");
        assert_eq!(desc.connect_timestamp_ms, 0);
        assert!(!desc.is_remote());
    }
}
