pub mod config;
pub mod config_diff;
pub mod error;
pub mod event;
pub mod types;

pub use config::{AppConfig, DeviceSeedConfig, PrivacyEntry, RoutingConfig, VolumeConfig};
pub use config_diff::ConfigDiff;
pub use error::{ConfigError, DeviceError, IpcError, PolicyError, StatusCode, StreamError};
pub use event::{
    DeviceChange, DeviceChangeKind, ParameterChange, Partition, SessionEvent, SessionId,
    SessionNotification,
};
pub use types::{
    AudioParamKey, AudioStreamType, DeviceDescriptor, DeviceRole, DeviceType, DeviceUsage,
    PrivacyClass, ProcessConfig, RingerMode, RouterCategory, SampleFormat, SourceType, StreamInfo,
    StreamIntent, StreamUsage, LOCAL_NETWORK_ID,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_config_fields() {
        let config = ProcessConfig {
            intent: StreamIntent::Render(StreamUsage::Media),
            stream_info: StreamInfo::default(),
            client_uid: 1000,
            total_size_frames: 1920,
            span_size_frames: 240,
        };
        assert_eq!(config.total_size_frames / config.span_size_frames, 8);
        assert_eq!(config.stream_info.bytes_per_frame(), 4);
        assert_eq!(config.intent.category(), RouterCategory::MediaRender);
    }

    #[test]
    fn test_descriptor_builder_chain() {
        let desc = DeviceDescriptor::new(DeviceType::RemoteCast, DeviceRole::Output)
            .with_network_id("peer-1")
            .with_name("Living room")
            .with_timestamp(42);
        assert!(desc.is_remote());
        assert_eq!(desc.name, "Living room");
        assert_eq!(desc.connect_timestamp_ms, 42);
    }
}
