use crate::config::AppConfig;
use crate::types::AudioStreamType;

/// Describes runtime-safe changes between two configs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDiff {
    pub log_level_change: Option<String>,
    pub volume_changes: Vec<(AudioStreamType, u8)>,
    pub parameter_changes: Vec<(String, String)>,
    pub non_reloadable: Vec<String>,
}

impl ConfigDiff {
    /// Compare two configs and return the diff.
    /// Reloadable: log level, default volume levels, parameters.
    /// Non-reloadable: stream format, IPC endpoint, routing chains, privacy table.
    pub fn diff(old: &AppConfig, new: &AppConfig) -> Self {
        let mut result = Self::default();

        if old.general.log_level != new.general.log_level {
            result.log_level_change = Some(new.general.log_level.clone());
        }

        if old.general.sample_rate != new.general.sample_rate {
            result.non_reloadable.push(format!(
                "sample_rate changed ({} → {}), requires restart",
                old.general.sample_rate, new.general.sample_rate
            ));
        }
        if old.general.channels != new.general.channels
            || old.general.format != new.general.format
        {
            result
                .non_reloadable
                .push("stream format changed, requires restart".to_string());
        }
        if old.general.span_size_frames != new.general.span_size_frames
            || old.general.span_count != new.general.span_count
        {
            result
                .non_reloadable
                .push("buffer geometry changed, requires restart".to_string());
        }

        if old.ipc.socket_path != new.ipc.socket_path {
            result.non_reloadable.push(format!(
                "socket_path changed ('{}' → '{}'), requires restart",
                old.ipc.socket_path, new.ipc.socket_path
            ));
        }
        if old.ipc.buffer_dir != new.ipc.buffer_dir {
            result
                .non_reloadable
                .push("buffer_dir changed, requires restart".to_string());
        }
        if old.ipc.interface_token != new.ipc.interface_token {
            result
                .non_reloadable
                .push("interface_token changed, requires restart".to_string());
        }

        if old.routing != new.routing {
            result
                .non_reloadable
                .push("routing chains changed, requires restart".to_string());
        }
        if old.privacy != new.privacy {
            result
                .non_reloadable
                .push("privacy table changed, requires restart".to_string());
        }

        for stream_type in AudioStreamType::ALL {
            let before = old.volume.level_for(stream_type);
            let after = new.volume.level_for(stream_type);
            if before != after {
                result.volume_changes.push((stream_type, after));
            }
        }

        for (key, value) in &new.parameters {
            if old.parameters.get(key) != Some(value) {
                result.parameter_changes.push((key.clone(), value.clone()));
            }
        }

        result
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
