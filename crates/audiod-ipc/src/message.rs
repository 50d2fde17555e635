use crate::parcel::{ParcelReader, ParcelWriter};
use audiod_core::{
    AudioParamKey, AudioStreamType, DeviceDescriptor, DeviceRole, DeviceType, IpcError,
    ParameterChange, PrivacyClass, ProcessConfig, RingerMode, SampleFormat, SessionId,
    SessionNotification, SourceType, StatusCode, StreamInfo, StreamIntent, StreamUsage,
};
use audiod_stream::{BufferHandle, HandleInfo, SessionPosition};
use bytes::{BufMut, Bytes, BytesMut};

// ── Request codes ─────────────────────────────────────────────

/// Wire tag of every request the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    CreateSession,
    ResolveBuffer,
    Start,
    Pause,
    Resume,
    Stop,
    Release,
    RequestHandleInfo,
    GetDevices,
    SetStreamVolume,
    GetStreamVolume,
    SetStreamMute,
    GetStreamMute,
    IsStreamActive,
    SetDeviceActive,
    IsDeviceActive,
    SetRingerMode,
    GetRingerMode,
    GetAudioParameter,
    SetAudioParameter,
    GetRemoteAudioParameter,
    SetRemoteAudioParameter,
}

impl RequestCode {
    pub const ALL: [RequestCode; 22] = [
        RequestCode::CreateSession,
        RequestCode::ResolveBuffer,
        RequestCode::Start,
        RequestCode::Pause,
        RequestCode::Resume,
        RequestCode::Stop,
        RequestCode::Release,
        RequestCode::RequestHandleInfo,
        RequestCode::GetDevices,
        RequestCode::SetStreamVolume,
        RequestCode::GetStreamVolume,
        RequestCode::SetStreamMute,
        RequestCode::GetStreamMute,
        RequestCode::IsStreamActive,
        RequestCode::SetDeviceActive,
        RequestCode::IsDeviceActive,
        RequestCode::SetRingerMode,
        RequestCode::GetRingerMode,
        RequestCode::GetAudioParameter,
        RequestCode::SetAudioParameter,
        RequestCode::GetRemoteAudioParameter,
        RequestCode::SetRemoteAudioParameter,
    ];

    pub fn code(self) -> u32 {
        match self {
            RequestCode::CreateSession => 1,
            RequestCode::ResolveBuffer => 2,
            RequestCode::Start => 3,
            RequestCode::Pause => 4,
            RequestCode::Resume => 5,
            RequestCode::Stop => 6,
            RequestCode::Release => 7,
            RequestCode::RequestHandleInfo => 8,
            RequestCode::GetDevices => 20,
            RequestCode::SetStreamVolume => 30,
            RequestCode::GetStreamVolume => 31,
            RequestCode::SetStreamMute => 32,
            RequestCode::GetStreamMute => 33,
            RequestCode::IsStreamActive => 34,
            RequestCode::SetDeviceActive => 35,
            RequestCode::IsDeviceActive => 36,
            RequestCode::SetRingerMode => 37,
            RequestCode::GetRingerMode => 38,
            RequestCode::GetAudioParameter => 40,
            RequestCode::SetAudioParameter => 41,
            RequestCode::GetRemoteAudioParameter => 42,
            RequestCode::SetRemoteAudioParameter => 43,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

// ── Requests ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    CreateSession(ProcessConfig),
    ResolveBuffer { session_id: SessionId },
    Start { session_id: SessionId },
    Pause { session_id: SessionId, is_flush: bool },
    Resume { session_id: SessionId },
    Stop { session_id: SessionId },
    Release { session_id: SessionId },
    RequestHandleInfo { session_id: SessionId },
    GetDevices { role: DeviceRole, privacy: PrivacyClass },
    SetStreamVolume { stream_type: AudioStreamType, volume: f32 },
    GetStreamVolume { stream_type: AudioStreamType },
    SetStreamMute { stream_type: AudioStreamType, muted: bool },
    GetStreamMute { stream_type: AudioStreamType },
    IsStreamActive { stream_type: AudioStreamType },
    SetDeviceActive { device_type: DeviceType, active: bool },
    IsDeviceActive { device_type: DeviceType },
    SetRingerMode(RingerMode),
    GetRingerMode,
    GetAudioParameter { key: String },
    SetAudioParameter { key: String, value: String },
    GetRemoteAudioParameter { network_id: String, key: AudioParamKey, condition: String },
    SetRemoteAudioParameter {
        network_id: String,
        key: AudioParamKey,
        condition: String,
        value: String,
    },
}

fn malformed(what: &str, code: i32) -> IpcError {
    IpcError::Malformed(format!("unknown {what} {code}"))
}

fn read_stream_type(r: &mut ParcelReader) -> Result<AudioStreamType, IpcError> {
    let code = r.read_i32()?;
    AudioStreamType::from_code(code).ok_or_else(|| malformed("stream type", code))
}

fn read_device_type(r: &mut ParcelReader) -> Result<DeviceType, IpcError> {
    let code = r.read_i32()?;
    DeviceType::from_code(code).ok_or_else(|| malformed("device type", code))
}

fn write_config(w: &mut ParcelWriter, config: &ProcessConfig) {
    match config.intent {
        StreamIntent::Render(usage) => w.write_i32(0).write_i32(usage.code()),
        StreamIntent::Capture(source) => w.write_i32(1).write_i32(source.code()),
    };
    w.write_u32(config.stream_info.sample_rate)
        .write_u32(config.stream_info.channels as u32)
        .write_i32(config.stream_info.format.code())
        .write_i32(config.client_uid)
        .write_u32(config.total_size_frames)
        .write_u32(config.span_size_frames);
}

fn read_config(r: &mut ParcelReader) -> Result<ProcessConfig, IpcError> {
    let kind = r.read_i32()?;
    let code = r.read_i32()?;
    let intent = match kind {
        0 => StreamIntent::Render(
            StreamUsage::from_code(code).ok_or_else(|| malformed("stream usage", code))?,
        ),
        1 => StreamIntent::Capture(
            SourceType::from_code(code).ok_or_else(|| malformed("source type", code))?,
        ),
        other => return Err(malformed("intent kind", other)),
    };
    let sample_rate = r.read_u32()?;
    let channels = r.read_u32()?;
    let channels = u16::try_from(channels)
        .map_err(|_| IpcError::Malformed(format!("channel count {channels}")))?;
    let format = r.read_i32()?;
    let format = SampleFormat::from_code(format).ok_or_else(|| malformed("sample format", format))?;
    Ok(ProcessConfig {
        intent,
        stream_info: StreamInfo {
            sample_rate,
            channels,
            format,
        },
        client_uid: r.read_i32()?,
        total_size_frames: r.read_u32()?,
        span_size_frames: r.read_u32()?,
    })
}

impl Request {
    pub fn code(&self) -> RequestCode {
        match self {
            Request::CreateSession(_) => RequestCode::CreateSession,
            Request::ResolveBuffer { .. } => RequestCode::ResolveBuffer,
            Request::Start { .. } => RequestCode::Start,
            Request::Pause { .. } => RequestCode::Pause,
            Request::Resume { .. } => RequestCode::Resume,
            Request::Stop { .. } => RequestCode::Stop,
            Request::Release { .. } => RequestCode::Release,
            Request::RequestHandleInfo { .. } => RequestCode::RequestHandleInfo,
            Request::GetDevices { .. } => RequestCode::GetDevices,
            Request::SetStreamVolume { .. } => RequestCode::SetStreamVolume,
            Request::GetStreamVolume { .. } => RequestCode::GetStreamVolume,
            Request::SetStreamMute { .. } => RequestCode::SetStreamMute,
            Request::GetStreamMute { .. } => RequestCode::GetStreamMute,
            Request::IsStreamActive { .. } => RequestCode::IsStreamActive,
            Request::SetDeviceActive { .. } => RequestCode::SetDeviceActive,
            Request::IsDeviceActive { .. } => RequestCode::IsDeviceActive,
            Request::SetRingerMode(_) => RequestCode::SetRingerMode,
            Request::GetRingerMode => RequestCode::GetRingerMode,
            Request::GetAudioParameter { .. } => RequestCode::GetAudioParameter,
            Request::SetAudioParameter { .. } => RequestCode::SetAudioParameter,
            Request::GetRemoteAudioParameter { .. } => RequestCode::GetRemoteAudioParameter,
            Request::SetRemoteAudioParameter { .. } => RequestCode::SetRemoteAudioParameter,
        }
    }

    /// Full request frame: code, interface token, payload.
    pub fn encode(&self, token: &str) -> Bytes {
        let mut w = ParcelWriter::new();
        w.write_u32(self.code().code()).write_string(token);
        self.write_payload(&mut w);
        w.finish()
    }

    fn write_payload(&self, w: &mut ParcelWriter) {
        match self {
            Request::CreateSession(config) => write_config(w, config),
            Request::ResolveBuffer { session_id }
            | Request::Start { session_id }
            | Request::Resume { session_id }
            | Request::Stop { session_id }
            | Request::Release { session_id }
            | Request::RequestHandleInfo { session_id } => {
                w.write_u64(*session_id);
            }
            Request::Pause {
                session_id,
                is_flush,
            } => {
                w.write_u64(*session_id).write_bool(*is_flush);
            }
            Request::GetDevices { role, privacy } => {
                w.write_i32(role.code()).write_i32(privacy.code());
            }
            Request::SetStreamVolume {
                stream_type,
                volume,
            } => {
                w.write_i32(stream_type.code()).write_f32(*volume);
            }
            Request::SetStreamMute { stream_type, muted } => {
                w.write_i32(stream_type.code()).write_bool(*muted);
            }
            Request::GetStreamVolume { stream_type }
            | Request::GetStreamMute { stream_type }
            | Request::IsStreamActive { stream_type } => {
                w.write_i32(stream_type.code());
            }
            Request::SetDeviceActive {
                device_type,
                active,
            } => {
                w.write_i32(device_type.code()).write_bool(*active);
            }
            Request::IsDeviceActive { device_type } => {
                w.write_i32(device_type.code());
            }
            Request::SetRingerMode(mode) => {
                w.write_i32(mode.code());
            }
            Request::GetRingerMode => {}
            Request::GetAudioParameter { key } => {
                w.write_string(key);
            }
            Request::SetAudioParameter { key, value } => {
                w.write_string(key).write_string(value);
            }
            Request::GetRemoteAudioParameter {
                network_id,
                key,
                condition,
            } => {
                w.write_string(network_id)
                    .write_i32(key.code())
                    .write_string(condition);
            }
            Request::SetRemoteAudioParameter {
                network_id,
                key,
                condition,
                value,
            } => {
                w.write_string(network_id)
                    .write_i32(key.code())
                    .write_string(condition)
                    .write_string(value);
            }
        }
    }

    /// Decodes the payload that follows code and token.
    pub fn decode_payload(code: RequestCode, r: &mut ParcelReader) -> Result<Self, IpcError> {
        let request = match code {
            RequestCode::CreateSession => Request::CreateSession(read_config(r)?),
            RequestCode::ResolveBuffer => Request::ResolveBuffer {
                session_id: r.read_u64()?,
            },
            RequestCode::Start => Request::Start {
                session_id: r.read_u64()?,
            },
            RequestCode::Pause => Request::Pause {
                session_id: r.read_u64()?,
                is_flush: r.read_bool()?,
            },
            RequestCode::Resume => Request::Resume {
                session_id: r.read_u64()?,
            },
            RequestCode::Stop => Request::Stop {
                session_id: r.read_u64()?,
            },
            RequestCode::Release => Request::Release {
                session_id: r.read_u64()?,
            },
            RequestCode::RequestHandleInfo => Request::RequestHandleInfo {
                session_id: r.read_u64()?,
            },
            RequestCode::GetDevices => {
                let role = r.read_i32()?;
                let role = DeviceRole::from_code(role).ok_or_else(|| malformed("role", role))?;
                let privacy = r.read_i32()?;
                let privacy =
                    PrivacyClass::from_code(privacy).ok_or_else(|| malformed("privacy", privacy))?;
                Request::GetDevices { role, privacy }
            }
            RequestCode::SetStreamVolume => Request::SetStreamVolume {
                stream_type: read_stream_type(r)?,
                volume: r.read_f32()?,
            },
            RequestCode::GetStreamVolume => Request::GetStreamVolume {
                stream_type: read_stream_type(r)?,
            },
            RequestCode::SetStreamMute => Request::SetStreamMute {
                stream_type: read_stream_type(r)?,
                muted: r.read_bool()?,
            },
            RequestCode::GetStreamMute => Request::GetStreamMute {
                stream_type: read_stream_type(r)?,
            },
            RequestCode::IsStreamActive => Request::IsStreamActive {
                stream_type: read_stream_type(r)?,
            },
            RequestCode::SetDeviceActive => Request::SetDeviceActive {
                device_type: read_device_type(r)?,
                active: r.read_bool()?,
            },
            RequestCode::IsDeviceActive => Request::IsDeviceActive {
                device_type: read_device_type(r)?,
            },
            RequestCode::SetRingerMode => {
                let mode = r.read_i32()?;
                Request::SetRingerMode(
                    RingerMode::from_code(mode).ok_or_else(|| malformed("ringer mode", mode))?,
                )
            }
            RequestCode::GetRingerMode => Request::GetRingerMode,
            RequestCode::GetAudioParameter => Request::GetAudioParameter {
                key: r.read_string()?,
            },
            RequestCode::SetAudioParameter => Request::SetAudioParameter {
                key: r.read_string()?,
                value: r.read_string()?,
            },
            RequestCode::GetRemoteAudioParameter => Request::GetRemoteAudioParameter {
                network_id: r.read_string()?,
                key: read_param_key(r)?,
                condition: r.read_string()?,
            },
            RequestCode::SetRemoteAudioParameter => Request::SetRemoteAudioParameter {
                network_id: r.read_string()?,
                key: read_param_key(r)?,
                condition: r.read_string()?,
                value: r.read_string()?,
            },
        };
        Ok(request)
    }
}

fn read_param_key(r: &mut ParcelReader) -> Result<AudioParamKey, IpcError> {
    let code = r.read_i32()?;
    AudioParamKey::from_code(code).ok_or_else(|| malformed("parameter key", code))
}

// ── Responses ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Empty,
    Session {
        session_id: SessionId,
        device: DeviceDescriptor,
    },
    /// `path` names the ring buffer file to map; empty when the buffer is
    /// not shareable.
    Handle {
        handle: BufferHandle,
        path: String,
    },
    HandleInfo(HandleInfo),
    Devices(Vec<DeviceDescriptor>),
    Volume(f32),
    Flag(bool),
    RingerMode(RingerMode),
    Parameter(String),
}

fn write_handle(w: &mut ParcelWriter, h: &BufferHandle) {
    w.write_u64(h.id)
        .write_u32(h.span_count)
        .write_u32(h.span_size_bytes);
}

fn read_handle(r: &mut ParcelReader) -> Result<BufferHandle, IpcError> {
    Ok(BufferHandle {
        id: r.read_u64()?,
        span_count: r.read_u32()?,
        span_size_bytes: r.read_u32()?,
    })
}

impl Response {
    /// Successful response frame: status 0 then payload.
    pub fn encode(&self) -> Bytes {
        let mut w = ParcelWriter::new();
        w.write_i32(StatusCode::Success.code());
        match self {
            Response::Empty => {}
            Response::Session { session_id, device } => {
                w.write_u64(*session_id).write_device(device);
            }
            Response::Handle { handle, path } => {
                write_handle(&mut w, handle);
                w.write_string(path);
            }
            Response::HandleInfo(info) => {
                write_handle(&mut w, &info.handle);
                w.write_u64(info.read_cursor)
                    .write_u64(info.write_cursor)
                    .write_u64(info.position.frames_written)
                    .write_u64(info.position.frames_read)
                    .write_u64(info.position.underruns)
                    .write_u64(info.position.overruns)
                    .write_u64(info.last_timestamp_ns);
            }
            Response::Devices(devices) => {
                w.write_u32(devices.len() as u32);
                for d in devices {
                    w.write_device(d);
                }
            }
            Response::Volume(v) => {
                w.write_f32(*v);
            }
            Response::Flag(b) => {
                w.write_bool(*b);
            }
            Response::RingerMode(mode) => {
                w.write_i32(mode.code());
            }
            Response::Parameter(value) => {
                w.write_string(value);
            }
        }
        w.finish()
    }

    /// Failure frame: just the status.
    pub fn encode_status(status: StatusCode) -> Bytes {
        let mut w = ParcelWriter::new();
        w.write_i32(status.code());
        w.finish()
    }

    /// The payload shape is implied by the request that was sent.
    pub fn decode_payload(code: RequestCode, r: &mut ParcelReader) -> Result<Self, IpcError> {
        let response = match code {
            RequestCode::CreateSession => Response::Session {
                session_id: r.read_u64()?,
                device: r.read_device()?,
            },
            RequestCode::ResolveBuffer => Response::Handle {
                handle: read_handle(r)?,
                path: r.read_string()?,
            },
            RequestCode::RequestHandleInfo => {
                let handle = read_handle(r)?;
                Response::HandleInfo(HandleInfo {
                    handle,
                    read_cursor: r.read_u64()?,
                    write_cursor: r.read_u64()?,
                    position: SessionPosition {
                        frames_written: r.read_u64()?,
                        frames_read: r.read_u64()?,
                        underruns: r.read_u64()?,
                        overruns: r.read_u64()?,
                    },
                    last_timestamp_ns: r.read_u64()?,
                })
            }
            RequestCode::GetDevices => {
                let n = r.read_u32()? as usize;
                // Each descriptor is at least 32 bytes on the wire.
                if n > r.remaining() / 32 {
                    return Err(IpcError::Malformed(format!("device count {n}")));
                }
                let mut devices = Vec::with_capacity(n);
                for _ in 0..n {
                    devices.push(r.read_device()?);
                }
                Response::Devices(devices)
            }
            RequestCode::GetStreamVolume => Response::Volume(r.read_f32()?),
            RequestCode::GetStreamMute
            | RequestCode::IsStreamActive
            | RequestCode::IsDeviceActive => Response::Flag(r.read_bool()?),
            RequestCode::GetRingerMode => {
                let mode = r.read_i32()?;
                Response::RingerMode(
                    RingerMode::from_code(mode).ok_or_else(|| malformed("ringer mode", mode))?,
                )
            }
            RequestCode::GetAudioParameter | RequestCode::GetRemoteAudioParameter => {
                Response::Parameter(r.read_string()?)
            }
            _ => Response::Empty,
        };
        Ok(response)
    }
}

// ── Server-to-client frames ───────────────────────────────────

/// Leading word of a frame answering the client's last request.
pub const FRAME_REPLY: u32 = 0;
/// Leading word of a frame the server pushed on its own.
pub const FRAME_NOTIFICATION: u32 = 1;

/// Wraps a dispatcher reply for the wire.
pub fn reply_frame(reply: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + reply.len());
    buf.put_u32_le(FRAME_REPLY);
    buf.put_slice(reply);
    buf.freeze()
}

/// Events pushed to a connection without a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Session(SessionNotification),
    Parameter(ParameterChange),
}

const NOTE_DEVICE_CHANGED: u32 = 0;
const NOTE_TEARDOWN: u32 = 1;
const NOTE_PARAMETER: u32 = 2;

impl Notification {
    /// Complete frame body, including the leading `FRAME_NOTIFICATION`.
    pub fn encode(&self) -> Bytes {
        let mut w = ParcelWriter::new();
        w.write_u32(FRAME_NOTIFICATION);
        match self {
            Notification::Session(SessionNotification::DeviceChanged {
                session_id,
                previous,
                current,
            }) => {
                w.write_u32(NOTE_DEVICE_CHANGED)
                    .write_u64(*session_id)
                    .write_device(previous)
                    .write_device(current);
            }
            Notification::Session(SessionNotification::Teardown { session_id, reason }) => {
                w.write_u32(NOTE_TEARDOWN)
                    .write_u64(*session_id)
                    .write_string(reason);
            }
            Notification::Parameter(change) => {
                w.write_u32(NOTE_PARAMETER)
                    .write_bool(change.network_id.is_some())
                    .write_string(change.network_id.as_deref().unwrap_or_default())
                    .write_string(&change.key)
                    .write_string(&change.condition)
                    .write_string(&change.value);
            }
        }
        w.finish()
    }

    /// Decodes what follows the `FRAME_NOTIFICATION` word.
    pub fn decode_payload(r: &mut ParcelReader) -> Result<Self, IpcError> {
        let tag = r.read_u32()?;
        let note = match tag {
            NOTE_DEVICE_CHANGED => Notification::Session(SessionNotification::DeviceChanged {
                session_id: r.read_u64()?,
                previous: r.read_device()?,
                current: r.read_device()?,
            }),
            NOTE_TEARDOWN => Notification::Session(SessionNotification::Teardown {
                session_id: r.read_u64()?,
                reason: r.read_string()?,
            }),
            NOTE_PARAMETER => {
                let remote = r.read_bool()?;
                let network_id = r.read_string()?;
                Notification::Parameter(ParameterChange {
                    network_id: remote.then_some(network_id),
                    key: r.read_string()?,
                    condition: r.read_string()?,
                    value: r.read_string()?,
                })
            }
            other => return Err(malformed("notification tag", other as i32)),
        };
        Ok(note)
    }

    /// The session this notification concerns, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Notification::Session(SessionNotification::DeviceChanged { session_id, .. })
            | Notification::Session(SessionNotification::Teardown { session_id, .. }) => {
                Some(*session_id)
            }
            Notification::Parameter(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_request(frame: Bytes) -> (RequestCode, String, Request) {
        let mut r = ParcelReader::new(frame);
        let code = RequestCode::from_code(r.read_u32().unwrap()).unwrap();
        let token = r.read_string().unwrap();
        let request = Request::decode_payload(code, &mut r).unwrap();
        r.finish().unwrap();
        (code, token, request)
    }

    #[test]
    fn test_request_codes_unique() {
        let mut codes: Vec<u32> = RequestCode::ALL.iter().map(|c| c.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), RequestCode::ALL.len());
        assert_eq!(RequestCode::from_code(999), None);
    }

    #[test]
    fn test_create_session_frame() {
        let config = ProcessConfig {
            intent: StreamIntent::Capture(SourceType::VoiceCommunication),
            stream_info: StreamInfo {
                sample_rate: 16000,
                channels: 1,
                format: SampleFormat::S16Le,
            },
            client_uid: 1013,
            total_size_frames: 1280,
            span_size_frames: 320,
        };
        let request = Request::CreateSession(config);
        let (code, token, decoded) = decode_request(request.encode("audiod.IAudioProcess"));
        assert_eq!(code, RequestCode::CreateSession);
        assert_eq!(token, "audiod.IAudioProcess");
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_remote_parameter_frame() {
        let request = Request::SetRemoteAudioParameter {
            network_id: "net-7".to_string(),
            key: AudioParamKey::Volume,
            condition: "EVENT_TYPE=1;".to_string(),
            value: "3".to_string(),
        };
        let (_, _, decoded) = decode_request(request.encode("t"));
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_unknown_enum_in_payload_is_malformed() {
        let mut w = ParcelWriter::new();
        w.write_i32(77);
        let mut r = ParcelReader::new(w.finish());
        assert!(matches!(
            Request::decode_payload(RequestCode::SetRingerMode, &mut r),
            Err(IpcError::Malformed(_))
        ));
    }

    #[test]
    fn test_devices_response() {
        let devices = vec![
            DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output).with_timestamp(5),
            DeviceDescriptor::new(DeviceType::Mic, DeviceRole::Input).with_timestamp(6),
        ];
        let mut r = ParcelReader::new(Response::Devices(devices.clone()).encode());
        assert_eq!(r.read_i32().unwrap(), 0);
        assert_eq!(
            Response::decode_payload(RequestCode::GetDevices, &mut r).unwrap(),
            Response::Devices(devices)
        );
    }

    #[test]
    fn test_status_only_frame() {
        let mut r = ParcelReader::new(Response::encode_status(StatusCode::PermissionDenied));
        assert_eq!(r.read_i32().unwrap(), -6);
        r.finish().unwrap();
    }

    #[test]
    fn test_handle_response_carries_path() {
        let handle = BufferHandle {
            id: 3,
            span_count: 4,
            span_size_bytes: 960,
        };
        let response = Response::Handle {
            handle,
            path: "/dev/shm/audiod-1-3.ring".to_string(),
        };
        let mut r = ParcelReader::new(response.encode());
        assert_eq!(r.read_i32().unwrap(), 0);
        assert_eq!(
            Response::decode_payload(RequestCode::ResolveBuffer, &mut r).unwrap(),
            response
        );
        r.finish().unwrap();
    }

    #[test]
    fn test_notification_frames() {
        let notes = [
            Notification::Session(SessionNotification::DeviceChanged {
                session_id: 9,
                previous: DeviceDescriptor::none(),
                current: DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output),
            }),
            Notification::Session(SessionNotification::Teardown {
                session_id: 9,
                reason: "released".to_string(),
            }),
            Notification::Parameter(ParameterChange {
                network_id: Some("remote-1".to_string()),
                key: "VOLUME".to_string(),
                condition: "event_type=1;".to_string(),
                value: "7".to_string(),
            }),
        ];
        for note in notes {
            let mut r = ParcelReader::new(note.encode());
            assert_eq!(r.read_u32().unwrap(), FRAME_NOTIFICATION);
            assert_eq!(Notification::decode_payload(&mut r).unwrap(), note);
            r.finish().unwrap();
        }
        assert_eq!(
            Notification::Parameter(ParameterChange {
                network_id: None,
                key: "k".to_string(),
                condition: String::new(),
                value: "v".to_string(),
            })
            .session_id(),
            None
        );
    }

    #[test]
    fn test_reply_frame_prefix() {
        let frame = reply_frame(&Response::encode_status(StatusCode::NotFound));
        let mut r = ParcelReader::new(frame);
        assert_eq!(r.read_u32().unwrap(), FRAME_REPLY);
        assert_eq!(r.read_i32().unwrap(), StatusCode::NotFound.code());
        r.finish().unwrap();
    }

    #[test]
    fn test_unknown_notification_tag_is_malformed() {
        let mut w = ParcelWriter::new();
        w.write_u32(77);
        let mut r = ParcelReader::new(w.finish());
        assert!(Notification::decode_payload(&mut r).is_err());
    }

    #[test]
    fn test_absurd_device_count_rejected() {
        let mut w = ParcelWriter::new();
        w.write_u32(u32::MAX);
        let mut r = ParcelReader::new(w.finish());
        assert!(Response::decode_payload(RequestCode::GetDevices, &mut r).is_err());
    }
}
