use thiserror::Error;

/// Status codes carried across the process boundary. No error type ever
/// crosses it; handlers reduce their failures to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    InvalidParam,
    IllegalState,
    OperationFailed,
    PermissionDenied,
    NotFound,
    BufferFull,
    BufferEmpty,
    NoDevice,
    PeerDead,
    Unsupported,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::InvalidParam => -2,
            StatusCode::IllegalState => -3,
            StatusCode::OperationFailed => -4,
            StatusCode::PermissionDenied => -6,
            StatusCode::NotFound => -7,
            StatusCode::BufferFull => -10,
            StatusCode::BufferEmpty => -11,
            StatusCode::NoDevice => -12,
            StatusCode::PeerDead => -13,
            StatusCode::Unsupported => -14,
        }
    }

    /// Unknown codes decode as `OperationFailed` rather than being dropped.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => StatusCode::Success,
            -2 => StatusCode::InvalidParam,
            -3 => StatusCode::IllegalState,
            -6 => StatusCode::PermissionDenied,
            -7 => StatusCode::NotFound,
            -10 => StatusCode::BufferFull,
            -11 => StatusCode::BufferEmpty,
            -12 => StatusCode::NoDevice,
            -13 => StatusCode::PeerDead,
            -14 => StatusCode::Unsupported,
            _ => StatusCode::OperationFailed,
        }
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("adapter not found: {0}")]
    AdapterNotFound(String),

    #[error("router not found: {0}")]
    RouterNotFound(String),

    #[error("adapter initialization failed: {0}")]
    InitializationFailed(String),

    #[error("adapter I/O failed: {0}")]
    Io(String),

    #[error("adapter not started")]
    NotStarted,
}

impl DeviceError {
    pub fn status(&self) -> StatusCode {
        match self {
            DeviceError::DeviceNotFound(_)
            | DeviceError::AdapterNotFound(_)
            | DeviceError::RouterNotFound(_) => StatusCode::NotFound,
            DeviceError::NotStarted => StatusCode::IllegalState,
            _ => StatusCode::OperationFailed,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("buffer full")]
    BufferFull,

    #[error("buffer empty")]
    BufferEmpty,

    #[error("{op} not allowed in state {state}")]
    IllegalState { op: &'static str, state: String },

    #[error("buffer already released")]
    Released,

    #[error("buffer handle {0} already transferred")]
    AlreadyTransferred(u64),

    #[error("buffer handle {0} not found")]
    HandleNotFound(u64),

    #[error("session {0} not found")]
    SessionNotFound(u64),

    #[error("no device available")]
    NoDevice,

    #[error("fatal session error: {0}")]
    Fatal(String),

    #[error("buffer mapping failed: {0}")]
    Map(String),
}

impl StreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            StreamError::InvalidParam(_) => StatusCode::InvalidParam,
            StreamError::BufferFull => StatusCode::BufferFull,
            StreamError::BufferEmpty => StatusCode::BufferEmpty,
            StreamError::IllegalState { .. } | StreamError::Released => StatusCode::IllegalState,
            StreamError::AlreadyTransferred(_) => StatusCode::PermissionDenied,
            StreamError::HandleNotFound(_) | StreamError::SessionNotFound(_) => {
                StatusCode::NotFound
            }
            StreamError::NoDevice => StatusCode::NoDevice,
            StreamError::Fatal(_) => StatusCode::PeerDead,
            StreamError::Map(_) => StatusCode::OperationFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("session {0} not registered")]
    SessionNotRegistered(u64),

    #[error("session {0} already registered")]
    AlreadyRegistered(u64),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl PolicyError {
    pub fn status(&self) -> StatusCode {
        match self {
            PolicyError::InvalidParam(_) => StatusCode::InvalidParam,
            PolicyError::SessionNotRegistered(_) => StatusCode::NotFound,
            PolicyError::AlreadyRegistered(_) => StatusCode::IllegalState,
            PolicyError::OperationFailed(_) => StatusCode::OperationFailed,
            PolicyError::Unsupported(_) => StatusCode::Unsupported,
            PolicyError::Stream(e) => e.status(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("interface token mismatch: expected '{expected}', got '{actual}'")]
    AuthenticationFailed { expected: String, actual: String },

    #[error("unsupported request code: {0}")]
    UnknownCode(u32),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("request failed with status {0:?}")]
    Status(StatusCode),

    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("shared buffer: {0}")]
    Buffer(#[from] StreamError),
}

impl IpcError {
    pub fn status(&self) -> StatusCode {
        match self {
            IpcError::AuthenticationFailed { .. } => StatusCode::PermissionDenied,
            IpcError::UnknownCode(_) => StatusCode::Unsupported,
            IpcError::Malformed(_) => StatusCode::InvalidParam,
            IpcError::PeerClosed | IpcError::Io(_) => StatusCode::PeerDead,
            IpcError::Status(code) => *code,
            IpcError::Buffer(e) => e.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_roundtrip() {
        for code in [
            StatusCode::Success,
            StatusCode::InvalidParam,
            StatusCode::IllegalState,
            StatusCode::PermissionDenied,
            StatusCode::BufferFull,
            StatusCode::NoDevice,
        ] {
            assert_eq!(StatusCode::from_code(code.code()), code);
        }
    }

    #[test]
    fn test_unknown_status_is_operation_failed() {
        assert_eq!(StatusCode::from_code(-999), StatusCode::OperationFailed);
    }

    #[test]
    fn test_stream_error_status_mapping() {
        assert_eq!(StreamError::BufferFull.status(), StatusCode::BufferFull);
        assert_eq!(
            StreamError::IllegalState {
                op: "start",
                state: "Released".to_string()
            }
            .status(),
            StatusCode::IllegalState
        );
        assert_eq!(
            PolicyError::Stream(StreamError::NoDevice).status(),
            StatusCode::NoDevice
        );
    }

    #[test]
    fn test_auth_error_message_mentions_token() {
        let err = IpcError::AuthenticationFailed {
            expected: "a".to_string(),
            actual: "b".to_string(),
        };
        assert!(err.to_string().contains("token"));
        assert_eq!(err.status(), StatusCode::PermissionDenied);
    }
}
