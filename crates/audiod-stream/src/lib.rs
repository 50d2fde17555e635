pub mod buffer;
pub mod capture;
pub mod endpoint;
pub mod service;
pub mod session;

pub use buffer::{BufferHandle, HandleTable, ReadOutcome, SharedRingBuffer};
pub use capture::CaptureEndpoint;
pub use endpoint::{Endpoint, EndpointHandle};
pub use service::StreamService;
pub use session::{
    validate_config, HandleInfo, SessionPosition, SessionState, StreamControls, StreamSession,
};
