pub mod adapter;
#[cfg(feature = "cpal")]
pub mod cpal_sink;
pub mod file;
pub mod loopback;
pub mod manager;
pub mod null;
pub mod router;

pub use adapter::{AdapterAttr, AdapterRegistry, SinkAdapter, SourceAdapter};
#[cfg(feature = "cpal")]
pub use cpal_sink::CpalSink;
pub use file::{FileSink, FileSource};
pub use loopback::{LoopbackSink, LoopbackSource};
pub use manager::DeviceManager;
pub use null::{NullSink, NullSource};
pub use router::{
    DefaultRouter, PrivacyPriorityRouter, PublicPriorityRouter, Router, RouterCenter,
    RouterRegistry,
};
