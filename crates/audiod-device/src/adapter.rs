use audiod_core::{DeviceDescriptor, DeviceError, StreamInfo};
use std::collections::HashMap;

/// Everything an adapter needs to open a device.
#[derive(Debug, Clone)]
pub struct AdapterAttr {
    pub device: DeviceDescriptor,
    pub stream_info: StreamInfo,
    /// Adapter-specific settings, e.g. `path` for the file adapters.
    pub options: toml::Value,
}

impl AdapterAttr {
    pub fn new(device: DeviceDescriptor, stream_info: StreamInfo) -> Self {
        Self {
            device,
            stream_info,
            options: toml::Value::Table(Default::default()),
        }
    }

    pub fn with_option(mut self, key: &str, value: toml::Value) -> Self {
        if let toml::Value::Table(table) = &mut self.options {
            table.insert(key.to_string(), value);
        }
        self
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

/// A playback backend the render endpoint writes mixed frames to.
///
/// Calls come from the endpoint's mix thread and must not block for longer
/// than one span.
pub trait SinkAdapter: Send {
    /// Returns the adapter's registry name (e.g. `"null"`, `"file"`).
    fn name(&self) -> &str;
    fn init(&mut self, attr: &AdapterAttr) -> Result<(), DeviceError>;
    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
    fn pause(&mut self) -> Result<(), DeviceError>;
    fn resume(&mut self) -> Result<(), DeviceError>;
    /// Hands one frame of interleaved PCM to the device; returns bytes accepted.
    fn render_frame(&mut self, data: &[u8]) -> Result<usize, DeviceError>;
    fn set_volume(&mut self, volume: f32);
    fn latency_ms(&self) -> u32;
    /// A source that observes everything rendered to this sink, if supported.
    fn take_monitor(&mut self) -> Option<Box<dyn SourceAdapter>> {
        None
    }
}

/// A capture backend.
pub trait SourceAdapter: Send {
    fn name(&self) -> &str;
    fn init(&mut self, attr: &AdapterAttr) -> Result<(), DeviceError>;
    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
    fn pause(&mut self) -> Result<(), DeviceError>;
    fn resume(&mut self) -> Result<(), DeviceError>;
    /// Fills `data` with captured PCM; returns bytes written. Missing data is
    /// silence, never an error.
    fn capture_frame(&mut self, data: &mut [u8]) -> Result<usize, DeviceError>;
    fn set_volume(&mut self, volume: f32);
    fn latency_ms(&self) -> u32;
}

// ── Registry ──────────────────────────────────────────────────

pub struct AdapterRegistry {
    sinks: HashMap<String, fn() -> Box<dyn SinkAdapter>>,
    sources: HashMap<String, fn() -> Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            sinks: HashMap::new(),
            sources: HashMap::new(),
        };
        registry.register_sink("null", || Box::new(crate::null::NullSink::new()));
        registry.register_source("null", || Box::new(crate::null::NullSource::new()));
        registry.register_sink("loopback", || {
            Box::new(crate::loopback::LoopbackSink::new())
        });
        registry.register_sink("file", || Box::new(crate::file::FileSink::new()));
        registry.register_source("file", || Box::new(crate::file::FileSource::new()));
        #[cfg(feature = "cpal")]
        registry.register_sink("cpal", || Box::new(crate::cpal_sink::CpalSink::new()));
        registry
    }

    pub fn register_sink(&mut self, name: &str, factory: fn() -> Box<dyn SinkAdapter>) {
        self.sinks.insert(name.to_string(), factory);
    }

    pub fn register_source(&mut self, name: &str, factory: fn() -> Box<dyn SourceAdapter>) {
        self.sources.insert(name.to_string(), factory);
    }

    pub fn create_sink(&self, name: &str) -> Result<Box<dyn SinkAdapter>, DeviceError> {
        self.sinks
            .get(name)
            .map(|f| f())
            .ok_or_else(|| DeviceError::AdapterNotFound(name.to_string()))
    }

    pub fn create_source(&self, name: &str) -> Result<Box<dyn SourceAdapter>, DeviceError> {
        self.sources
            .get(name)
            .map(|f| f())
            .ok_or_else(|| DeviceError::AdapterNotFound(name.to_string()))
    }

    /// Creates and initialises a sink in one step.
    pub fn open_sink(
        &self,
        name: &str,
        attr: &AdapterAttr,
    ) -> Result<Box<dyn SinkAdapter>, DeviceError> {
        let mut sink = self.create_sink(name)?;
        sink.init(attr)?;
        tracing::info!(
            adapter = name,
            device_type = ?attr.device.device_type,
            "sink adapter opened"
        );
        Ok(sink)
    }

    /// Creates and initialises a source in one step.
    pub fn open_source(
        &self,
        name: &str,
        attr: &AdapterAttr,
    ) -> Result<Box<dyn SourceAdapter>, DeviceError> {
        let mut source = self.create_source(name)?;
        source.init(attr)?;
        tracing::info!(
            adapter = name,
            device_type = ?attr.device.device_type,
            "source adapter opened"
        );
        Ok(source)
    }

    pub fn list_sinks(&self) -> Vec<&str> {
        self.sinks.keys().map(|s| s.as_str()).collect()
    }

    pub fn list_sources(&self) -> Vec<&str> {
        self.sources.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiod_core::{DeviceRole, DeviceType};

    fn attr() -> AdapterAttr {
        AdapterAttr::new(
            DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output),
            StreamInfo::default(),
        )
    }

    #[test]
    fn test_registry_has_builtin_adapters() {
        let registry = AdapterRegistry::new();
        let sinks = registry.list_sinks();
        assert!(sinks.contains(&"null"));
        assert!(sinks.contains(&"loopback"));
        assert!(sinks.contains(&"file"));
        let sources = registry.list_sources();
        assert!(sources.contains(&"null"));
        assert!(sources.contains(&"file"));
    }

    #[test]
    fn test_registry_create_unknown_returns_error() {
        let registry = AdapterRegistry::new();
        match registry.create_sink("nope") {
            Err(DeviceError::AdapterNotFound(name)) => assert_eq!(name, "nope"),
            _ => panic!("expected AdapterNotFound"),
        }
        assert!(registry.create_source("loopback").is_err());
    }

    #[test]
    fn test_registry_register_custom_sink() {
        let mut registry = AdapterRegistry::new();
        registry.register_sink("custom", || Box::new(crate::null::NullSink::new()));
        let sink = registry.create_sink("custom").unwrap();
        assert_eq!(sink.name(), "null");
    }

    #[test]
    fn test_open_sink_initialises() {
        let registry = AdapterRegistry::new();
        let mut sink = registry.open_sink("null", &attr()).unwrap();
        sink.start().unwrap();
        assert_eq!(sink.render_frame(&[0u8; 16]).unwrap(), 16);
    }

    #[test]
    fn test_open_source_initialises() {
        let registry = AdapterRegistry::new();
        let mut source = registry.open_source("null", &attr()).unwrap();
        source.start().unwrap();
        let mut data = [1u8; 8];
        assert_eq!(source.capture_frame(&mut data).unwrap(), 8);
        assert_eq!(data, [0; 8]);
        assert!(matches!(
            registry.open_source("missing", &attr()),
            Err(DeviceError::AdapterNotFound(_))
        ));
    }

    #[test]
    fn test_attr_options() {
        let attr = attr().with_option("path", toml::Value::String("/tmp/x".to_string()));
        assert_eq!(attr.option_str("path"), Some("/tmp/x"));
        assert_eq!(attr.option_str("missing"), None);
    }

    #[test]
    fn test_adapters_implement_send() {
        fn assert_send<T: Send + ?Sized>() {}
        assert_send::<dyn SinkAdapter>();
        assert_send::<dyn SourceAdapter>();
    }
}
