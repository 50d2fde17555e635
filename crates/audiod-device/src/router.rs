use crate::manager::{latest, DeviceManager};
use audiod_core::config::RoutingConfig;
use audiod_core::{
    DeviceDescriptor, DeviceError, PrivacyClass, RouterCategory, SourceType, StreamIntent,
    StreamUsage,
};
use std::collections::HashMap;
use std::sync::Arc;

// ── Router trait ──────────────────────────────────────────────

/// A device selection strategy.
///
/// Each selector answers for one router category and returns the
/// `DeviceDescriptor::none()` sentinel when it has no opinion. Routers read
/// the device manager and never mutate it.
pub trait Router: Send + Sync {
    fn name(&self) -> &str;

    fn media_render_device(
        &self,
        _devices: &DeviceManager,
        _usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        DeviceDescriptor::none()
    }

    fn call_render_device(
        &self,
        _devices: &DeviceManager,
        _usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        DeviceDescriptor::none()
    }

    fn ring_render_device(
        &self,
        _devices: &DeviceManager,
        _usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        DeviceDescriptor::none()
    }

    fn tone_render_device(
        &self,
        _devices: &DeviceManager,
        _usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        DeviceDescriptor::none()
    }

    fn record_capture_device(
        &self,
        _devices: &DeviceManager,
        _source: SourceType,
        _uid: i32,
    ) -> DeviceDescriptor {
        DeviceDescriptor::none()
    }

    fn call_capture_device(
        &self,
        _devices: &DeviceManager,
        _source: SourceType,
        _uid: i32,
    ) -> DeviceDescriptor {
        DeviceDescriptor::none()
    }

    fn render_device(
        &self,
        devices: &DeviceManager,
        usage: StreamUsage,
        uid: i32,
    ) -> DeviceDescriptor {
        match usage.category() {
            RouterCategory::CallRender => self.call_render_device(devices, usage, uid),
            RouterCategory::RingRender => self.ring_render_device(devices, usage, uid),
            RouterCategory::ToneRender => self.tone_render_device(devices, usage, uid),
            _ => self.media_render_device(devices, usage, uid),
        }
    }

    fn capture_device(
        &self,
        devices: &DeviceManager,
        source: SourceType,
        uid: i32,
    ) -> DeviceDescriptor {
        match source.category() {
            RouterCategory::CallCapture => self.call_capture_device(devices, source, uid),
            _ => self.record_capture_device(devices, source, uid),
        }
    }
}

fn latest_in(devices: Vec<DeviceDescriptor>) -> DeviceDescriptor {
    latest(devices.iter())
}

// ── Public priority ───────────────────────────────────────────

/// Routes everything to public devices. Ringtones go to the communication
/// render set so they are heard on the loudspeaker, not only on headsets.
pub struct PublicPriorityRouter;

impl PublicPriorityRouter {
    fn render(&self, devices: &DeviceManager, usage: StreamUsage) -> DeviceDescriptor {
        if usage.is_ringtone_class() {
            latest_in(devices.comm_render(PrivacyClass::Public))
        } else {
            latest_in(devices.media_render(PrivacyClass::Public))
        }
    }
}

impl Router for PublicPriorityRouter {
    fn name(&self) -> &str {
        "public_priority"
    }

    fn media_render_device(
        &self,
        devices: &DeviceManager,
        usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        self.render(devices, usage)
    }

    fn call_render_device(
        &self,
        devices: &DeviceManager,
        usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        self.render(devices, usage)
    }

    fn ring_render_device(
        &self,
        devices: &DeviceManager,
        usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        self.render(devices, usage)
    }

    fn tone_render_device(
        &self,
        devices: &DeviceManager,
        usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        self.render(devices, usage)
    }

    fn record_capture_device(
        &self,
        devices: &DeviceManager,
        _source: SourceType,
        _uid: i32,
    ) -> DeviceDescriptor {
        latest_in(devices.media_capture(PrivacyClass::Public))
    }

    fn call_capture_device(
        &self,
        devices: &DeviceManager,
        _source: SourceType,
        _uid: i32,
    ) -> DeviceDescriptor {
        latest_in(devices.media_capture(PrivacyClass::Public))
    }
}

// ── Privacy priority ──────────────────────────────────────────

/// Prefers private devices (headsets, Bluetooth). Ring and tone streams get
/// no private answer so they fall through to a public router.
pub struct PrivacyPriorityRouter;

impl Router for PrivacyPriorityRouter {
    fn name(&self) -> &str {
        "privacy_priority"
    }

    fn media_render_device(
        &self,
        devices: &DeviceManager,
        _usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        latest_in(devices.media_render(PrivacyClass::Private))
    }

    fn call_render_device(
        &self,
        devices: &DeviceManager,
        _usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        latest_in(devices.comm_render(PrivacyClass::Private))
    }

    fn record_capture_device(
        &self,
        devices: &DeviceManager,
        _source: SourceType,
        _uid: i32,
    ) -> DeviceDescriptor {
        latest_in(devices.media_capture(PrivacyClass::Private))
    }

    fn call_capture_device(
        &self,
        devices: &DeviceManager,
        _source: SourceType,
        _uid: i32,
    ) -> DeviceDescriptor {
        latest_in(devices.comm_capture(PrivacyClass::Private))
    }
}

// ── Default ───────────────────────────────────────────────────

/// Last resort: the configured default speaker and microphone.
pub struct DefaultRouter;

impl Router for DefaultRouter {
    fn name(&self) -> &str {
        "default"
    }

    fn render_device(
        &self,
        devices: &DeviceManager,
        _usage: StreamUsage,
        _uid: i32,
    ) -> DeviceDescriptor {
        devices.default_render_device()
    }

    fn capture_device(
        &self,
        devices: &DeviceManager,
        _source: SourceType,
        _uid: i32,
    ) -> DeviceDescriptor {
        devices.default_capture_device()
    }
}

// ── Registry ──────────────────────────────────────────────────

pub struct RouterRegistry {
    factories: HashMap<String, fn() -> Box<dyn Router>>,
}

impl RouterRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("privacy_priority", || Box::new(PrivacyPriorityRouter));
        registry.register("public_priority", || Box::new(PublicPriorityRouter));
        registry.register("default", || Box::new(DefaultRouter));
        registry
    }

    pub fn register(&mut self, name: &str, factory: fn() -> Box<dyn Router>) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Router>, DeviceError> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| DeviceError::RouterNotFound(name.to_string()))
    }

    pub fn list_routers(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for RouterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Router center ─────────────────────────────────────────────

/// Runs the router chain configured for a stream's category and returns the
/// first real device any router offers.
pub struct RouterCenter {
    devices: Arc<DeviceManager>,
    chains: HashMap<RouterCategory, Vec<Box<dyn Router>>>,
}

impl RouterCenter {
    pub fn new(
        devices: Arc<DeviceManager>,
        routing: &RoutingConfig,
        registry: &RouterRegistry,
    ) -> Result<Self, DeviceError> {
        let mut chains = HashMap::new();
        for (category, names) in [
            (RouterCategory::MediaRender, &routing.media_render),
            (RouterCategory::CallRender, &routing.call_render),
            (RouterCategory::RingRender, &routing.ring_render),
            (RouterCategory::ToneRender, &routing.tone_render),
            (RouterCategory::RecordCapture, &routing.record_capture),
            (RouterCategory::CallCapture, &routing.call_capture),
        ] {
            let chain = names
                .iter()
                .map(|name| registry.create(name))
                .collect::<Result<Vec<_>, _>>()?;
            chains.insert(category, chain);
        }
        Ok(Self { devices, chains })
    }

    pub fn devices(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    pub fn fetch_output_device(&self, usage: StreamUsage, uid: i32) -> DeviceDescriptor {
        let chain = self.chain(usage.category());
        for router in chain {
            let desc = router.render_device(&self.devices, usage, uid);
            if !desc.is_none() {
                tracing::debug!(
                    stream_usage = ?usage,
                    router = router.name(),
                    device_type = ?desc.device_type,
                    "output device selected"
                );
                return desc;
            }
        }
        DeviceDescriptor::none()
    }

    pub fn fetch_input_device(&self, source: SourceType, uid: i32) -> DeviceDescriptor {
        let chain = self.chain(source.category());
        for router in chain {
            let desc = router.capture_device(&self.devices, source, uid);
            if !desc.is_none() {
                tracing::debug!(
                    source_type = ?source,
                    router = router.name(),
                    device_type = ?desc.device_type,
                    "input device selected"
                );
                return desc;
            }
        }
        DeviceDescriptor::none()
    }

    pub fn route(&self, intent: StreamIntent, uid: i32) -> DeviceDescriptor {
        match intent {
            StreamIntent::Render(usage) => self.fetch_output_device(usage, uid),
            StreamIntent::Capture(source) => self.fetch_input_device(source, uid),
        }
    }

    fn chain(&self, category: RouterCategory) -> &[Box<dyn Router>] {
        self.chains.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }
}
