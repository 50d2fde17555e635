use crate::service::StreamService;
use crate::session::{SessionState, StreamSession};
use audiod_core::{DeviceDescriptor, DeviceError, DeviceRole, SampleFormat, StreamInfo};
use audiod_device::{SinkAdapter, SourceAdapter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ── Sample codec ──────────────────────────────────────────────

fn decode_into(format: SampleFormat, bytes: &[u8], out: &mut [f32]) {
    match format {
        SampleFormat::S16Le => {
            for (sample, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                *sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32;
            }
        }
        _ => {
            for (sample, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }
    }
}

fn encode_into(format: SampleFormat, samples: &[f32], out: &mut [u8]) {
    match format {
        SampleFormat::S16Le => {
            for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(2)) {
                let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                chunk.copy_from_slice(&v.to_le_bytes());
            }
        }
        _ => {
            for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(4)) {
                chunk.copy_from_slice(&sample.clamp(-1.0, 1.0).to_le_bytes());
            }
        }
    }
}

// ── Route cache ───────────────────────────────────────────────

struct RoutedSession {
    session: Arc<StreamSession>,
    epoch: u64,
    routed: bool,
}

/// Sessions of one role and format that may feed (or be fed by) a device.
///
/// The list is rebuilt only when the service's session set changes, and a
/// session's device match is recomputed only when its route epoch moves, so
/// a steady-state cycle takes no locks and allocates nothing.
pub(crate) struct RouteCache {
    device: DeviceDescriptor,
    role: DeviceRole,
    info: StreamInfo,
    generation: Option<u64>,
    entries: Vec<RoutedSession>,
}

impl RouteCache {
    pub(crate) fn new(device: DeviceDescriptor, role: DeviceRole, info: StreamInfo) -> Self {
        Self {
            device,
            role,
            info,
            generation: None,
            entries: Vec::new(),
        }
    }

    /// Returns true if the session list was rebuilt.
    pub(crate) fn refresh(&mut self, service: &StreamService) -> bool {
        let generation = service.generation();
        let rebuilt = self.generation != Some(generation);
        if rebuilt {
            self.generation = Some(generation);
            let (role, info) = (self.role, self.info);
            self.entries = service
                .sessions()
                .into_iter()
                .filter(|s| s.intent().role() == role && s.config().stream_info == info)
                .map(|session| RoutedSession {
                    session,
                    epoch: u64::MAX,
                    routed: false,
                })
                .collect();
        }
        for entry in &mut self.entries {
            let epoch = entry.session.route_epoch();
            if epoch != entry.epoch {
                entry.epoch = epoch;
                entry.routed = entry.session.device().same_endpoint(&self.device);
            }
        }
        rebuilt
    }

    /// Running sessions routed to the device.
    pub(crate) fn running(&self) -> impl Iterator<Item = &Arc<StreamSession>> {
        self.entries
            .iter()
            .filter(|e| e.routed && e.session.state() == SessionState::Running)
            .map(|e| &e.session)
    }
}

// ── Endpoint ──────────────────────────────────────────────────

/// Render mix loop for one output device.
///
/// Each cycle pulls one span from every running render session routed to
/// `device`, applies its gain, sums, and hands the result to the sink.
pub struct Endpoint {
    device: DeviceDescriptor,
    info: StreamInfo,
    service: Arc<StreamService>,
    sink: Box<dyn SinkAdapter>,
    routes: RouteCache,
    mix_buffer: Vec<f32>,
    decode_buffer: Vec<f32>,
    read_buffer: Vec<u8>,
    out_buffer: Vec<u8>,
}

impl Endpoint {
    pub fn new(
        device: DeviceDescriptor,
        info: StreamInfo,
        span_frames: u32,
        service: Arc<StreamService>,
        sink: Box<dyn SinkAdapter>,
    ) -> Result<Self, DeviceError> {
        if !matches!(info.format, SampleFormat::S16Le | SampleFormat::F32Le) {
            return Err(DeviceError::InitializationFailed(format!(
                "endpoint cannot mix {:?}",
                info.format
            )));
        }
        let span_bytes = (span_frames * info.bytes_per_frame()) as usize;
        let samples = span_frames as usize * info.channels as usize;
        Ok(Self {
            routes: RouteCache::new(device.clone(), DeviceRole::Output, info),
            device,
            info,
            service,
            sink,
            mix_buffer: vec![0.0; samples],
            decode_buffer: vec![0.0; samples],
            read_buffer: vec![0; span_bytes],
            out_buffer: vec![0; span_bytes],
        })
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Run one mix cycle. Returns the number of bytes rendered; zero when no
    /// input had data.
    pub fn mix_once(&mut self) -> Result<usize, DeviceError> {
        self.routes.refresh(&self.service);
        if self.routes.running().next().is_none() {
            return Ok(0);
        }

        self.mix_buffer.iter_mut().for_each(|s| *s = 0.0);
        let bytes_per_sample = self.info.format.bytes_per_sample() as usize;
        let mut max_read = 0usize;

        for session in self.routes.running() {
            // Released since the last refresh: skip it.
            let Ok(outcome) = session.read_frame_into(&mut self.read_buffer) else {
                continue;
            };
            max_read = max_read.max(outcome.bytes_read);

            let gain = session.controls().gain();
            if gain == 0.0 {
                continue;
            }
            decode_into(self.info.format, &self.read_buffer, &mut self.decode_buffer);
            let n = outcome.bytes_read / bytes_per_sample;
            for i in 0..n {
                self.mix_buffer[i] += self.decode_buffer[i] * gain;
            }
        }

        if max_read == 0 {
            return Ok(0);
        }

        encode_into(self.info.format, &self.mix_buffer, &mut self.out_buffer);
        self.sink.render_frame(&self.out_buffer)
    }

    /// Run the mix loop until `running` is set to false.
    pub fn run(&mut self, running: Arc<AtomicBool>, interval: std::time::Duration) {
        if let Err(e) = self.sink.start() {
            tracing::error!(device_type = ?self.device.device_type, "sink start failed: {e}");
            return;
        }
        let mut failing = false;
        while running.load(Ordering::Relaxed) {
            match self.mix_once() {
                Ok(_) => failing = false,
                Err(e) if !failing => {
                    tracing::warn!(device_type = ?self.device.device_type, "render failed: {e}");
                    failing = true;
                }
                Err(_) => {}
            }
            std::thread::sleep(interval);
        }
        if let Err(e) = self.sink.stop() {
            tracing::warn!("sink stop failed: {e}");
        }
    }

    /// Spawn the mix loop on a dedicated thread. Consumes self.
    pub fn start(mut self, interval: std::time::Duration) -> Result<EndpointHandle, DeviceError> {
        let name = format!("endpoint-{:?}", self.device.device_type).to_lowercase();
        EndpointHandle::spawn(name, move |running| {
            self.run(running, interval);
            self.sink
        })
    }
}

// ── EndpointHandle ────────────────────────────────────────────

/// Owns an endpoint thread; `A` is the adapter handed back on stop.
pub struct EndpointHandle<A: ?Sized = dyn SinkAdapter> {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<Box<A>>>,
}

impl<A: ?Sized + Send + 'static> EndpointHandle<A> {
    pub(crate) fn spawn<F>(name: String, body: F) -> Result<Self, DeviceError>
    where
        F: FnOnce(Arc<AtomicBool>) -> Box<A> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || body(flag))
            .map_err(|e| DeviceError::InitializationFailed(e.to_string()))?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }
}

impl<A: ?Sized> EndpointHandle<A> {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Signal the endpoint thread to stop, wait for it, and hand back the
    /// adapter.
    pub fn stop(mut self) -> Option<Box<A>> {
        self.running.store(false, Ordering::Relaxed);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(sink) => Some(sink),
            Err(_) => {
                tracing::error!("endpoint thread panicked");
                None
            }
        }
    }
}

impl<A: ?Sized> Drop for EndpointHandle<A> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
