use crate::endpoint::{EndpointHandle, RouteCache};
use crate::service::StreamService;
use audiod_core::{DeviceDescriptor, DeviceError, DeviceRole, StreamError, StreamInfo};
use audiod_device::SourceAdapter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Capture loop for one input device.
///
/// Each cycle pulls one span from the source and queues a copy into every
/// running capture session routed to the device. A session whose client is
/// not draining its ring loses that span and counts an overrun.
pub struct CaptureEndpoint {
    device: DeviceDescriptor,
    service: Arc<StreamService>,
    source: Box<dyn SourceAdapter>,
    routes: RouteCache,
    span: Vec<u8>,
    epoch: Instant,
    dropped_spans: u64,
}

impl CaptureEndpoint {
    pub fn new(
        device: DeviceDescriptor,
        info: StreamInfo,
        span_frames: u32,
        service: Arc<StreamService>,
        source: Box<dyn SourceAdapter>,
    ) -> Result<Self, DeviceError> {
        let span_bytes = span_frames as usize * info.bytes_per_frame() as usize;
        if span_bytes == 0 {
            return Err(DeviceError::InitializationFailed(
                "capture span is empty".to_string(),
            ));
        }
        Ok(Self {
            routes: RouteCache::new(device.clone(), DeviceRole::Input, info),
            device,
            service,
            source,
            span: vec![0; span_bytes],
            epoch: Instant::now(),
            dropped_spans: 0,
        })
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Spans that could not be queued because a session's ring was full.
    pub fn dropped_spans(&self) -> u64 {
        self.dropped_spans
    }

    /// Run one capture cycle. Returns the bytes captured; zero when no
    /// session is listening, in which case the source is left untouched.
    pub fn capture_once(&mut self) -> Result<usize, DeviceError> {
        self.routes.refresh(&self.service);
        if self.routes.running().next().is_none() {
            return Ok(0);
        }

        let n = self.source.capture_frame(&mut self.span)?.min(self.span.len());
        let timestamp_ns = self.epoch.elapsed().as_nanos() as u64;
        for session in self.routes.running() {
            match session.write_frame(&self.span[..n], timestamp_ns) {
                Ok(()) => {}
                Err(StreamError::BufferFull) => self.dropped_spans += 1,
                // Released since the last refresh.
                Err(_) => {}
            }
        }
        Ok(n)
    }

    /// Run the capture loop until `running` is set to false.
    pub fn run(&mut self, running: Arc<AtomicBool>, interval: Duration) {
        if let Err(e) = self.source.start() {
            tracing::error!(device_type = ?self.device.device_type, "source start failed: {e}");
            return;
        }
        let mut failing = false;
        while running.load(Ordering::Relaxed) {
            match self.capture_once() {
                Ok(_) => failing = false,
                Err(e) if !failing => {
                    tracing::warn!(device_type = ?self.device.device_type, "capture failed: {e}");
                    failing = true;
                }
                Err(_) => {}
            }
            std::thread::sleep(interval);
        }
        if let Err(e) = self.source.stop() {
            tracing::warn!("source stop failed: {e}");
        }
        if self.dropped_spans > 0 {
            tracing::info!(
                device_type = ?self.device.device_type,
                dropped = self.dropped_spans,
                "capture stopped with overruns"
            );
        }
    }

    /// Spawn the capture loop on a dedicated thread. Consumes self.
    pub fn start(
        mut self,
        interval: Duration,
    ) -> Result<EndpointHandle<dyn SourceAdapter>, DeviceError> {
        let name = format!("capture-{:?}", self.device.device_type).to_lowercase();
        EndpointHandle::spawn(name, move |running| {
            self.run(running, interval);
            self.source
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StreamSession;
    use audiod_core::{DeviceType, ProcessConfig, SampleFormat, SourceType, StreamIntent};
    use audiod_device::{AdapterAttr, LoopbackSink, SinkAdapter};

    const SPAN_FRAMES: u32 = 4;

    fn info() -> StreamInfo {
        StreamInfo {
            sample_rate: 48000,
            channels: 1,
            format: SampleFormat::S16Le,
        }
    }

    fn mic() -> DeviceDescriptor {
        DeviceDescriptor::new(DeviceType::Mic, DeviceRole::Input).with_timestamp(1)
    }

    /// A loopback sink standing in for the microphone: whatever is rendered
    /// into it comes out of the monitor source.
    fn fake_mic() -> (Box<dyn SinkAdapter>, Box<dyn SourceAdapter>) {
        let mut sink = LoopbackSink::new();
        sink.init(&AdapterAttr::new(mic(), info())).unwrap();
        sink.start().unwrap();
        let monitor = sink.take_monitor().unwrap();
        (Box::new(sink), monitor)
    }

    fn capture_session(service: &StreamService, total_frames: u32) -> Arc<StreamSession> {
        let session = service
            .create_session(ProcessConfig {
                intent: StreamIntent::Capture(SourceType::Mic),
                stream_info: info(),
                client_uid: 0,
                total_size_frames: total_frames,
                span_size_frames: SPAN_FRAMES,
            })
            .unwrap();
        session.resolve_buffer().unwrap();
        session.bind_device(mic()).unwrap();
        session.start().unwrap();
        session
    }

    fn make_capture() -> (CaptureEndpoint, Arc<StreamService>, Box<dyn SinkAdapter>) {
        let service = Arc::new(StreamService::new());
        let (sink, mut source) = fake_mic();
        source.start().unwrap();
        let endpoint =
            CaptureEndpoint::new(mic(), info(), SPAN_FRAMES, Arc::clone(&service), source)
                .unwrap();
        (endpoint, service, sink)
    }

    #[test]
    fn test_capture_without_listeners_leaves_source_alone() {
        let (mut endpoint, service, mut sink) = make_capture();
        sink.render_frame(&[1; 8]).unwrap();
        assert_eq!(endpoint.capture_once().unwrap(), 0);

        let session = capture_session(&service, 16);
        assert_eq!(endpoint.capture_once().unwrap(), 8);
        let (_, bytes, _) = session.buffer().read(8).unwrap();
        assert_eq!(bytes, vec![1; 8]);
    }

    #[test]
    fn test_capture_fans_out_to_running_sessions() {
        let (mut endpoint, service, mut sink) = make_capture();
        let a = capture_session(&service, 16);
        let b = capture_session(&service, 16);
        let paused = capture_session(&service, 16);
        paused.pause(false).unwrap();

        sink.render_frame(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(endpoint.capture_once().unwrap(), 8);

        for session in [&a, &b] {
            let (n, bytes, _) = session.buffer().read(8).unwrap();
            assert_eq!((n, bytes), (8, vec![1, 2, 3, 4, 5, 6, 7, 8]));
        }
        assert_eq!(paused.buffer().readable_spans(), 0);
    }

    #[test]
    fn test_capture_ignores_other_devices() {
        let (mut endpoint, service, mut sink) = make_capture();
        let elsewhere = capture_session(&service, 16);
        elsewhere
            .bind_device(
                DeviceDescriptor::new(DeviceType::WiredHeadset, DeviceRole::Input)
                    .with_timestamp(2),
            )
            .unwrap();

        sink.render_frame(&[9; 8]).unwrap();
        assert_eq!(endpoint.capture_once().unwrap(), 0);
        assert_eq!(elsewhere.buffer().readable_spans(), 0);
    }

    #[test]
    fn test_full_client_ring_counts_dropped_span() {
        let (mut endpoint, service, mut sink) = make_capture();
        let session = capture_session(&service, SPAN_FRAMES);

        sink.render_frame(&[1; 8]).unwrap();
        endpoint.capture_once().unwrap();
        sink.render_frame(&[2; 8]).unwrap();
        endpoint.capture_once().unwrap();

        assert_eq!(endpoint.dropped_spans(), 1);
        assert_eq!(session.position().overruns, 1);
        let (_, bytes, _) = session.buffer().read(8).unwrap();
        assert_eq!(bytes, vec![1; 8]);
    }

    #[test]
    fn test_capture_thread_delivers_and_returns_source() {
        let (endpoint, service, mut sink) = make_capture();
        let session = capture_session(&service, 16);
        sink.render_frame(&[7; 8]).unwrap();

        let handle = endpoint.start(Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(handle.stop().is_some());

        let (_, bytes, _) = session.buffer().read(8).unwrap();
        assert_eq!(bytes, vec![7; 8]);
    }
}
