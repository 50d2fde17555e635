use crate::adapter::{AdapterAttr, SinkAdapter, SourceAdapter};
use audiod_core::DeviceError;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Milliseconds of audio the loopback ring holds.
const LOOPBACK_CAPACITY_MS: u32 = 200;

/// A sink whose rendered bytes can be read back through its monitor source.
pub struct LoopbackSink {
    producer: Option<HeapProd<u8>>,
    monitor: Option<HeapCons<u8>>,
    started: bool,
    dropped_bytes: u64,
    latency_ms: u32,
}

impl LoopbackSink {
    pub fn new() -> Self {
        Self {
            producer: None,
            monitor: None,
            started: false,
            dropped_bytes: 0,
            latency_ms: 0,
        }
    }

    /// Bytes discarded because the monitor side was not draining.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    pub fn queued_bytes(&self) -> usize {
        self.producer.as_ref().map_or(0, |p| p.occupied_len())
    }
}

impl Default for LoopbackSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkAdapter for LoopbackSink {
    fn name(&self) -> &str {
        "loopback"
    }

    fn init(&mut self, attr: &AdapterAttr) -> Result<(), DeviceError> {
        let info = attr.stream_info;
        let bytes_per_ms = info.sample_rate as usize * info.bytes_per_frame() as usize / 1000;
        let capacity = (bytes_per_ms * LOOPBACK_CAPACITY_MS as usize).max(1);
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
        self.producer = Some(producer);
        self.monitor = Some(consumer);
        self.latency_ms = LOOPBACK_CAPACITY_MS;
        tracing::debug!(capacity, "loopback ring allocated");
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.producer.is_none() {
            return Err(DeviceError::InitializationFailed(
                "loopback sink not initialised".to_string(),
            ));
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.start()
    }

    fn render_frame(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        let producer = self.producer.as_mut().ok_or(DeviceError::NotStarted)?;
        let pushed = producer.push_slice(data);
        // Overflow is dropped; the render side never waits on the monitor.
        self.dropped_bytes += (data.len() - pushed) as u64;
        Ok(data.len())
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    fn take_monitor(&mut self) -> Option<Box<dyn SourceAdapter>> {
        self.monitor
            .take()
            .map(|consumer| Box::new(LoopbackSource::new(consumer)) as Box<dyn SourceAdapter>)
    }
}

/// Reads back what a `LoopbackSink` rendered.
pub struct LoopbackSource {
    consumer: HeapCons<u8>,
    started: bool,
}

impl LoopbackSource {
    fn new(consumer: HeapCons<u8>) -> Self {
        Self {
            consumer,
            started: false,
        }
    }
}

impl SourceAdapter for LoopbackSource {
    fn name(&self) -> &str {
        "loopback"
    }

    fn init(&mut self, _attr: &AdapterAttr) -> Result<(), DeviceError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.started = true;
        Ok(())
    }

    fn capture_frame(&mut self, data: &mut [u8]) -> Result<usize, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        let popped = self.consumer.pop_slice(data);
        data[popped..].fill(0);
        Ok(data.len())
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn latency_ms(&self) -> u32 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiod_core::{DeviceDescriptor, DeviceRole, DeviceType, SampleFormat, StreamInfo};

    fn small_attr() -> AdapterAttr {
        // 1 kHz mono u8: one byte per ms, 200 byte ring.
        AdapterAttr::new(
            DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output),
            StreamInfo {
                sample_rate: 1000,
                channels: 1,
                format: SampleFormat::U8,
            },
        )
    }

    #[test]
    fn test_loopback_roundtrip() {
        let mut sink = LoopbackSink::new();
        sink.init(&small_attr()).unwrap();
        let mut monitor = sink.take_monitor().unwrap();
        sink.start().unwrap();
        monitor.start().unwrap();

        sink.render_frame(&[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 6];
        monitor.capture_frame(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn test_loopback_monitor_taken_once() {
        let mut sink = LoopbackSink::new();
        sink.init(&small_attr()).unwrap();
        assert!(sink.take_monitor().is_some());
        assert!(sink.take_monitor().is_none());
    }

    #[test]
    fn test_loopback_overflow_is_dropped() {
        let mut sink = LoopbackSink::new();
        sink.init(&small_attr()).unwrap();
        sink.start().unwrap();

        let frame = [9u8; 150];
        sink.render_frame(&frame).unwrap();
        sink.render_frame(&frame).unwrap();
        assert_eq!(sink.queued_bytes(), 200);
        assert_eq!(sink.dropped_bytes(), 100);
    }

    #[test]
    fn test_loopback_start_before_init_fails() {
        let mut sink = LoopbackSink::new();
        match sink.start() {
            Err(DeviceError::InitializationFailed(msg)) => assert!(msg.contains("loopback")),
            _ => panic!("expected InitializationFailed"),
        }
    }
}
