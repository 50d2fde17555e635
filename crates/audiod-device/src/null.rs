use crate::adapter::{AdapterAttr, SinkAdapter, SourceAdapter};
use audiod_core::DeviceError;

/// Discards everything it is given.
pub struct NullSink {
    started: bool,
    rendered_bytes: u64,
    volume: f32,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            started: false,
            rendered_bytes: 0,
            volume: 1.0,
        }
    }

    pub fn rendered_bytes(&self) -> u64 {
        self.rendered_bytes
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkAdapter for NullSink {
    fn name(&self) -> &str {
        "null"
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

    fn render_frame(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        self.rendered_bytes += data.len() as u64;
        Ok(data.len())
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn latency_ms(&self) -> u32 {
        0
    }
}

/// Produces silence.
pub struct NullSource {
    started: bool,
}

impl NullSource {
    pub fn new() -> Self {
        Self { started: false }
    }
}

impl Default for NullSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceAdapter for NullSource {
    fn name(&self) -> &str {
        "null"
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
        data.fill(0);
        Ok(data.len())
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn latency_ms(&self) -> u32 {
        0
    }
}
