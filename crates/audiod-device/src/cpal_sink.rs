use crate::adapter::{AdapterAttr, SinkAdapter};
use audiod_core::{DeviceError, SampleFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

/// Milliseconds of audio queued between the mix thread and the cpal callback.
const CPAL_QUEUE_MS: u32 = 100;

/// Hardware playback through the host's cpal backend.
///
/// cpal streams are not `Send` on every platform, so the stream lives on its
/// own thread for the lifetime of the sink.
pub struct CpalSink {
    producer: Option<HeapProd<f32>>,
    format: SampleFormat,
    playing: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn new() -> Self {
        Self {
            producer: None,
            format: SampleFormat::F32Le,
            playing: Arc::new(AtomicBool::new(false)),
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            stop_tx: None,
            thread: None,
        }
    }

    fn shutdown_stream(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

fn run_stream(
    device_name: String,
    config: StreamConfig,
    mut consumer: HeapCons<f32>,
    playing: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    ready_tx: mpsc::Sender<Result<(), DeviceError>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let host = cpal::default_host();
    let device = if device_name.is_empty() || device_name == "default" {
        host.default_output_device()
    } else {
        host.output_devices().ok().and_then(|mut devices| {
            devices.find(|d| d.name().ok().as_deref() == Some(device_name.as_str()))
        })
    };
    let Some(device) = device else {
        let _ = ready_tx.send(Err(DeviceError::DeviceNotFound(format!(
            "output device not found: {device_name}"
        ))));
        return;
    };

    let err_callback = |err: cpal::StreamError| {
        tracing::error!("cpal output stream error: {}", err);
    };
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if !playing.load(Ordering::Relaxed) {
                data.fill(0.0);
                return;
            }
            let gain = f32::from_bits(volume.load(Ordering::Relaxed));
            for sample in data.iter_mut() {
                *sample = consumer.try_pop().unwrap_or(0.0) * gain;
            }
        },
        err_callback,
        None,
    );
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(DeviceError::InitializationFailed(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(DeviceError::InitializationFailed(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Hold the stream until the sink is stopped or dropped.
    let _ = stop_rx.recv();
    drop(stream);
}

impl SinkAdapter for CpalSink {
    fn name(&self) -> &str {
        "cpal"
    }

    fn init(&mut self, attr: &AdapterAttr) -> Result<(), DeviceError> {
        let info = attr.stream_info;
        match info.format {
            SampleFormat::S16Le | SampleFormat::F32Le => {}
            other => {
                return Err(DeviceError::InitializationFailed(format!(
                    "unsupported sample format for cpal: {other:?}"
                )))
            }
        }
        self.shutdown_stream();
        self.format = info.format;

        let capacity = (info.sample_rate * info.channels as u32 * CPAL_QUEUE_MS / 1000).max(1);
        let (producer, consumer) = HeapRb::<f32>::new(capacity as usize).split();
        let config = StreamConfig {
            channels: info.channels,
            sample_rate: SampleRate(info.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let playing = Arc::clone(&self.playing);
        let volume = Arc::clone(&self.volume);
        let device_name = attr
            .option_str("device")
            .unwrap_or(&attr.device.name)
            .to_string();

        let thread = std::thread::Builder::new()
            .name("audiod-cpal-out".to_string())
            .spawn(move || {
                run_stream(device_name, config, consumer, playing, volume, ready_tx, stop_rx)
            })
            .map_err(|e| DeviceError::InitializationFailed(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| DeviceError::InitializationFailed("cpal thread exited".to_string()))?;
        self.thread = Some(thread);
        self.stop_tx = Some(stop_tx);
        if let Err(e) = ready {
            self.shutdown_stream();
            return Err(e);
        }
        self.producer = Some(producer);
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.producer.is_none() {
            return Err(DeviceError::NotStarted);
        }
        self.playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.playing.store(false, Ordering::Relaxed);
        self.shutdown_stream();
        self.producer = None;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.playing.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.start()
    }

    fn render_frame(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        let producer = self.producer.as_mut().ok_or(DeviceError::NotStarted)?;
        match self.format {
            SampleFormat::S16Le => {
                for chunk in data.chunks_exact(2) {
                    let s = i16::from_le_bytes([chunk[0], chunk[1]]);
                    let _ = producer.try_push(s as f32 / i16::MAX as f32);
                }
            }
            _ => {
                for chunk in data.chunks_exact(4) {
                    let s = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let _ = producer.try_push(s);
                }
            }
        }
        Ok(data.len())
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn latency_ms(&self) -> u32 {
        CPAL_QUEUE_MS
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpal_sink_name() {
        assert_eq!(CpalSink::new().name(), "cpal");
    }

    #[test]
    fn test_cpal_sink_render_before_init_fails() {
        let mut sink = CpalSink::new();
        assert!(sink.render_frame(&[0; 4]).is_err());
    }

    #[test]
    fn test_cpal_sink_volume_clamped() {
        let mut sink = CpalSink::new();
        sink.set_volume(3.0);
        assert_eq!(f32::from_bits(sink.volume.load(Ordering::Relaxed)), 1.0);
    }
}
