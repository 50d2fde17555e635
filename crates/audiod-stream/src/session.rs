use crate::buffer::{BufferHandle, HandleTable, ReadOutcome, SharedRingBuffer};
use audiod_core::{
    DeviceDescriptor, ProcessConfig, SessionEvent, SessionId, StreamError, StreamIntent,
};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Attempts made to take the consumer side for a flush while the mix thread
/// is finishing a read.
const FLUSH_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Prepared,
    Running,
    Paused,
    Stopped,
    Released,
    Invalid,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::New,
            1 => SessionState::Prepared,
            2 => SessionState::Running,
            3 => SessionState::Paused,
            4 => SessionState::Stopped,
            5 => SessionState::Released,
            _ => SessionState::Invalid,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::New => 0,
            SessionState::Prepared => 1,
            SessionState::Running => 2,
            SessionState::Paused => 3,
            SessionState::Stopped => 4,
            SessionState::Released => 5,
            SessionState::Invalid => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Released | SessionState::Invalid)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ── StreamControls ────────────────────────────────────────────

/// Gain and mute applied by the mix loop. Lock-free so policy can change
/// them while the endpoint is rendering.
pub struct StreamControls {
    volume_bits: AtomicU32,
    muted: AtomicBool,
}

impl StreamControls {
    pub fn new(volume: f32, muted: bool) -> Self {
        Self {
            volume_bits: AtomicU32::new(volume.to_bits()),
            muted: AtomicBool::new(muted),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, v: f32) {
        self.volume_bits
            .store(v.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, m: bool) {
        self.muted.store(m, Ordering::Relaxed);
    }

    /// Effective gain: zero when muted.
    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            self.volume()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionPosition {
    pub frames_written: u64,
    pub frames_read: u64,
    pub underruns: u64,
    pub overruns: u64,
}

/// Snapshot returned for RequestHandleInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleInfo {
    pub handle: BufferHandle,
    pub read_cursor: u64,
    pub write_cursor: u64,
    pub position: SessionPosition,
    pub last_timestamp_ns: u64,
}

struct Control {
    device: DeviceDescriptor,
    pending_start: bool,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

// ── StreamSession ─────────────────────────────────────────────

/// One client stream: its ring buffer, lifecycle and routing binding.
///
/// Lifecycle calls take a short control lock; the data path only reads the
/// atomic state and touches the ring buffer.
pub struct StreamSession {
    id: SessionId,
    config: ProcessConfig,
    buffer: Arc<SharedRingBuffer>,
    handle: BufferHandle,
    handles: Arc<HandleTable>,
    state: AtomicU8,
    control: Mutex<Control>,
    controls: Arc<StreamControls>,
    bytes_per_frame: u64,
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
    last_timestamp_ns: AtomicU64,
    /// Bumped whenever the routed device changes.
    route_epoch: AtomicU64,
}

/// Checks total/span sizes the way buffer configuration requires.
pub fn validate_config(config: &ProcessConfig) -> Result<(), StreamError> {
    if config.total_size_frames == 0 || config.span_size_frames == 0 {
        return Err(StreamError::InvalidParam(
            "total and span size must be non-zero".to_string(),
        ));
    }
    if config.total_size_frames % config.span_size_frames != 0 {
        return Err(StreamError::InvalidParam(format!(
            "total size {} is not a multiple of span size {}",
            config.total_size_frames, config.span_size_frames
        )));
    }
    let span_count = config.total_size_frames / config.span_size_frames;
    if !span_count.is_power_of_two() {
        return Err(StreamError::InvalidParam(format!(
            "span count {span_count} is not a power of two"
        )));
    }
    if config.stream_info.bytes_per_frame() == 0 {
        return Err(StreamError::InvalidParam("zero channels".to_string()));
    }
    Ok(())
}

impl StreamSession {
    /// Validates the config, allocates an in-process ring buffer and
    /// publishes its handle in `handles`.
    pub fn new(
        id: SessionId,
        config: ProcessConfig,
        handles: Arc<HandleTable>,
    ) -> Result<Self, StreamError> {
        Self::create(id, config, handles, None)
    }

    /// Like [`StreamSession::new`], but with `buffer_dir` set the ring is a
    /// file under it that the client process maps.
    pub fn create(
        id: SessionId,
        config: ProcessConfig,
        handles: Arc<HandleTable>,
        buffer_dir: Option<&Path>,
    ) -> Result<Self, StreamError> {
        validate_config(&config)?;
        let bytes_per_frame = config.stream_info.bytes_per_frame();
        let span_count = config.total_size_frames / config.span_size_frames;
        let span_size_bytes = config
            .span_size_frames
            .checked_mul(bytes_per_frame)
            .ok_or_else(|| StreamError::InvalidParam("span size overflows".to_string()))?;
        let buffer = match buffer_dir {
            Some(dir) => {
                let name = format!("audiod-{}-{id}.ring", std::process::id());
                SharedRingBuffer::create_in(dir, &name, span_count, span_size_bytes)?
            }
            None => SharedRingBuffer::new(span_count, span_size_bytes)?,
        };
        let buffer = Arc::new(buffer);
        let handle = handles.publish(Arc::clone(&buffer));

        Ok(Self {
            id,
            config,
            buffer,
            handle,
            handles,
            state: AtomicU8::new(SessionState::New.as_u8()),
            control: Mutex::new(Control {
                device: DeviceDescriptor::none(),
                pending_start: false,
                events: None,
            }),
            controls: Arc::new(StreamControls::new(1.0, false)),
            bytes_per_frame: bytes_per_frame as u64,
            frames_written: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            last_timestamp_ns: AtomicU64::new(0),
            route_epoch: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn intent(&self) -> StreamIntent {
        self.config.intent
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn controls(&self) -> &Arc<StreamControls> {
        &self.controls
    }

    pub fn buffer(&self) -> &Arc<SharedRingBuffer> {
        &self.buffer
    }

    pub fn device(&self) -> DeviceDescriptor {
        self.lock().device.clone()
    }

    /// Changes each time `bind_device` swaps in a different device.
    pub fn route_epoch(&self) -> u64 {
        self.route_epoch.load(Ordering::Acquire)
    }

    pub fn is_start_pending(&self) -> bool {
        self.lock().pending_start
    }

    /// Where `Invalidated`/`Released` events are reported.
    pub fn set_event_sink(&self, tx: mpsc::UnboundedSender<SessionEvent>) {
        self.lock().events = Some(tx);
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        let prev = SessionState::from_u8(self.state.swap(next.as_u8(), Ordering::AcqRel));
        if prev != next {
            tracing::debug!(session_id = self.id, from = %prev, to = %next, "session state");
        }
    }

    fn illegal(&self, op: &'static str) -> StreamError {
        StreamError::IllegalState {
            op,
            state: self.state().to_string(),
        }
    }

    fn check_live(&self, op: &'static str) -> Result<SessionState, StreamError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(self.illegal(op));
        }
        Ok(state)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Returns the buffer handle; the first call moves New to Prepared.
    /// Repeated calls return the same handle.
    pub fn resolve_buffer(&self) -> Result<BufferHandle, StreamError> {
        let _control = self.lock();
        if self.check_live("resolve_buffer")? == SessionState::New {
            self.set_state(SessionState::Prepared);
        }
        Ok(self.handle)
    }

    /// Starts rendering. Without a routed device the request is remembered
    /// and applied by the next `bind_device` that supplies one.
    pub fn start(&self) -> Result<(), StreamError> {
        let mut control = self.lock();
        match self.check_live("start")? {
            SessionState::Prepared | SessionState::Stopped => {}
            _ => return Err(self.illegal("start")),
        }
        if control.device.is_none() {
            control.pending_start = true;
            self.set_state(SessionState::Prepared);
            tracing::info!(session_id = self.id, "start deferred until a device is routed");
            return Ok(());
        }
        control.pending_start = false;
        self.set_state(SessionState::Running);
        Ok(())
    }

    /// Running to Paused; `is_flush` also drops unread data. If the flush
    /// fails the session stays Running.
    pub fn pause(&self, is_flush: bool) -> Result<(), StreamError> {
        let _control = self.lock();
        if self.check_live("pause")? != SessionState::Running {
            return Err(self.illegal("pause"));
        }
        self.set_state(SessionState::Paused);
        if is_flush {
            if let Err(e) = self.flush_buffer() {
                self.set_state(SessionState::Running);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), StreamError> {
        let mut control = self.lock();
        if self.check_live("resume")? != SessionState::Paused {
            return Err(self.illegal("resume"));
        }
        if control.device.is_none() {
            control.pending_start = true;
            self.set_state(SessionState::Prepared);
            return Ok(());
        }
        self.set_state(SessionState::Running);
        Ok(())
    }

    pub fn stop(&self) -> Result<(), StreamError> {
        let mut control = self.lock();
        match self.check_live("stop")? {
            SessionState::Running | SessionState::Paused => {}
            SessionState::Prepared if control.pending_start => {}
            _ => return Err(self.illegal("stop")),
        }
        control.pending_start = false;
        self.set_state(SessionState::Stopped);
        Ok(())
    }

    /// Drops unread data. Only legal while nothing is being rendered.
    pub fn flush(&self) -> Result<(), StreamError> {
        let _control = self.lock();
        match self.check_live("flush")? {
            SessionState::Paused | SessionState::Stopped => self.flush_buffer(),
            _ => Err(self.illegal("flush")),
        }
    }

    fn flush_buffer(&self) -> Result<(), StreamError> {
        for _ in 0..FLUSH_ATTEMPTS {
            match self.buffer.flush() {
                Err(StreamError::IllegalState { .. }) => std::thread::yield_now(),
                other => return other,
            }
        }
        Err(self.illegal("flush"))
    }

    /// Terminal. Closes the buffer after in-flight data calls finish and
    /// withdraws the handle.
    pub fn release(&self) -> Result<(), StreamError> {
        let control = self.lock();
        if self.state() == SessionState::Released {
            return Err(self.illegal("release"));
        }
        self.set_state(SessionState::Released);
        self.buffer.release();
        self.handles.remove(self.handle.id);
        if let Some(tx) = &control.events {
            let _ = tx.send(SessionEvent::Released {
                session_id: self.id,
            });
        }
        tracing::info!(session_id = self.id, "session released");
        Ok(())
    }

    /// Moves the session to Invalid after a fatal error (peer death).
    pub fn invalidate(&self, reason: &str) {
        let control = self.lock();
        if self.state().is_terminal() {
            return;
        }
        self.set_state(SessionState::Invalid);
        self.buffer.release();
        self.handles.remove(self.handle.id);
        if let Some(tx) = &control.events {
            let _ = tx.send(SessionEvent::Invalidated {
                session_id: self.id,
                reason: reason.to_string(),
            });
        }
        tracing::warn!(session_id = self.id, reason, "session invalidated");
    }

    /// Attaches the routed device and returns the previous one.
    ///
    /// Losing the device parks a running session in Prepared with its start
    /// pending; gaining one completes a pending start.
    pub fn bind_device(&self, device: DeviceDescriptor) -> Result<DeviceDescriptor, StreamError> {
        let mut control = self.lock();
        let state = self.check_live("bind_device")?;
        let previous = std::mem::replace(&mut control.device, device);
        if previous != control.device {
            self.route_epoch.fetch_add(1, Ordering::AcqRel);
        }

        if control.device.is_none() {
            if state == SessionState::Running {
                control.pending_start = true;
                self.set_state(SessionState::Prepared);
            }
        } else if control.pending_start && state == SessionState::Prepared {
            control.pending_start = false;
            self.set_state(SessionState::Running);
            tracing::info!(session_id = self.id, "pending start applied");
        }
        Ok(previous)
    }

    // ── Data path ─────────────────────────────────────────────

    /// Client side: queue one frame. Counts an overrun on `BufferFull`.
    pub fn write_frame(&self, frame: &[u8], timestamp_ns: u64) -> Result<(), StreamError> {
        self.check_live("write")?;
        match self.buffer.write(frame, timestamp_ns) {
            Ok(()) => {
                self.frames_written
                    .fetch_add(frame.len() as u64 / self.bytes_per_frame, Ordering::Relaxed);
                Ok(())
            }
            Err(StreamError::BufferFull) => {
                self.overruns.fetch_add(1, Ordering::Relaxed);
                Err(StreamError::BufferFull)
            }
            Err(e) => Err(e),
        }
    }

    /// Server side: fill `dest` for one mix cycle, silence on underrun.
    pub fn read_frame_into(&self, dest: &mut [u8]) -> Result<ReadOutcome, StreamError> {
        self.check_live("read")?;
        let outcome = self.buffer.read_into(dest)?;
        self.frames_read
            .fetch_add(outcome.bytes_read as u64 / self.bytes_per_frame, Ordering::Relaxed);
        if outcome.underrun {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ts) = outcome.timestamp_ns {
            self.last_timestamp_ns.store(ts, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    pub fn position(&self) -> SessionPosition {
        SessionPosition {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }

    pub fn handle_info(&self) -> Result<HandleInfo, StreamError> {
        self.check_live("request_handle_info")?;
        let (read_cursor, write_cursor) = self.buffer.read_write_position();
        Ok(HandleInfo {
            handle: self.handle,
            read_cursor,
            write_cursor,
            position: self.position(),
            last_timestamp_ns: self.last_timestamp_ns.load(Ordering::Relaxed),
        })
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("intent", &self.config.intent)
            .field("state", &self.state())
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
