use audiod_core::StreamError;
use memmap2::MmapMut;
use std::collections::HashMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Mapped layout ─────────────────────────────────────────────
//
// [header: 64 bytes][span metadata: 16 bytes per span][span data]
//
// Every header and metadata field is naturally aligned, so both processes
// operate on the same atomics.

const MAGIC: u64 = u64::from_le_bytes(*b"AUDIODRB");
const HEADER_BYTES: usize = 64;
const SPAN_META_BYTES: usize = 16;

const OFF_MAGIC: usize = 0;
const OFF_SPAN_COUNT: usize = 8;
const OFF_SPAN_SIZE: usize = 12;
const OFF_WRITE: usize = 16;
const OFF_READ: usize = 24;
const OFF_READ_OFFSET: usize = 32;
const OFF_RELEASED: usize = 40;
const OFF_PRODUCER_BUSY: usize = 44;
const OFF_CONSUMER_BUSY: usize = 48;

fn check_geometry(span_count: u32, span_size_bytes: u32) -> Result<usize, StreamError> {
    if span_count == 0 || !span_count.is_power_of_two() {
        return Err(StreamError::InvalidParam(format!(
            "span count {span_count} is not a power of two"
        )));
    }
    if span_size_bytes == 0 {
        return Err(StreamError::InvalidParam("span size is zero".to_string()));
    }
    (span_count as usize)
        .checked_mul(SPAN_META_BYTES + span_size_bytes as usize)
        .and_then(|spans| spans.checked_add(HEADER_BYTES))
        .ok_or_else(|| StreamError::InvalidParam("buffer geometry overflows".to_string()))
}

fn map_error(path: &Path, e: std::io::Error) -> StreamError {
    StreamError::Map(format!("{}: {e}", path.display()))
}

/// Result of an allocation-free read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes copied from the ring; the rest of the destination is silence.
    pub bytes_read: usize,
    pub underrun: bool,
    /// Timestamp of the first span touched, if any data was read.
    pub timestamp_ns: Option<u64>,
}

/// Fixed-geometry single-producer/single-consumer ring of spans living in
/// one memory mapping.
///
/// The mapping is either anonymous (in-process only) or backed by a file
/// that a peer process maps with [`SharedRingBuffer::open`]. Cursors, span
/// metadata and the released flag live inside the mapping, so both
/// mappings observe the same ring.
///
/// The producer publishes a span by storing the write cursor with Release
/// ordering after the span bytes and metadata are in place; the consumer
/// loads it with Acquire before touching the span. The read cursor is
/// published the same way in the opposite direction. Cursors count spans
/// and never wrap, so `read <= write <= read + span_count` always holds.
///
/// Each side may be driven by one thread at a time; a second concurrent
/// producer (or consumer) call is rejected rather than blocked.
pub struct SharedRingBuffer {
    map: MmapMut,
    base: *mut u8,
    span_count: u32,
    span_size_bytes: usize,
    mask: u64,
    path: Option<PathBuf>,
    /// The creating side unlinks the backing file.
    owner: bool,
    released: AtomicBool,
    in_flight: AtomicUsize,
}

// Span memory is only reached through `SideGuard`, which gives one thread
// exclusive use of one side; the cursor protocol keeps the two sides on
// disjoint spans. The mapping outlives every borrow of `base`.
unsafe impl Sync for SharedRingBuffer {}
unsafe impl Send for SharedRingBuffer {}

struct SideGuard<'a> {
    buffer: &'a SharedRingBuffer,
    side: &'a AtomicU32,
}

impl Drop for SideGuard<'_> {
    fn drop(&mut self) {
        self.side.store(0, Ordering::Release);
        self.buffer.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SharedRingBuffer {
    /// Anonymous mapping, visible to this process only.
    pub fn new(span_count: u32, span_size_bytes: u32) -> Result<Self, StreamError> {
        let len = check_geometry(span_count, span_size_bytes)?;
        let map = MmapMut::map_anon(len).map_err(|e| StreamError::Map(e.to_string()))?;
        Ok(Self::init(map, span_count, span_size_bytes, None))
    }

    /// File-backed mapping at `dir/name` that a peer can map by path. The
    /// file is created exclusively and unlinked on release.
    pub fn create_in(
        dir: &Path,
        name: &str,
        span_count: u32,
        span_size_bytes: u32,
    ) -> Result<Self, StreamError> {
        let len = check_geometry(span_count, span_size_bytes)?;
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| map_error(&path, e))?;
        file.set_len(len as u64).map_err(|e| map_error(&path, e))?;
        // SAFETY: the file was just created exclusively by us; peers only map
        // it through `open`, which goes through the same atomic layout.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| map_error(&path, e))?;
        tracing::debug!(path = %path.display(), len, "ring buffer file created");
        Ok(Self::init(map, span_count, span_size_bytes, Some(path)))
    }

    /// Maps a buffer another process created with [`create_in`].
    ///
    /// [`create_in`]: SharedRingBuffer::create_in
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| map_error(path, e))?;
        // SAFETY: all shared state is accessed through atomics or through
        // spans owned by one side at a time.
        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| map_error(path, e))?;
        if map.len() < HEADER_BYTES {
            return Err(StreamError::Map(format!("{}: truncated header", path.display())));
        }
        let base = map.as_mut_ptr();
        // SAFETY: the header fits in the mapping, offsets are aligned.
        let (magic, span_count, span_size_bytes) = unsafe {
            (
                (*(base.add(OFF_MAGIC) as *const AtomicU64)).load(Ordering::Acquire),
                (*(base.add(OFF_SPAN_COUNT) as *const AtomicU32)).load(Ordering::Relaxed),
                (*(base.add(OFF_SPAN_SIZE) as *const AtomicU32)).load(Ordering::Relaxed),
            )
        };
        if magic != MAGIC {
            return Err(StreamError::Map(format!("{}: not a ring buffer", path.display())));
        }
        let len = check_geometry(span_count, span_size_bytes)?;
        if map.len() != len {
            return Err(StreamError::Map(format!(
                "{}: mapped {} bytes, geometry needs {len}",
                path.display(),
                map.len()
            )));
        }
        let mut buffer = Self::from_map(map, span_count, span_size_bytes, Some(path.to_path_buf()));
        buffer.owner = false;
        Ok(buffer)
    }

    fn from_map(
        mut map: MmapMut,
        span_count: u32,
        span_size_bytes: u32,
        path: Option<PathBuf>,
    ) -> Self {
        let base = map.as_mut_ptr();
        Self {
            map,
            base,
            span_count,
            span_size_bytes: span_size_bytes as usize,
            mask: span_count as u64 - 1,
            path,
            owner: true,
            released: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn init(map: MmapMut, span_count: u32, span_size_bytes: u32, path: Option<PathBuf>) -> Self {
        let buffer = Self::from_map(map, span_count, span_size_bytes, path);
        buffer.header_u32(OFF_SPAN_COUNT).store(span_count, Ordering::Relaxed);
        buffer.header_u32(OFF_SPAN_SIZE).store(span_size_bytes, Ordering::Relaxed);
        buffer.header_u64(OFF_MAGIC).store(MAGIC, Ordering::Release);
        buffer
    }

    fn header_u64(&self, offset: usize) -> &AtomicU64 {
        // SAFETY: offset is an 8-aligned header field inside the live mapping.
        unsafe { &*(self.base.add(offset) as *const AtomicU64) }
    }

    fn header_u32(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: offset is a 4-aligned header field inside the live mapping.
        unsafe { &*(self.base.add(offset) as *const AtomicU32) }
    }

    fn write_cursor(&self) -> &AtomicU64 {
        self.header_u64(OFF_WRITE)
    }

    fn read_cursor(&self) -> &AtomicU64 {
        self.header_u64(OFF_READ)
    }

    /// Bytes of the span at the read cursor already handed to the consumer.
    fn read_offset(&self) -> &AtomicU64 {
        self.header_u64(OFF_READ_OFFSET)
    }

    /// `(valid_bytes, timestamp_ns)` of the span at `cursor`.
    fn span_meta(&self, cursor: u64) -> (&AtomicU64, &AtomicU64) {
        let offset = HEADER_BYTES + (cursor & self.mask) as usize * SPAN_META_BYTES;
        (self.header_u64(offset), self.header_u64(offset + 8))
    }

    fn span_data(&self, cursor: u64) -> *mut u8 {
        let offset = HEADER_BYTES
            + self.span_count as usize * SPAN_META_BYTES
            + (cursor & self.mask) as usize * self.span_size_bytes;
        // SAFETY: offset + span_size_bytes is within the mapping by geometry.
        unsafe { self.base.add(offset) }
    }

    pub fn span_count(&self) -> u32 {
        self.span_count
    }

    pub fn span_size_bytes(&self) -> usize {
        self.span_size_bytes
    }

    /// Backing file, if a peer can map this buffer.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Released by this mapping or by the peer's.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
            || self.header_u32(OFF_RELEASED).load(Ordering::Acquire) != 0
    }

    fn enter<'a>(&'a self, side: usize, op: &'static str) -> Result<SideGuard<'a>, StreamError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.is_released() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(StreamError::Released);
        }
        let side = self.header_u32(side);
        if side.swap(1, Ordering::Acquire) != 0 {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(StreamError::IllegalState {
                op,
                state: "concurrent access".to_string(),
            });
        }
        Ok(SideGuard { buffer: self, side })
    }

    /// Publishes one frame into the next free span.
    ///
    /// Fails with `BufferFull` when every span holds unread data; nothing is
    /// overwritten and the cursors are left untouched.
    pub fn write(&self, frame: &[u8], timestamp_ns: u64) -> Result<(), StreamError> {
        if frame.len() > self.span_size_bytes {
            return Err(StreamError::InvalidParam(format!(
                "frame of {} bytes exceeds span size {}",
                frame.len(),
                self.span_size_bytes
            )));
        }
        let _guard = self.enter(OFF_PRODUCER_BUSY, "write")?;

        let write = self.write_cursor().load(Ordering::Relaxed);
        let read = self.read_cursor().load(Ordering::Acquire);
        if write - read >= self.span_count as u64 {
            return Err(StreamError::BufferFull);
        }

        // SAFETY: this span lies outside [read, write), so the consumer
        // cannot be reading it, and the producer guard excludes other writers.
        unsafe {
            std::ptr::copy_nonoverlapping(frame.as_ptr(), self.span_data(write), frame.len());
        }
        let (valid, timestamp) = self.span_meta(write);
        valid.store(frame.len() as u64, Ordering::Relaxed);
        timestamp.store(timestamp_ns, Ordering::Relaxed);
        self.write_cursor().store(write + 1, Ordering::Release);
        Ok(())
    }

    /// Reads up to `max_bytes` from the oldest unread span.
    ///
    /// A span is consumed across several calls if `max_bytes` is smaller than
    /// its payload; the read cursor advances once the span is drained.
    pub fn read(&self, max_bytes: usize) -> Result<(usize, Vec<u8>, u64), StreamError> {
        let _guard = self.enter(OFF_CONSUMER_BUSY, "read")?;

        let read = self.read_cursor().load(Ordering::Relaxed);
        let write = self.write_cursor().load(Ordering::Acquire);
        if read == write {
            return Err(StreamError::BufferEmpty);
        }

        let (valid, timestamp) = self.span_meta(read);
        let (valid, offset) = self.span_extent(valid);
        let n = max_bytes.min(valid - offset);
        // SAFETY: the span lies inside [read, write), which the producer never
        // touches until the read cursor moves past it.
        let bytes = unsafe { std::slice::from_raw_parts(self.span_data(read).add(offset), n) }
            .to_vec();
        let timestamp = timestamp.load(Ordering::Relaxed);
        self.advance(read, offset + n, valid);
        Ok((n, bytes, timestamp))
    }

    /// Fills `dest` from as many spans as needed, zero-filling on underrun.
    pub fn read_into(&self, dest: &mut [u8]) -> Result<ReadOutcome, StreamError> {
        let _guard = self.enter(OFF_CONSUMER_BUSY, "read")?;

        let write = self.write_cursor().load(Ordering::Acquire);
        let mut read = self.read_cursor().load(Ordering::Relaxed);
        let mut filled = 0;
        let mut timestamp_ns = None;

        while filled < dest.len() && read < write {
            let (valid, timestamp) = self.span_meta(read);
            let (valid, offset) = self.span_extent(valid);
            let n = (dest.len() - filled).min(valid - offset);
            // SAFETY: see `read`.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.span_data(read).add(offset),
                    dest[filled..].as_mut_ptr(),
                    n,
                );
            }
            if timestamp_ns.is_none() {
                timestamp_ns = Some(timestamp.load(Ordering::Relaxed));
            }
            filled += n;
            if self.advance(read, offset + n, valid) {
                read += 1;
            }
        }

        dest[filled..].fill(0);
        Ok(ReadOutcome {
            bytes_read: filled,
            underrun: filled < dest.len(),
            timestamp_ns,
        })
    }

    /// `(valid_bytes, read_offset)` clamped to the span, since the peer
    /// mapping can write anything into shared metadata.
    fn span_extent(&self, valid: &AtomicU64) -> (usize, usize) {
        let valid = (valid.load(Ordering::Relaxed) as usize).min(self.span_size_bytes);
        let offset = (self.read_offset().load(Ordering::Relaxed) as usize).min(valid);
        (valid, offset)
    }

    /// Returns true if the span at `read` was fully consumed.
    fn advance(&self, read: u64, consumed: usize, valid: usize) -> bool {
        if consumed >= valid {
            self.read_offset().store(0, Ordering::Relaxed);
            self.read_cursor().store(read + 1, Ordering::Release);
            true
        } else {
            self.read_offset().store(consumed as u64, Ordering::Relaxed);
            false
        }
    }

    /// Drops all unread data: the read cursor jumps to the write cursor.
    pub fn flush(&self) -> Result<(), StreamError> {
        let _guard = self.enter(OFF_CONSUMER_BUSY, "flush")?;
        let write = self.write_cursor().load(Ordering::Acquire);
        self.read_offset().store(0, Ordering::Relaxed);
        self.read_cursor().store(write, Ordering::Release);
        Ok(())
    }

    /// `(read, write)` cursors, in spans.
    pub fn read_write_position(&self) -> (u64, u64) {
        let read = self.read_cursor().load(Ordering::Acquire);
        let write = self.write_cursor().load(Ordering::Acquire);
        (read, write)
    }

    /// Spans holding unread data.
    pub fn readable_spans(&self) -> u64 {
        let (read, write) = self.read_write_position();
        write - read
    }

    /// Closes the buffer for both mappings. Waits for this process's calls
    /// already inside the buffer to finish; later calls on either side fail
    /// with `Released`. The owner unlinks the backing file. The mapping
    /// itself stays valid until the last reference is dropped.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.header_u32(OFF_RELEASED).store(1, Ordering::Release);
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
        self.unlink();
    }

    fn unlink(&self) {
        let Some(path) = self.path.as_deref().filter(|_| self.owner) else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "ring buffer file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "ring buffer cleanup failed: {e}"),
        }
    }
}

impl Drop for SharedRingBuffer {
    fn drop(&mut self) {
        self.unlink();
    }
}

impl fmt::Debug for SharedRingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (read, write) = self.read_write_position();
        f.debug_struct("SharedRingBuffer")
            .field("span_count", &self.span_count)
            .field("span_size_bytes", &self.span_size_bytes)
            .field("mapped_bytes", &self.map.len())
            .field("read", &read)
            .field("write", &write)
            .field("released", &self.is_released())
            .field("path", &self.path)
            .finish()
    }
}

// ── Handle transfer ───────────────────────────────────────────

/// What a peer needs to map a session's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    pub id: u64,
    pub span_count: u32,
    pub span_size_bytes: u32,
}

struct HandleEntry {
    buffer: Arc<SharedRingBuffer>,
    claimed: bool,
}

/// Buffers published for transfer to a peer. Each may be claimed once.
pub struct HandleTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, HandleEntry>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<u64, HandleEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, buffer: Arc<SharedRingBuffer>) -> BufferHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = BufferHandle {
            id,
            span_count: buffer.span_count(),
            span_size_bytes: buffer.span_size_bytes() as u32,
        };
        self.entries().insert(
            id,
            HandleEntry {
                buffer,
                claimed: false,
            },
        );
        handle
    }

    /// Hands the buffer to the peer. A second claim of the same id fails.
    pub fn claim(&self, id: u64) -> Result<Arc<SharedRingBuffer>, StreamError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(&id)
            .ok_or(StreamError::HandleNotFound(id))?;
        if entry.claimed {
            return Err(StreamError::AlreadyTransferred(id));
        }
        entry.claimed = true;
        Ok(Arc::clone(&entry.buffer))
    }

    pub fn is_claimed(&self, id: u64) -> bool {
        self.entries().get(&id).is_some_and(|e| e.claimed)
    }

    pub fn remove(&self, id: u64) {
        self.entries().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
