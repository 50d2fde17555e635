use crate::message::Notification;
use crate::transport::Client;
use audiod_core::{
    DeviceDescriptor, IpcError, ProcessConfig, SessionId, SessionNotification, StreamError,
};
use audiod_stream::{BufferHandle, HandleInfo, ReadOutcome, SharedRingBuffer};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};

/// Client half of one stream: the control connection plus this process's
/// own mapping of the session's ring buffer.
///
/// A render client writes spans that the daemon mixes; a capture client
/// reads spans that the daemon captured. Audio never crosses the socket.
pub struct ProcessClient<S> {
    client: Client<S>,
    session_id: SessionId,
    device: DeviceDescriptor,
    handle: BufferHandle,
    buffer: SharedRingBuffer,
}

fn map_ring(path: Option<&Path>, handle: &BufferHandle) -> Result<SharedRingBuffer, IpcError> {
    let path = path.ok_or_else(|| StreamError::Map("daemon ring has no backing file".into()))?;
    let buffer = SharedRingBuffer::open(path)?;
    if buffer.span_count() != handle.span_count
        || buffer.span_size_bytes() != handle.span_size_bytes as usize
    {
        return Err(StreamError::Map(format!(
            "{} does not match handle {}",
            path.display(),
            handle.id
        ))
        .into());
    }
    Ok(buffer)
}

impl<S> ProcessClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a session, resolves its buffer and maps it. The session is
    /// released again if the mapping fails.
    pub async fn create(mut client: Client<S>, config: ProcessConfig) -> Result<Self, IpcError> {
        let (session_id, device) = client.create_session(config).await?;
        let (handle, path) = client.resolve_buffer(session_id).await?;
        let buffer = match map_ring(path.as_deref(), &handle) {
            Ok(buffer) => buffer,
            Err(e) => {
                if let Err(release) = client.release(session_id).await {
                    tracing::debug!(session_id, "release after failed mapping: {release}");
                }
                return Err(e);
            }
        };
        tracing::debug!(session_id, handle = handle.id, "client ring mapped");
        Ok(Self {
            client,
            session_id,
            device,
            handle,
            buffer,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Device the session is routed to, as of the last notification read.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn buffer(&self) -> &SharedRingBuffer {
        &self.buffer
    }

    /// The control connection, for requests that are not about this stream.
    pub fn client(&mut self) -> &mut Client<S> {
        &mut self.client
    }

    // ── Data path ─────────────────────────────────────────────

    /// Render side: queue one span for the daemon.
    pub fn write(&self, frame: &[u8], timestamp_ns: u64) -> Result<(), StreamError> {
        self.buffer.write(frame, timestamp_ns)
    }

    /// Capture side: drain captured audio, zero-filling what is missing.
    pub fn read_into(&self, dest: &mut [u8]) -> Result<ReadOutcome, StreamError> {
        self.buffer.read_into(dest)
    }

    // ── Control path ──────────────────────────────────────────

    pub async fn start(&mut self) -> Result<(), IpcError> {
        self.client.start(self.session_id).await
    }

    pub async fn pause(&mut self, is_flush: bool) -> Result<(), IpcError> {
        self.client.pause(self.session_id, is_flush).await
    }

    pub async fn resume(&mut self) -> Result<(), IpcError> {
        self.client.resume(self.session_id).await
    }

    pub async fn stop(&mut self) -> Result<(), IpcError> {
        self.client.stop(self.session_id).await
    }

    pub async fn handle_info(&mut self) -> Result<HandleInfo, IpcError> {
        self.client.handle_info(self.session_id).await
    }

    /// Next notification on the connection. A device change for this
    /// session also updates [`ProcessClient::device`].
    pub async fn next_notification(&mut self) -> Result<Notification, IpcError> {
        let note = self.client.next_notification().await?;
        if let Notification::Session(SessionNotification::DeviceChanged {
            session_id,
            current,
            ..
        }) = &note
        {
            if *session_id == self.session_id {
                self.device = current.clone();
            }
        }
        Ok(note)
    }

    /// Releases the session and hands back the control connection. The
    /// mapping is dropped; the daemon removes the backing file.
    pub async fn release(mut self) -> Result<Client<S>, IpcError> {
        self.client.release(self.session_id).await?;
        Ok(self.client)
    }
}
