use crate::dispatch::{ConnectionId, Dispatcher, RequestHandler};
use crate::message::{
    reply_frame, Notification, Request, Response, FRAME_NOTIFICATION, FRAME_REPLY,
};
use crate::parcel::ParcelReader;
use audiod_core::{
    AudioStreamType, DeviceDescriptor, DeviceRole, IpcError, PrivacyClass, ProcessConfig,
    SessionId, StatusCode,
};
use audiod_stream::{BufferHandle, HandleInfo};
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Frames larger than this are treated as a protocol violation.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

// ── Framing ───────────────────────────────────────────────────

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    if frame.len() > MAX_FRAME_BYTES {
        return Err(IpcError::Malformed(format!("frame of {} bytes", frame.len())));
    }
    writer.write_all(&(frame.len() as u32).to_le_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame. `Ok(None)` on a clean close between
/// frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(IpcError::Malformed(format!("frame of {len} bytes")));
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            IpcError::PeerClosed
        } else {
            e.into()
        }
    })?;
    Ok(Some(Bytes::from(frame)))
}

// ── Server side ───────────────────────────────────────────────

/// Answers requests on `stream` until the peer goes away, then tells the
/// handler so it can clean up whatever the connection owned.
///
/// Replies and notifications share one writer. Replies go out in request
/// order; a notification may land between any two of them.
pub async fn serve_connection<S, H>(
    stream: S,
    conn: ConnectionId,
    dispatcher: Arc<Dispatcher<H>>,
) -> Result<(), IpcError>
where
    S: AsyncRead + AsyncWrite,
    H: RequestHandler,
{
    tracing::debug!(conn, "connection opened");
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Bytes>();
    let (note_tx, mut note_rx) = mpsc::unbounded_channel::<Notification>();
    dispatcher.handler().on_connect(conn, note_tx).await;

    let read_loop = async {
        while let Some(frame) = read_frame(&mut reader).await? {
            let reply = dispatcher.dispatch(conn, frame).await;
            if reply_tx.send(reply_frame(&reply)).is_err() {
                break;
            }
        }
        Ok::<(), IpcError>(())
    };
    let write_loop = async {
        loop {
            let frame = tokio::select! {
                biased;
                Some(reply) = reply_rx.recv() => reply,
                Some(note) = note_rx.recv() => note.encode(),
                else => return Ok::<(), IpcError>(()),
            };
            write_frame(&mut writer, &frame).await?;
        }
    };
    let mut result: Result<(), IpcError> = tokio::select! {
        r = read_loop => r,
        r = write_loop => r,
    };

    // A peer that only shut down its write side still gets its last reply.
    if result.is_ok() {
        while let Ok(reply) = reply_rx.try_recv() {
            if let Err(e) = write_frame(&mut writer, &reply).await {
                result = Err(e);
                break;
            }
        }
    }

    match &result {
        Ok(()) => tracing::debug!(conn, "connection closed"),
        Err(e) => tracing::warn!(conn, "connection lost: {e}"),
    }
    dispatcher.handler().on_disconnect(conn).await;
    result
}

// ── Client proxy ──────────────────────────────────────────────

/// Request/response proxy over any byte stream.
///
/// Notifications that arrive while a call waits for its reply are queued
/// and handed out by `next_notification` / `try_notification`.
pub struct Client<S> {
    stream: S,
    token: String,
    notifications: VecDeque<Notification>,
}

enum ServerFrame {
    Reply(ParcelReader),
    Notification(Notification),
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, token: &str) -> Self {
        Self {
            stream,
            token: token.to_string(),
            notifications: VecDeque::new(),
        }
    }

    async fn next_frame(&mut self) -> Result<ServerFrame, IpcError> {
        let frame = read_frame(&mut self.stream)
            .await?
            .ok_or(IpcError::PeerClosed)?;
        let mut r = ParcelReader::new(frame);
        match r.read_u32()? {
            FRAME_REPLY => Ok(ServerFrame::Reply(r)),
            FRAME_NOTIFICATION => {
                let note = Notification::decode_payload(&mut r)?;
                r.finish()?;
                Ok(ServerFrame::Notification(note))
            }
            kind => Err(IpcError::Malformed(format!("unknown frame kind {kind}"))),
        }
    }

    /// Sends one request and waits for its response. A non-success status is
    /// returned as `IpcError::Status`.
    pub async fn call(&mut self, request: &Request) -> Result<Response, IpcError> {
        write_frame(&mut self.stream, &request.encode(&self.token)).await?;
        let mut r = loop {
            match self.next_frame().await? {
                ServerFrame::Reply(r) => break r,
                ServerFrame::Notification(note) => self.notifications.push_back(note),
            }
        };
        let status = StatusCode::from_code(r.read_i32()?);
        if !status.is_success() {
            return Err(IpcError::Status(status));
        }
        let response = Response::decode_payload(request.code(), &mut r)?;
        r.finish()?;
        Ok(response)
    }

    /// Waits for the next notification, queued ones first.
    ///
    /// Not cancel safe once it reaches the stream: dropping the future in
    /// the middle of a frame leaves the connection unusable.
    pub async fn next_notification(&mut self) -> Result<Notification, IpcError> {
        if let Some(note) = self.notifications.pop_front() {
            return Ok(note);
        }
        match self.next_frame().await? {
            ServerFrame::Notification(note) => Ok(note),
            ServerFrame::Reply(_) => Err(IpcError::Malformed(
                "reply without a request".to_string(),
            )),
        }
    }

    /// A notification that arrived during an earlier call, if any.
    pub fn try_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    fn unexpected(response: Response) -> IpcError {
        IpcError::Malformed(format!("unexpected response {response:?}"))
    }

    pub async fn create_session(
        &mut self,
        config: ProcessConfig,
    ) -> Result<(SessionId, DeviceDescriptor), IpcError> {
        match self.call(&Request::CreateSession(config)).await? {
            Response::Session { session_id, device } => Ok((session_id, device)),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Returns the buffer geometry and, when the daemon backs the ring with a
    /// file, the path to map it from.
    pub async fn resolve_buffer(
        &mut self,
        session_id: SessionId,
    ) -> Result<(BufferHandle, Option<PathBuf>), IpcError> {
        match self.call(&Request::ResolveBuffer { session_id }).await? {
            Response::Handle { handle, path } => {
                let path = (!path.is_empty()).then(|| PathBuf::from(path));
                Ok((handle, path))
            }
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn start(&mut self, session_id: SessionId) -> Result<(), IpcError> {
        self.call(&Request::Start { session_id }).await.map(|_| ())
    }

    pub async fn pause(&mut self, session_id: SessionId, is_flush: bool) -> Result<(), IpcError> {
        self.call(&Request::Pause {
            session_id,
            is_flush,
        })
        .await
        .map(|_| ())
    }

    pub async fn resume(&mut self, session_id: SessionId) -> Result<(), IpcError> {
        self.call(&Request::Resume { session_id }).await.map(|_| ())
    }

    pub async fn stop(&mut self, session_id: SessionId) -> Result<(), IpcError> {
        self.call(&Request::Stop { session_id }).await.map(|_| ())
    }

    pub async fn release(&mut self, session_id: SessionId) -> Result<(), IpcError> {
        self.call(&Request::Release { session_id }).await.map(|_| ())
    }

    pub async fn handle_info(&mut self, session_id: SessionId) -> Result<HandleInfo, IpcError> {
        match self.call(&Request::RequestHandleInfo { session_id }).await? {
            Response::HandleInfo(info) => Ok(info),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn get_devices(
        &mut self,
        role: DeviceRole,
        privacy: PrivacyClass,
    ) -> Result<Vec<DeviceDescriptor>, IpcError> {
        match self.call(&Request::GetDevices { role, privacy }).await? {
            Response::Devices(devices) => Ok(devices),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn set_stream_volume(
        &mut self,
        stream_type: AudioStreamType,
        volume: f32,
    ) -> Result<(), IpcError> {
        self.call(&Request::SetStreamVolume {
            stream_type,
            volume,
        })
        .await
        .map(|_| ())
    }

    pub async fn get_stream_volume(
        &mut self,
        stream_type: AudioStreamType,
    ) -> Result<f32, IpcError> {
        match self.call(&Request::GetStreamVolume { stream_type }).await? {
            Response::Volume(v) => Ok(v),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn get_audio_parameter(&mut self, key: &str) -> Result<String, IpcError> {
        match self
            .call(&Request::GetAudioParameter {
                key: key.to_string(),
            })
            .await?
        {
            Response::Parameter(value) => Ok(value),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn set_audio_parameter(&mut self, key: &str, value: &str) -> Result<(), IpcError> {
        self.call(&Request::SetAudioParameter {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
