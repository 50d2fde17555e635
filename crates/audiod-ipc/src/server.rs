use crate::dispatch::{ConnectionId, NotificationSender, RequestHandler};
use crate::message::{Notification, Request, Response};
use async_trait::async_trait;
use audiod_core::{ParameterChange, ProcessConfig, SessionId, StatusCode, StreamError};
use audiod_policy::{Orchestrator, ParameterStore, Subscription, VolumePolicy};
use audiod_stream::{StreamService, StreamSession};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Services a request can reach.
pub struct ServerParts {
    pub streams: Arc<StreamService>,
    pub orchestrator: Arc<Orchestrator>,
    pub volume: Arc<VolumePolicy>,
    pub parameters: Arc<ParameterStore>,
}

// ── Notification forwarding ───────────────────────────────────

/// Notification plumbing for one live connection.
struct Link {
    notifier: NotificationSender,
    forwarders: Vec<JoinHandle<()>>,
}

impl Link {
    fn track(&mut self, task: JoinHandle<()>) {
        self.forwarders.retain(|t| !t.is_finished());
        self.forwarders.push(task);
    }
}

fn forward_session(tx: NotificationSender, mut subscription: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(note) = subscription.recv().await {
            if tx.send(Notification::Session(note)).is_err() {
                break;
            }
        }
    })
}

fn forward_parameters(
    tx: NotificationSender,
    mut changes: mpsc::UnboundedReceiver<ParameterChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            if tx.send(Notification::Parameter(change)).is_err() {
                break;
            }
        }
    })
}

// ── Server ────────────────────────────────────────────────────

/// Request handler for the daemon: stream lifecycle, device queries, volume
/// policy and parameters. Sessions belong to the connection that created
/// them and are invalidated when it drops. Routing notifications for those
/// sessions and every parameter change are pushed to the connection.
pub struct AudioServer {
    parts: ServerParts,
    owners: Mutex<HashMap<ConnectionId, Vec<SessionId>>>,
    links: Mutex<HashMap<ConnectionId, Link>>,
}

impl AudioServer {
    pub fn new(parts: ServerParts) -> Self {
        Self {
            parts,
            owners: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
        }
    }

    fn owners(&self) -> MutexGuard<'_, HashMap<ConnectionId, Vec<SessionId>>> {
        self.owners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn links(&self) -> MutexGuard<'_, HashMap<ConnectionId, Link>> {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `conn` has a notification channel open.
    pub fn is_linked(&self, conn: ConnectionId) -> bool {
        self.links().contains_key(&conn)
    }

    pub fn sessions_of(&self, conn: ConnectionId) -> Vec<SessionId> {
        self.owners().get(&conn).cloned().unwrap_or_default()
    }

    /// A connection may only drive sessions it created.
    fn owned(&self, conn: ConnectionId, id: SessionId) -> Result<Arc<StreamSession>, StatusCode> {
        if !self.sessions_of(conn).contains(&id) {
            return Err(StatusCode::NotFound);
        }
        self.parts.streams.get(id).map_err(|e| e.status())
    }

    fn create_session(
        &self,
        conn: ConnectionId,
        config: ProcessConfig,
    ) -> Result<Response, StatusCode> {
        let session = self
            .parts
            .streams
            .create_session(config)
            .map_err(|e| e.status())?;
        self.parts.volume.attach(&session);
        let (decision, subscription) = match self
            .parts
            .orchestrator
            .register_session(Arc::clone(&session))
        {
            Ok(registered) => registered,
            Err(e) => {
                let _ = self.parts.streams.release_session(session.id());
                return Err(e.status());
            }
        };

        let id = session.id();
        self.owners().entry(conn).or_default().push(id);
        // Without a link nobody would read the notifications.
        if let Some(link) = self.links().get_mut(&conn) {
            let task = forward_session(link.notifier.clone(), subscription);
            link.track(task);
        }
        tracing::info!(
            conn,
            session_id = id,
            device_type = ?decision.device.device_type,
            "session created over ipc"
        );
        Ok(Response::Session {
            session_id: id,
            device: decision.device,
        })
    }

    fn release(&self, conn: ConnectionId, id: SessionId) -> Result<Response, StatusCode> {
        self.owned(conn, id)?;
        let result = self.parts.streams.release_session(id);
        if let Some(ids) = self.owners().get_mut(&conn) {
            ids.retain(|s| *s != id);
        }
        result.map(|_| Response::Empty).map_err(|e| e.status())
    }

    /// The peer maps the ring from the returned path, so the handle counts
    /// as transferred once resolved.
    fn resolve(&self, conn: ConnectionId, id: SessionId) -> Result<Response, StatusCode> {
        let session = self.owned(conn, id)?;
        let handle = session.resolve_buffer().map_err(|e| e.status())?;
        match self.parts.streams.claim_buffer(handle.id) {
            Ok(_) | Err(StreamError::AlreadyTransferred(_)) => {}
            Err(e) => return Err(e.status()),
        }
        let path = session
            .buffer()
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Response::Handle { handle, path })
    }
}

#[async_trait]
impl RequestHandler for AudioServer {
    async fn handle(&self, conn: ConnectionId, request: Request) -> Result<Response, StatusCode> {
        let parts = &self.parts;
        let empty = |r: Result<(), StreamError>| {
            r.map(|_| Response::Empty).map_err(|e| e.status())
        };

        match request {
            Request::CreateSession(config) => self.create_session(conn, config),
            Request::ResolveBuffer { session_id } => self.resolve(conn, session_id),
            Request::Start { session_id } => empty(self.owned(conn, session_id)?.start()),
            Request::Pause {
                session_id,
                is_flush,
            } => empty(self.owned(conn, session_id)?.pause(is_flush)),
            Request::Resume { session_id } => empty(self.owned(conn, session_id)?.resume()),
            Request::Stop { session_id } => empty(self.owned(conn, session_id)?.stop()),
            Request::Release { session_id } => self.release(conn, session_id),
            Request::RequestHandleInfo { session_id } => self
                .owned(conn, session_id)?
                .handle_info()
                .map(Response::HandleInfo)
                .map_err(|e| e.status()),
            Request::GetDevices { role, privacy } => Ok(Response::Devices(
                parts.orchestrator.router().devices().devices(role, privacy),
            )),
            Request::SetStreamVolume {
                stream_type,
                volume,
            } => parts
                .volume
                .set_stream_volume(stream_type, volume)
                .map(|_| Response::Empty)
                .map_err(|e| e.status()),
            Request::GetStreamVolume { stream_type } => {
                Ok(Response::Volume(parts.volume.stream_volume(stream_type)))
            }
            Request::SetStreamMute { stream_type, muted } => {
                parts.volume.set_stream_mute(stream_type, muted);
                Ok(Response::Empty)
            }
            Request::GetStreamMute { stream_type } => {
                Ok(Response::Flag(parts.volume.stream_mute(stream_type)))
            }
            Request::IsStreamActive { stream_type } => {
                Ok(Response::Flag(parts.volume.is_stream_active(stream_type)))
            }
            Request::SetDeviceActive {
                device_type,
                active,
            } => parts
                .volume
                .set_device_active(device_type, active)
                .map(|_| Response::Empty)
                .map_err(|e| e.status()),
            Request::IsDeviceActive { device_type } => {
                Ok(Response::Flag(parts.volume.is_device_active(device_type)))
            }
            Request::SetRingerMode(mode) => {
                parts.volume.set_ringer_mode(mode);
                Ok(Response::Empty)
            }
            Request::GetRingerMode => Ok(Response::RingerMode(parts.volume.ringer_mode())),
            Request::GetAudioParameter { key } => {
                Ok(Response::Parameter(parts.parameters.get(&key)))
            }
            Request::SetAudioParameter { key, value } => parts
                .parameters
                .set(&key, &value)
                .map(|_| Response::Empty)
                .map_err(|e| e.status()),
            Request::GetRemoteAudioParameter {
                network_id,
                key,
                condition,
            } => Ok(Response::Parameter(
                parts.parameters.get_remote(&network_id, key, &condition),
            )),
            Request::SetRemoteAudioParameter {
                network_id,
                key,
                condition,
                value,
            } => parts
                .parameters
                .set_remote(&network_id, key, &condition, &value)
                .map(|_| Response::Empty)
                .map_err(|e| e.status()),
        }
    }

    async fn on_connect(&self, conn: ConnectionId, notifier: NotificationSender) {
        let parameters = forward_parameters(notifier.clone(), self.parts.parameters.subscribe());
        self.links().insert(
            conn,
            Link {
                notifier,
                forwarders: vec![parameters],
            },
        );
    }

    /// Peer death: every session the connection still owns becomes invalid
    /// and is dropped from the service. Other connections are untouched.
    async fn on_disconnect(&self, conn: ConnectionId) {
        if let Some(link) = self.links().remove(&conn) {
            for task in link.forwarders {
                task.abort();
            }
        }
        let ids = self.owners().remove(&conn).unwrap_or_default();
        let mut invalidated = 0;
        for id in &ids {
            if let Ok(session) = self.parts.streams.get(*id) {
                if !session.state().is_terminal() {
                    session.invalidate("client connection lost");
                    invalidated += 1;
                }
            }
        }
        let reaped = self.parts.streams.reap();
        if invalidated > 0 {
            tracing::warn!(conn, invalidated, reaped, "peer died, sessions invalidated");
        }
    }
}
