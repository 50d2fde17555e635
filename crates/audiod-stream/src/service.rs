use crate::buffer::{HandleTable, SharedRingBuffer};
use crate::session::{SessionState, StreamSession};
use audiod_core::{ProcessConfig, SessionEvent, SessionId, StreamError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Owns every live session and the table their buffers are published in.
pub struct StreamService {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, Arc<StreamSession>>>,
    handles: Arc<HandleTable>,
    /// Bumped whenever a session is added or removed.
    generation: AtomicU64,
    /// Where file-backed ring buffers are created; None keeps them in-process.
    buffer_dir: Option<PathBuf>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl StreamService {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            handles: Arc::new(HandleTable::new()),
            generation: AtomicU64::new(0),
            buffer_dir: None,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Sessions get ring buffers under `dir` that client processes can map.
    pub fn with_buffer_dir(dir: PathBuf) -> Self {
        Self {
            buffer_dir: Some(dir),
            ..Self::new()
        }
    }

    pub fn buffer_dir(&self) -> Option<&Path> {
        self.buffer_dir.as_deref()
    }

    /// Changes whenever the session set changes; lets the mix loops skip
    /// re-listing sessions on every cycle.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<StreamSession>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lifecycle events of every session this service creates. Can be taken
    /// once; the routing orchestrator is the intended consumer.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn create_session(&self, config: ProcessConfig) -> Result<Arc<StreamSession>, StreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(StreamSession::create(
            id,
            config,
            Arc::clone(&self.handles),
            self.buffer_dir.as_deref(),
        )?);
        session.set_event_sink(self.events_tx.clone());
        self.lock().insert(id, Arc::clone(&session));
        self.bump();
        tracing::info!(
            session_id = id,
            intent = ?config.intent,
            uid = config.client_uid,
            "session created"
        );
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> Result<Arc<StreamSession>, StreamError> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or(StreamError::SessionNotFound(id))
    }

    pub fn sessions(&self) -> Vec<Arc<StreamSession>> {
        let mut sessions: Vec<_> = self.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.id());
        sessions
    }

    pub fn running_sessions(&self) -> Vec<Arc<StreamSession>> {
        self.sessions()
            .into_iter()
            .filter(|s| s.state() == SessionState::Running)
            .collect()
    }

    /// Releases the session and forgets it.
    pub fn release_session(&self, id: SessionId) -> Result<(), StreamError> {
        let session = self.get(id)?;
        let result = session.release();
        self.lock().remove(&id);
        self.bump();
        result
    }

    /// Drops sessions that reached a terminal state; returns how many.
    pub fn reap(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.state().is_terminal());
        let reaped = before - sessions.len();
        if reaped > 0 {
            self.bump();
        }
        reaped
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    /// Peer side of ResolveBuffer: take ownership of a published buffer.
    pub fn claim_buffer(&self, handle_id: u64) -> Result<Arc<SharedRingBuffer>, StreamError> {
        self.handles.claim(handle_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StreamService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiod_core::{StreamInfo, StreamIntent, StreamUsage};

    fn config() -> ProcessConfig {
        ProcessConfig {
            intent: StreamIntent::Render(StreamUsage::Music),
            stream_info: StreamInfo::default(),
            client_uid: 1000,
            total_size_frames: 960,
            span_size_frames: 240,
        }
    }

    #[test]
    fn test_session_ids_increase() {
        let service = StreamService::new();
        let a = service.create_session(config()).unwrap();
        let b = service.create_session(config()).unwrap();
        assert!(b.id() > a.id());
        assert_eq!(service.len(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let service = StreamService::new();
        let mut bad = config();
        bad.total_size_frames = 1000;
        assert!(matches!(
            service.create_session(bad),
            Err(StreamError::InvalidParam(_))
        ));
        assert!(service.is_empty());
    }

    #[test]
    fn test_get_unknown_session() {
        let service = StreamService::new();
        assert_eq!(
            service.get(77).unwrap_err(),
            StreamError::SessionNotFound(77)
        );
    }

    #[test]
    fn test_claim_buffer_once() {
        let service = StreamService::new();
        let session = service.create_session(config()).unwrap();
        let handle = session.resolve_buffer().unwrap();
        let buffer = service.claim_buffer(handle.id).unwrap();
        assert!(Arc::ptr_eq(&buffer, session.buffer()));
        assert_eq!(
            service.claim_buffer(handle.id).unwrap_err(),
            StreamError::AlreadyTransferred(handle.id)
        );
    }

    #[tokio::test]
    async fn test_release_session_emits_event_and_forgets() {
        let service = StreamService::new();
        let mut events = service.take_events().unwrap();
        assert!(service.take_events().is_none());

        let session = service.create_session(config()).unwrap();
        service.release_session(session.id()).unwrap();
        assert!(service.is_empty());

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SessionEvent::Released {
                session_id: session.id()
            }
        );
    }

    #[test]
    fn test_reap_drops_invalid_sessions() {
        let service = StreamService::new();
        let a = service.create_session(config()).unwrap();
        let _b = service.create_session(config()).unwrap();
        a.invalidate("gone");
        assert_eq!(service.reap(), 1);
        assert_eq!(service.len(), 1);
    }

    #[test]
    fn test_generation_tracks_membership_only() {
        let service = StreamService::new();
        let g0 = service.generation();
        let a = service.create_session(config()).unwrap();
        let g1 = service.generation();
        assert_ne!(g0, g1);

        a.resolve_buffer().unwrap();
        assert_eq!(service.reap(), 0);
        assert_eq!(service.generation(), g1);

        service.release_session(a.id()).unwrap();
        assert_ne!(service.generation(), g1);
    }

    #[test]
    fn test_buffer_dir_sessions_are_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let service = StreamService::with_buffer_dir(dir.path().to_path_buf());
        let session = service.create_session(config()).unwrap();
        let path = session.buffer().path().unwrap().to_path_buf();
        assert!(path.starts_with(dir.path()));

        let peer = SharedRingBuffer::open(&path).unwrap();
        assert_eq!(peer.span_count(), 4);
        service.release_session(session.id()).unwrap();
        assert!(!path.exists());
    }
}
