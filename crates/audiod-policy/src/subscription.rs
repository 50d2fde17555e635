use audiod_core::{SessionId, SessionNotification};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Receiving half handed to whoever registered a session.
pub struct Subscription {
    session_id: SessionId,
    rx: mpsc::UnboundedReceiver<SessionNotification>,
}

impl Subscription {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next notification, or `None` once the session is torn down and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<SessionNotification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionNotification> {
        self.rx.try_recv().ok()
    }
}

/// Per-session notification channels, keyed by session id.
#[derive(Default)]
pub struct SubscriptionRegistry {
    senders: Mutex<HashMap<SessionId, mpsc::UnboundedSender<SessionNotification>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a channel for `session_id`, replacing any previous one.
    pub fn subscribe(&self, session_id: SessionId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id, tx);
        Subscription { session_id, rx }
    }

    /// Queues `notification`. Returns false if nobody is listening; a closed
    /// channel is dropped on the way.
    pub fn notify(&self, session_id: SessionId, notification: SessionNotification) -> bool {
        let mut senders = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(tx) = senders.get(&session_id) else {
            return false;
        };
        if tx.send(notification).is_err() {
            senders.remove(&session_id);
            return false;
        }
        true
    }

    pub fn remove(&self, session_id: SessionId) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&session_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
