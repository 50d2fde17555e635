use crate::subscription::{Subscription, SubscriptionRegistry};
use audiod_core::{
    DeviceChange, DeviceChangeKind, DeviceDescriptor, DeviceRole, PolicyError, SessionEvent,
    SessionId, SessionNotification, StreamIntent, StreamUsage,
};
use audiod_device::RouterCenter;
use audiod_stream::{SessionState, StreamSession};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Where a session was routed and which device-set generation that answer
/// was computed against.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub device: DeviceDescriptor,
    pub generation: u64,
}

struct Entry {
    session: Arc<StreamSession>,
    intent: StreamIntent,
    uid: i32,
    decision: Arc<RoutingDecision>,
}

/// Keeps every registered session bound to the device its router chain
/// currently picks, and tells the session's owner when that changes.
pub struct Orchestrator {
    router: Arc<RouterCenter>,
    entries: Mutex<HashMap<SessionId, Entry>>,
    subscriptions: SubscriptionRegistry,
    active_output: Mutex<DeviceDescriptor>,
}

impl Orchestrator {
    pub fn new(router: Arc<RouterCenter>) -> Self {
        Self {
            router,
            entries: Mutex::new(HashMap::new()),
            subscriptions: SubscriptionRegistry::new(),
            active_output: Mutex::new(DeviceDescriptor::none()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn router(&self) -> &Arc<RouterCenter> {
        &self.router
    }

    fn note_active_output(&self, intent: StreamIntent, device: &DeviceDescriptor) {
        if intent.role() == DeviceRole::Output && !device.is_none() {
            *self
                .active_output
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = device.clone();
        }
    }

    /// Routes `session`, binds it to the answer and starts tracking it.
    ///
    /// A sentinel answer is not an error: the session stays unbound until a
    /// device change gives it somewhere to go.
    pub fn register_session(
        &self,
        session: Arc<StreamSession>,
    ) -> Result<(RoutingDecision, Subscription), PolicyError> {
        let id = session.id();
        let intent = session.intent();
        let uid = session.config().client_uid;

        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(PolicyError::AlreadyRegistered(id));
        }

        let generation = self.router.devices().generation();
        let device = self.router.route(intent, uid);
        session.bind_device(device.clone())?;
        self.note_active_output(intent, &device);

        let decision = RoutingDecision { device, generation };
        tracing::info!(
            session_id = id,
            intent = ?intent,
            device_type = ?decision.device.device_type,
            generation,
            "session routed"
        );
        let subscription = self.subscriptions.subscribe(id);
        entries.insert(
            id,
            Entry {
                session,
                intent,
                uid,
                decision: Arc::new(decision.clone()),
            },
        );
        Ok((decision, subscription))
    }

    /// Stops tracking a session. Its subscription channel closes.
    pub fn unregister_session(&self, id: SessionId) -> Result<(), PolicyError> {
        self.lock()
            .remove(&id)
            .ok_or(PolicyError::SessionNotRegistered(id))?;
        self.subscriptions.remove(id);
        tracing::debug!(session_id = id, "session unregistered");
        Ok(())
    }

    pub fn decision(&self, id: SessionId) -> Option<RoutingDecision> {
        self.lock().get(&id).map(|e| (*e.decision).clone())
    }

    pub fn registered(&self) -> usize {
        self.lock().len()
    }

    /// The output device most recently handed to a render session.
    pub fn active_output_device(&self) -> DeviceDescriptor {
        self.active_output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-routes every session whose role the change touched. Returns how
    /// many sessions moved.
    pub fn handle_device_change(&self, change: &DeviceChange) -> usize {
        let mut moved = 0;
        let mut dead = Vec::new();
        let mut entries = self.lock();

        for (id, entry) in entries.iter_mut() {
            if !change.touches_role(entry.intent.role()) {
                continue;
            }
            let current = self.router.route(entry.intent, entry.uid);
            let previous = &entry.decision.device;
            if current.same_endpoint(previous) && current.device_role == previous.device_role {
                continue;
            }

            if let Err(e) = entry.session.bind_device(current.clone()) {
                tracing::warn!(session_id = *id, "rebind failed: {e}");
                let reason = match entry.session.state() {
                    SessionState::Released => "released".to_string(),
                    SessionState::Invalid => "invalidated".to_string(),
                    _ => format!("rebind failed: {e}"),
                };
                dead.push((*id, reason));
                continue;
            }
            self.note_active_output(entry.intent, &current);

            tracing::info!(
                session_id = *id,
                from = ?previous.device_type,
                to = ?current.device_type,
                generation = change.generation,
                "session rerouted"
            );
            let notification = SessionNotification::DeviceChanged {
                session_id: *id,
                previous: previous.clone(),
                current: current.clone(),
            };
            entry.decision = Arc::new(RoutingDecision {
                device: current,
                generation: change.generation,
            });
            self.subscriptions.notify(*id, notification);
            moved += 1;
        }

        // The session's own Released/Invalidated event will find no entry,
        // so the owner hears about it here.
        for (id, reason) in dead {
            entries.remove(&id);
            tracing::info!(session_id = id, %reason, "session torn down");
            self.subscriptions
                .notify(id, SessionNotification::Teardown { session_id: id, reason });
            self.subscriptions.remove(id);
        }
        drop(entries);

        if change.kind == DeviceChangeKind::Disconnected
            && self.active_output_device().same_endpoint(&change.device)
        {
            let fallback = self.router.fetch_output_device(StreamUsage::Music, 0);
            *self
                .active_output
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = fallback;
        }
        moved
    }

    /// Forgets a session that was released or invalidated and tells its
    /// owner.
    pub fn handle_session_event(&self, event: &SessionEvent) {
        let id = event.session_id();
        if self.lock().remove(&id).is_none() {
            return;
        }
        let reason = match event {
            SessionEvent::Invalidated { reason, .. } => reason.clone(),
            SessionEvent::Released { .. } => "released".to_string(),
        };
        tracing::info!(session_id = id, %reason, "session torn down");
        self.subscriptions
            .notify(id, SessionNotification::Teardown { session_id: id, reason });
        self.subscriptions.remove(id);
    }

    /// Consumes device changes and session events in arrival order until both
    /// channels close.
    pub fn spawn_event_loop(
        self: Arc<Self>,
        mut device_rx: mpsc::UnboundedReceiver<DeviceChange>,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut devices_open = true;
            let mut sessions_open = true;
            while devices_open || sessions_open {
                tokio::select! {
                    change = device_rx.recv(), if devices_open => match change {
                        Some(change) => {
                            self.handle_device_change(&change);
                        }
                        None => {
                            tracing::debug!("device change channel closed");
                            devices_open = false;
                        }
                    },
                    event = session_rx.recv(), if sessions_open => match event {
                        Some(event) => self.handle_session_event(&event),
                        None => {
                            tracing::debug!("session event channel closed");
                            sessions_open = false;
                        }
                    },
                }
            }
        })
    }
}
