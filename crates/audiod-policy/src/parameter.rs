use audiod_core::{AudioParamKey, ParameterChange, PolicyError, LOCAL_NETWORK_ID};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Default)]
struct Parameters {
    local: BTreeMap<String, String>,
    remote: HashMap<(String, AudioParamKey, String), String>,
    listeners: Vec<mpsc::UnboundedSender<ParameterChange>>,
}

impl Parameters {
    fn broadcast(&mut self, change: ParameterChange) {
        self.listeners.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// Free-form key/value parameters plus the networked variant keyed by
/// `(network id, key, condition)`. Every change is pushed to listeners.
#[derive(Default)]
pub struct ParameterStore {
    inner: Mutex<Parameters>,
}

impl ParameterStore {
    pub fn new(initial: BTreeMap<String, String>) -> Self {
        Self {
            inner: Mutex::new(Parameters {
                local: initial,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Parameters> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ParameterChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().listeners.push(tx);
        rx
    }

    /// Unknown keys read as the empty string.
    pub fn get(&self, key: &str) -> String {
        self.lock().local.get(key).cloned().unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), PolicyError> {
        if key.is_empty() {
            return Err(PolicyError::InvalidParam("empty parameter key".to_string()));
        }
        let mut params = self.lock();
        params.local.insert(key.to_string(), value.to_string());
        tracing::debug!(key, value, "parameter set");
        params.broadcast(ParameterChange {
            network_id: None,
            key: key.to_string(),
            condition: String::new(),
            value: value.to_string(),
        });
        Ok(())
    }

    pub fn get_remote(&self, network_id: &str, key: AudioParamKey, condition: &str) -> String {
        self.lock()
            .remote
            .get(&(network_id.to_string(), key, condition.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_remote(
        &self,
        network_id: &str,
        key: AudioParamKey,
        condition: &str,
        value: &str,
    ) -> Result<(), PolicyError> {
        if network_id.is_empty() || network_id == LOCAL_NETWORK_ID {
            return Err(PolicyError::InvalidParam(format!(
                "'{network_id}' is not a remote network id"
            )));
        }
        if key == AudioParamKey::None {
            return Err(PolicyError::InvalidParam("parameter key none".to_string()));
        }
        let mut params = self.lock();
        params.remote.insert(
            (network_id.to_string(), key, condition.to_string()),
            value.to_string(),
        );
        tracing::debug!(network_id, key = key.name(), condition, "remote parameter set");
        params.broadcast(ParameterChange {
            network_id: Some(network_id.to_string()),
            key: key.name().to_string(),
            condition: condition.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Applies reloaded `[parameters]` entries, notifying listeners of each.
    pub fn apply(&self, changes: &[(String, String)]) {
        for (key, value) in changes {
            if let Err(e) = self.set(key, value) {
                tracing::warn!("parameter reload skipped: {e}");
            }
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().local.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_and_missing_keys() {
        let mut initial = BTreeMap::new();
        initial.insert("audio.spatial".to_string(), "on".to_string());
        let store = ParameterStore::new(initial);
        assert_eq!(store.get("audio.spatial"), "on");
        assert_eq!(store.get("nope"), "");
    }

    #[test]
    fn test_set_notifies_listeners() {
        let store = ParameterStore::default();
        let mut rx = store.subscribe();
        store.set("low_power", "1").unwrap();
        assert_eq!(store.get("low_power"), "1");
        let change = rx.try_recv().unwrap();
        assert_eq!(change.network_id, None);
        assert_eq!(change.key, "low_power");
        assert_eq!(change.value, "1");
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = ParameterStore::default();
        assert!(matches!(
            store.set("", "x"),
            Err(PolicyError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_remote_parameters_keyed_by_condition() {
        let store = ParameterStore::default();
        let mut rx = store.subscribe();
        store
            .set_remote("net-1", AudioParamKey::Volume, "EVENT_TYPE=1;", "9")
            .unwrap();
        assert_eq!(store.get_remote("net-1", AudioParamKey::Volume, "EVENT_TYPE=1;"), "9");
        assert_eq!(store.get_remote("net-1", AudioParamKey::Volume, "EVENT_TYPE=2;"), "");
        assert_eq!(store.get_remote("net-2", AudioParamKey::Volume, "EVENT_TYPE=1;"), "");

        let change = rx.try_recv().unwrap();
        assert_eq!(change.network_id.as_deref(), Some("net-1"));
        assert_eq!(change.key, "volume");
    }

    #[test]
    fn test_remote_set_needs_remote_id() {
        let store = ParameterStore::default();
        assert!(store
            .set_remote(LOCAL_NETWORK_ID, AudioParamKey::Volume, "", "1")
            .is_err());
        assert!(store
            .set_remote("net-1", AudioParamKey::None, "", "1")
            .is_err());
    }

    #[test]
    fn test_closed_listener_pruned() {
        let store = ParameterStore::default();
        let rx = store.subscribe();
        drop(rx);
        store.set("k", "v").unwrap();
        assert!(store.lock().listeners.is_empty());
    }
}
