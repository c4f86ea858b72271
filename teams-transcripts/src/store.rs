use crate::error::{TeamsError, TeamsResult};
use crate::trigger::Registration;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Subscription IDs owned by one trigger registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionState {
    pub subscription_ids: Vec<String>,
}

/// Per-registration key-value store for subscription state.
pub trait StateStore: Send + Sync {
    fn load(&self, key: &str) -> TeamsResult<Option<SubscriptionState>>;
    fn save(&self, key: &str, state: &SubscriptionState) -> TeamsResult<()>;
    fn clear(&self, key: &str) -> TeamsResult<()>;
}

fn lock_error<T>(_: T) -> TeamsError {
    TeamsError::Store("state lock poisoned".into())
}

/// In-process store, for hosts without a data directory and for tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, SubscriptionState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &str) -> TeamsResult<Option<SubscriptionState>> {
        Ok(self.states.lock().map_err(lock_error)?.get(key).cloned())
    }

    fn save(&self, key: &str, state: &SubscriptionState) -> TeamsResult<()> {
        self.states
            .lock()
            .map_err(lock_error)?
            .insert(key.to_string(), state.clone());
        Ok(())
    }

    fn clear(&self, key: &str) -> TeamsResult<()> {
        self.states.lock().map_err(lock_error)?.remove(key);
        Ok(())
    }
}

/// Store backed by `subscriptions.json` in the extension's data directory.
/// Every mutation rewrites the file so state survives restarts.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    states: Mutex<HashMap<String, SubscriptionState>>,
}

impl FileStateStore {
    pub fn open(data_dir: PathBuf) -> TeamsResult<Self> {
        let path = data_dir.join("subscriptions.json");
        let states = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| TeamsError::Store(format!("failed to read subscriptions.json: {e}")))?;
            serde_json::from_str(&content).map_err(|e| {
                TeamsError::Store(format!("failed to parse subscriptions.json: {e}"))
            })?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            states: Mutex::new(states),
        })
    }

    fn persist(&self, states: &HashMap<String, SubscriptionState>) -> TeamsResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| TeamsError::Store(format!("failed to create data dir: {e}")))?;
        }
        let content = serde_json::to_string_pretty(states)
            .map_err(|e| TeamsError::Store(format!("failed to serialize subscriptions: {e}")))?;
        std::fs::write(&self.path, content)
            .map_err(|e| TeamsError::Store(format!("failed to write subscriptions.json: {e}")))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &str) -> TeamsResult<Option<SubscriptionState>> {
        Ok(self.states.lock().map_err(lock_error)?.get(key).cloned())
    }

    fn save(&self, key: &str, state: &SubscriptionState) -> TeamsResult<()> {
        let mut states = self.states.lock().map_err(lock_error)?;
        states.insert(key.to_string(), state.clone());
        self.persist(&states)
    }

    fn clear(&self, key: &str) -> TeamsResult<()> {
        let mut states = self.states.lock().map_err(lock_error)?;
        if states.remove(key).is_some() {
            self.persist(&states)?;
        }
        Ok(())
    }
}

/// Trigger registrations, persisted in `triggers.json`.
pub struct TriggerStore {
    pub registrations: HashMap<String, Registration>,
    data_dir: PathBuf,
}

impl TriggerStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            registrations: HashMap::new(),
            data_dir,
        }
    }

    pub fn load(&mut self) -> Result<(), String> {
        let path = self.data_dir.join("triggers.json");
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read triggers.json: {e}"))?;
            let items: Vec<Registration> = serde_json::from_str(&content)
                .map_err(|e| format!("failed to parse triggers.json: {e}"))?;
            for reg in items {
                self.registrations.insert(reg.id.clone(), reg);
            }
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), String> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| format!("failed to create data dir: {e}"))?;
        let path = self.data_dir.join("triggers.json");
        let items = self.list();
        let content = serde_json::to_string_pretty(&items)
            .map_err(|e| format!("failed to serialize triggers: {e}"))?;
        std::fs::write(&path, content).map_err(|e| format!("failed to write triggers.json: {e}"))
    }

    pub fn list(&self) -> Vec<&Registration> {
        let mut items: Vec<&Registration> = self.registrations.values().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    pub fn get(&self, id: &str) -> Option<&Registration> {
        self.registrations.get(id)
    }

    pub fn upsert(&mut self, reg: Registration) {
        self.registrations.insert(reg.id.clone(), reg);
    }

    pub fn set_status(&mut self, id: &str, status: &str) {
        if let Some(reg) = self.registrations.get_mut(id) {
            reg.status = status.to_string();
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.registrations.remove(id).is_some()
    }

    pub fn record_notification(&mut self, id: &str) {
        if let Some(reg) = self.registrations.get_mut(id) {
            reg.notification_count += 1;
            reg.last_notified_at = Some(Utc::now().to_rfc3339());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerConfig;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("teams-store-{}", uuid::Uuid::new_v4()))
    }

    fn state(ids: &[&str]) -> SubscriptionState {
        SubscriptionState {
            subscription_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn memory_store_round_trip_and_clear() {
        let store = MemoryStateStore::new();
        assert_eq!(store.load("trg_1").unwrap(), None);
        store.save("trg_1", &state(&["a", "b"])).unwrap();
        assert_eq!(store.load("trg_1").unwrap(), Some(state(&["a", "b"])));
        store.clear("trg_1").unwrap();
        assert_eq!(store.load("trg_1").unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = scratch_dir();
        {
            let store = FileStateStore::open(dir.clone()).unwrap();
            store.save("trg_1", &state(&["s1"])).unwrap();
            store.save("trg_2", &state(&["s2", "s3"])).unwrap();
            store.clear("trg_1").unwrap();
        }

        let reopened = FileStateStore::open(dir.clone()).unwrap();
        assert_eq!(reopened.load("trg_1").unwrap(), None);
        assert_eq!(reopened.load("trg_2").unwrap(), Some(state(&["s2", "s3"])));

        let raw = std::fs::read_to_string(dir.join("subscriptions.json")).unwrap();
        assert!(raw.contains("subscriptionIds"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn trigger_store_persists_registrations() {
        let dir = scratch_dir();
        let reg = Registration::new(
            "All transcripts".into(),
            TriggerConfig::default(),
            "https://hooks.example.com",
        );
        let id = reg.id.clone();

        let mut store = TriggerStore::new(dir.clone());
        store.upsert(reg);
        store.record_notification(&id);
        store.save().unwrap();

        let mut reloaded = TriggerStore::new(dir.clone());
        reloaded.load().unwrap();
        let loaded = reloaded.get(&id).unwrap();
        assert_eq!(loaded.notification_count, 1);
        assert!(loaded.last_notified_at.is_some());
        assert!(reloaded.remove(&id));
        let _ = std::fs::remove_dir_all(dir);
    }
}
