use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use dentaflow_core::ClinicId;

/// Clinic-isolated key/value store abstraction for disposable read models.
///
/// Every read goes through a `ClinicId`; there is no way to list records
/// across clinics.
pub trait ClinicStore<K, V>: Send + Sync {
    fn get(&self, clinic_id: ClinicId, key: &K) -> Option<V>;
    fn upsert(&self, clinic_id: ClinicId, key: K, value: V);
    fn list(&self, clinic_id: ClinicId) -> Vec<V>;
    /// Clear all read-model records for a clinic (rebuild support).
    fn clear_clinic(&self, clinic_id: ClinicId);
}

impl<K, V, S> ClinicStore<K, V> for Arc<S>
where
    S: ClinicStore<K, V> + ?Sized,
{
    fn get(&self, clinic_id: ClinicId, key: &K) -> Option<V> {
        (**self).get(clinic_id, key)
    }

    fn upsert(&self, clinic_id: ClinicId, key: K, value: V) {
        (**self).upsert(clinic_id, key, value)
    }

    fn list(&self, clinic_id: ClinicId) -> Vec<V> {
        (**self).list(clinic_id)
    }

    fn clear_clinic(&self, clinic_id: ClinicId) {
        (**self).clear_clinic(clinic_id)
    }
}

/// In-memory clinic-isolated store.
#[derive(Debug)]
pub struct InMemoryClinicStore<K, V> {
    inner: RwLock<HashMap<ClinicId, HashMap<K, V>>>,
}

impl<K, V> InMemoryClinicStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryClinicStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ClinicStore<K, V> for InMemoryClinicStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, clinic_id: ClinicId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&clinic_id)?.get(key).cloned()
    }

    fn upsert(&self, clinic_id: ClinicId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.entry(clinic_id).or_default().insert(key, value);
        }
    }

    fn list(&self, clinic_id: ClinicId) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };

        map.get(&clinic_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn clear_clinic(&self, clinic_id: ClinicId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&clinic_id);
        }
    }
}
