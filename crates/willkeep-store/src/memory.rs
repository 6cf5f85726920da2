//! In-memory backend.

use crate::{DeliveryRecord, StoreError, WillStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use willkeep_core::Will;

#[derive(Default)]
struct MemoryState {
    wills: HashMap<String, Will>,
    deliveries: Vec<DeliveryRecord>,
}

/// Process-local store. Clones and sessions share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored wills
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.wills.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl WillStore for MemoryStore {
    fn get_will(&self, id: &str) -> Result<Will, StoreError> {
        self.lock()?
            .wills
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn set_will(&self, will: &Will) -> Result<(), StoreError> {
        self.lock()?.wills.insert(will.id.clone(), will.clone());
        Ok(())
    }

    fn update_will(
        &self,
        id: &str,
        update: &mut dyn FnMut(&mut Will) -> bool,
    ) -> Result<Option<Will>, StoreError> {
        let mut state = self.lock()?;
        let stored = state
            .wills
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut will = stored.clone();
        if !update(&mut will) {
            return Ok(None);
        }
        *stored = will.clone();
        Ok(Some(will))
    }

    fn remove_will(&self, id: &str) -> Result<(), StoreError> {
        self.lock()?
            .wills
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn get_wills_by_owner(&self, owner_name: &str) -> Result<Vec<Will>, StoreError> {
        let mut wills: Vec<Will> = self
            .lock()?
            .wills
            .values()
            .filter(|w| w.owner.name == owner_name)
            .cloned()
            .collect();
        wills.sort_by_key(|w| w.creation);
        Ok(wills)
    }

    fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<Will>, StoreError> {
        let mut due: Vec<Will> = self
            .lock()?
            .wills
            .values()
            .filter(|w| w.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|w| w.time_to_delivery);
        Ok(due)
    }

    fn remove_exhausted(&self) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let purged: HashSet<String> = state
            .wills
            .values()
            .filter(|w| w.exhausted)
            .map(|w| w.id.clone())
            .collect();
        state.wills.retain(|id, _| !purged.contains(id));
        state.deliveries.retain(|r| !purged.contains(&r.will_id));
        Ok(purged.len())
    }

    fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        self.lock()?.deliveries.push(record.clone());
        Ok(())
    }

    fn delivery_log(&self, will_id: &str) -> Result<Vec<DeliveryRecord>, StoreError> {
        Ok(self
            .lock()?
            .deliveries
            .iter()
            .filter(|r| r.will_id == will_id)
            .cloned()
            .collect())
    }

    fn checkout(&self) -> Result<Box<dyn WillStore>, StoreError> {
        Ok(Box::new(self.clone()))
    }
}
