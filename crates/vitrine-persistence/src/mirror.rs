//! In-process mirror of one resource kind
//!
//! Entries carry the store revision they were read at and are only replaced by
//! newer revisions, so a late watch delivery never overwrites a fresher local
//! write.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use vitrine_consistency::Revision;

pub struct Mirror<T> {
    entries: Arc<RwLock<HashMap<String, (Revision, T)>>>,
}

impl<T> Clone for Mirror<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: Clone> Mirror<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.entries.read().get(id).map(|(_, v)| v.clone())
    }

    /// Insert unless an entry at a newer revision is already present
    pub fn upsert(&self, id: &str, revision: Revision, value: T) -> bool {
        let mut entries = self.entries.write();
        match entries.get(id) {
            Some((current, _)) if *current > revision => false,
            _ => {
                entries.insert(id.to_string(), (revision, value));
                true
            }
        }
    }

    pub fn remove(&self, id: &str) {
        self.entries.write().remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Mirror<T> {
    fn default() -> Self {
        Self::new()
    }
}
