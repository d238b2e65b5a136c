//! Keeps one [`HistoryStore`] per connection, opening it lazily on first use
//! so connections that never run a query never touch disk.

use std::collections::HashMap;

use log::error;
use uuid::Uuid;

use crate::history::{HistoryEntry, HistoryStore};

pub struct HistoryManager {
    stores: HashMap<Uuid, HistoryStore>,
    persistent: bool,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self { stores: HashMap::new(), persistent: true }
    }

    /// In-memory-only mode: entries are kept for the process lifetime but
    /// never written to `<data_dir>/history/`.
    pub fn in_memory() -> Self {
        Self { stores: HashMap::new(), persistent: false }
    }

    pub fn record(&mut self, connection_id: Uuid, sql: impl Into<String>) {
        self.store_for(connection_id).push(sql);
        if self.persistent {
            if let Err(e) = self.stores.get(&connection_id).unwrap().save() {
                error!("failed to persist history for {}: {:?}", connection_id, e);
            }
        }
    }

    pub fn entries(&self, connection_id: Uuid) -> &[HistoryEntry] {
        self.stores.get(&connection_id).map(|s| s.log().entries()).unwrap_or(&[])
    }

    fn store_for(&mut self, connection_id: Uuid) -> &mut HistoryStore {
        let persistent = self.persistent;
        self.stores.entry(connection_id).or_insert_with(|| {
            if persistent {
                match HistoryStore::open(connection_id) {
                    Ok(store) => store,
                    Err(e) => {
                        error!("failed to open history store for {}: {:?}", connection_id, e);
                        fallback_store(connection_id)
                    }
                }
            } else {
                fallback_store(connection_id)
            }
        })
    }
}

fn fallback_store(connection_id: Uuid) -> HistoryStore {
    HistoryStore::at_path(connection_id, std::env::temp_dir().join(format!("{}.json", connection_id)))
        .expect("temp-dir history store")
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_scoped_per_connection() {
        let mut mgr = HistoryManager::in_memory();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        mgr.record(a, "select 1");
        mgr.record(b, "select 2");
        mgr.record(b, "select 3");

        assert_eq!(mgr.entries(a).len(), 1);
        assert_eq!(mgr.entries(b).len(), 2);
    }
}
