//! Writes a processed workbook back to its spreadsheet record.
use crate::codec::CodecError;
use crate::document::ColumnManifest;
use crate::error::IngestError;
use crate::store::RecordUpdate;
use crate::store::SpreadsheetStore;
use crate::store::Transition;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use tracing::info;

/// Per record id mutual exclusion for the read-then-write of a job.
#[derive(Debug, Default)]
pub struct RecordLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock of `id`.
    pub fn with_lock<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_owned())
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one held here: nobody else waits on this id.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }

    /// Number of ids currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies the activate or refresh transition to a spreadsheet record.
pub struct PersistenceCoordinator {
    store: Arc<dyn SpreadsheetStore>,
    locks: RecordLocks,
}

impl PersistenceCoordinator {
    pub fn new(store: Arc<dyn SpreadsheetStore>) -> Self {
        Self {
            store,
            locks: RecordLocks::new(),
        }
    }

    /// Stores `payload` and `manifest` on record `id`.
    ///
    /// A `processing` record is activated: its state becomes `active` and every column is
    /// allowed. Any other record only gets its payload and column list replaced.
    ///
    /// # Returns
    ///
    /// The transition that was applied, or [`IngestError::NotFound`] when no record has this id.
    pub fn persist(&self, id: &str, payload: &str, manifest: &ColumnManifest) -> Result<Transition, IngestError> {
        let all_columns = manifest.to_json().map_err(CodecError::Serialize)?;
        self.locks.with_lock(id, || -> Result<Transition, IngestError> {
            let Some(state) = self.store.find_state(id)? else {
                return Err(IngestError::NotFound { id: id.to_owned() });
            };

            let transition = Transition::from_state(&state);
            let update = RecordUpdate {
                data: payload.to_owned(),
                all_columns,
                transition,
            };
            if !self.store.apply(id, &state, &update)? {
                return Err(IngestError::NotFound { id: id.to_owned() });
            }

            info!(spreadsheet_id = %id, previous_state = %state, transition = transition.as_str(), "persisted spreadsheet");
            Ok(transition)
        })
    }
}
