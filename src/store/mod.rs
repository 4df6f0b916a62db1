//! # Spreadsheet Record Store
//!
//! The seam between the ingestion pipeline and the table of spreadsheet records.
//! The pipeline only reads a record's state and writes its payload columns,
//! it never creates or deletes records.
pub mod sqlite;

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Mutex;
use std::sync::PoisonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The record state changed between the read and the write of a job
    #[error("Spreadsheet '{id}' changed concurrently, expected state '{expected}'")]
    Conflict { id: String, expected: RecordState },
}

/// Lifecycle state of a spreadsheet record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordState {
    /// No state stored
    Unset,
    /// Created by the upload, waiting for its first ingestion
    Processing,
    Active,
    Other(String),
}

impl RecordState {
    /// Maps the stored column value to a state.
    pub fn from_column(value: Option<&str>) -> Self {
        match value {
            None => RecordState::Unset,
            Some("processing") => RecordState::Processing,
            Some("active") => RecordState::Active,
            Some(other) => RecordState::Other(other.to_owned()),
        }
    }

    /// Column value of the state, `None` when unset.
    pub fn as_column(&self) -> Option<&str> {
        match self {
            RecordState::Unset => None,
            RecordState::Processing => Some("processing"),
            RecordState::Active => Some("active"),
            RecordState::Other(other) => Some(other),
        }
    }
}

impl Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_column().unwrap_or("unset"))
    }
}

/// How a successful ingestion changes the record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// First ingestion of a `processing` record: it becomes `active` and every column is allowed
    Activate,
    /// Re-ingestion of any other record: payload and column list only
    Refresh,
}

impl Transition {
    /// The transition taken from the observed state.
    pub fn from_state(state: &RecordState) -> Self {
        match state {
            RecordState::Processing => Transition::Activate,
            _ => Transition::Refresh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Activate => "activate",
            Transition::Refresh => "refresh",
        }
    }
}

/// Columns written by one ingestion.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordUpdate {
    /// Compressed workbook payload
    pub data: String,
    /// Column manifest as JSON text
    pub all_columns: String,
    pub transition: Transition,
}

/// Persistent table of spreadsheet records.
///
/// Implementations are shared by concurrent jobs.
pub trait SpreadsheetStore: Send + Sync {
    /// Reads the state of a record, `None` when no record has this id.
    fn find_state(&self, id: &str) -> Result<Option<RecordState>, StoreError>;

    /// Applies an update if the record still has the `expected` state.
    ///
    /// Returns `Ok(false)` when the record no longer exists and
    /// [`StoreError::Conflict`] when its state changed.
    fn apply(&self, id: &str, expected: &RecordState, update: &RecordUpdate) -> Result<bool, StoreError>;
}

/// A record as kept by [`MemoryStore`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredRecord {
    pub state: Option<String>,
    pub data: Option<String>,
    pub all_columns: Option<String>,
    pub allowed_columns: Option<String>,
}

/// In-process store for tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a record with the given state and no payload.
    pub fn insert(&self, id: &str, state: RecordState) {
        let record = StoredRecord {
            state: state.as_column().map(str::to_owned),
            ..StoredRecord::default()
        };
        self.lock().insert(id.to_owned(), record);
    }

    /// Replaces the stored state of a record, as another writer would.
    pub fn set_state(&self, id: &str, state: RecordState) {
        if let Some(record) = self.lock().get_mut(id) {
            record.state = state.as_column().map(str::to_owned);
        }
    }

    /// Replaces the column selection of a record, as the user would.
    pub fn set_allowed_columns(&self, id: &str, allowed_columns: Option<&str>) {
        if let Some(record) = self.lock().get_mut(id) {
            record.allowed_columns = allowed_columns.map(str::to_owned);
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredRecord> {
        self.lock().get(id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredRecord>> {
        // Records stay consistent across a panicking writer, every update is a single assignment.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SpreadsheetStore for MemoryStore {
    fn find_state(&self, id: &str) -> Result<Option<RecordState>, StoreError> {
        Ok(self.lock().get(id).map(|record| RecordState::from_column(record.state.as_deref())))
    }

    fn apply(&self, id: &str, expected: &RecordState, update: &RecordUpdate) -> Result<bool, StoreError> {
        let mut records = self.lock();
        let Some(record) = records.get_mut(id) else {
            return Ok(false);
        };
        if record.state.as_deref() != expected.as_column() {
            return Err(StoreError::Conflict {
                id: id.to_owned(),
                expected: expected.clone(),
            });
        }

        record.data = Some(update.data.to_owned());
        record.all_columns = Some(update.all_columns.to_owned());
        if update.transition == Transition::Activate {
            record.state = RecordState::Active.as_column().map(str::to_owned);
            record.allowed_columns = Some(update.all_columns.to_owned());
        }
        Ok(true)
    }
}
