//! SQLite backed [`SpreadsheetStore`].
use super::RecordState;
use super::RecordUpdate;
use super::SpreadsheetStore;
use super::StoreError;
use super::StoredRecord;
use super::Transition;
use chrono::Utc;
use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

const ACTIVATE_SQL: &str = "UPDATE spreadsheets \
    SET data = ?3, all_columns = ?4, allowed_columns = ?4, state = 'active', updated_at = ?5 \
    WHERE id = ?1 AND state IS ?2";

const REFRESH_SQL: &str = "UPDATE spreadsheets \
    SET data = ?3, all_columns = ?4, updated_at = ?5 \
    WHERE id = ?1 AND state IS ?2";

/// Store over the `spreadsheets` table, created when absent.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(include_str!("../../migrations/0001_spreadsheets.sql"))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Registers an uploaded spreadsheet, the way the upload service creates records.
    pub fn insert(
        &self,
        id: &str,
        user_id: &str,
        file_name: &str,
        size_in_bytes: u64,
        state: &RecordState,
    ) -> Result<(), StoreError> {
        self.lock().execute(
            "INSERT INTO spreadsheets (id, user_id, file_name, friendly_name, size_in_bytes, state) \
             VALUES (?1, ?2, ?3, ?3, ?4, ?5)",
            params![id, user_id, file_name, size_in_bytes as i64, state.as_column()],
        )?;
        Ok(())
    }

    /// Reads the columns written by ingestion.
    pub fn get(&self, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        let record = self
            .lock()
            .query_row(
                "SELECT state, data, all_columns, allowed_columns FROM spreadsheets WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StoredRecord {
                        state: row.get(0)?,
                        data: row.get(1)?,
                        all_columns: row.get(2)?,
                        allowed_columns: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SpreadsheetStore for SqliteStore {
    fn find_state(&self, id: &str) -> Result<Option<RecordState>, StoreError> {
        let state = self
            .lock()
            .query_row("SELECT state FROM spreadsheets WHERE id = ?1", params![id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(state.map(|state| RecordState::from_column(state.as_deref())))
    }

    fn apply(&self, id: &str, expected: &RecordState, update: &RecordUpdate) -> Result<bool, StoreError> {
        let conn = self.lock();
        let sql = match update.transition {
            Transition::Activate => ACTIVATE_SQL,
            Transition::Refresh => REFRESH_SQL,
        };
        let changes = conn.execute(sql, params![
            id,
            expected.as_column(),
            update.data,
            update.all_columns,
            Utc::now().to_rfc3339(),
        ])?;
        if changes > 0 {
            return Ok(true);
        }

        let exists = conn
            .query_row("SELECT 1 FROM spreadsheets WHERE id = ?1", params![id], |row| row.get::<_, i64>(0))
            .optional()?
            .is_some();
        if exists {
            Err(StoreError::Conflict {
                id: id.to_owned(),
                expected: expected.clone(),
            })
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(transition: Transition) -> RecordUpdate {
        RecordUpdate {
            data: "H4sIAAAA".to_owned(),
            all_columns: r#"{"Sheet1":["A","B"]}"#.to_owned(),
            transition,
        }
    }

    #[test]
    fn activate_processing_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert("s1", "u1", "book.xlsx", 1024, &RecordState::Processing).unwrap();
        assert_eq!(store.find_state("s1").unwrap(), Some(RecordState::Processing));

        assert!(store.apply("s1", &RecordState::Processing, &update(Transition::Activate)).unwrap());
        let record = store.get("s1").unwrap().unwrap();
        assert_eq!(record.state.as_deref(), Some("active"));
        assert_eq!(record.data.as_deref(), Some("H4sIAAAA"));
        assert_eq!(record.allowed_columns.as_deref(), Some(r#"{"Sheet1":["A","B"]}"#));
    }

    #[test]
    fn refresh_record_without_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert("s1", "u1", "book.xlsx", 1024, &RecordState::Unset).unwrap();
        assert_eq!(store.find_state("s1").unwrap(), Some(RecordState::Unset));

        assert!(store.apply("s1", &RecordState::Unset, &update(Transition::Refresh)).unwrap());
        let record = store.get("s1").unwrap().unwrap();
        assert_eq!(record.state, None);
        assert_eq!(record.allowed_columns, None);
        assert_eq!(record.all_columns.as_deref(), Some(r#"{"Sheet1":["A","B"]}"#));
    }

    #[test]
    fn refresh_active_record_keeps_column_selection() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert("s1", "u1", "book.xlsx", 1024, &RecordState::Active).unwrap();
        let selection = r#"{"Sheet1":["B"]}"#;
        store.lock().execute(
            "UPDATE spreadsheets SET all_columns = ?1, allowed_columns = ?2 WHERE id = ?3",
            params![r#"{"Sheet1":["B"]}"#, selection, "s1"],
        ).unwrap();

        assert!(store.apply("s1", &RecordState::Active, &update(Transition::Refresh)).unwrap());
        let record = store.get("s1").unwrap().unwrap();
        assert_eq!(record.state.as_deref(), Some("active"));
        assert_eq!(record.all_columns.as_deref(), Some(r#"{"Sheet1":["A","B"]}"#));
        assert_eq!(record.allowed_columns.as_deref(), Some(selection));
    }

    #[test]
    fn stale_state_is_a_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert("s1", "u1", "book.xlsx", 1024, &RecordState::Active).unwrap();
        let result = store.apply("s1", &RecordState::Processing, &update(Transition::Activate));
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert_eq!(store.get("s1").unwrap().unwrap().data, None);
    }

    #[test]
    fn missing_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.find_state("missing").unwrap(), None);
        assert!(!store.apply("missing", &RecordState::Unset, &update(Transition::Refresh)).unwrap());
    }

    #[test]
    fn reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spreadsheets.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert("s1", "u1", "book.ods", 10, &RecordState::Processing).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.find_state("s1").unwrap(), Some(RecordState::Processing));
    }
}
