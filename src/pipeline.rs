//! The ingestion of one job: decode, cleanup, manifest, compress, persist.
use crate::cleanup::smart_cleanup;
use crate::codec::compress;
use crate::document::ColumnManifest;
use crate::error::IngestError;
use crate::job::SpreadsheetJob;
use crate::persistence::PersistenceCoordinator;
use crate::spreadsheet::decode_workbook;
use crate::store::SpreadsheetStore;
use crate::store::Transition;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct Pipeline {
    persistence: PersistenceCoordinator,
}

impl Pipeline {
    pub fn new(store: Arc<dyn SpreadsheetStore>) -> Self {
        Self {
            persistence: PersistenceCoordinator::new(store),
        }
    }

    /// Validates a raw job payload and runs it.
    pub fn process(&self, data: &Value) -> Result<Transition, IngestError> {
        let job = SpreadsheetJob::from_value(data)?;
        self.run(&job)
    }

    /// Runs a validated job and returns the transition applied to its record.
    pub fn run(&self, job: &SpreadsheetJob) -> Result<Transition, IngestError> {
        let document = decode_workbook(&job.bytes)?;
        let document = smart_cleanup(document, job.smart_cleanup);
        let manifest = ColumnManifest::from_document(&document);
        let payload = compress(&document)?;
        debug!(
            spreadsheet_id = %job.spreadsheet_id,
            file_name = %job.file_name,
            sheets = manifest.len(),
            rows = document.sheets.iter().map(|sheet| sheet.rows.len()).sum::<usize>(),
            payload_len = payload.len(),
            "processed workbook"
        );
        self.persistence.persist(&job.spreadsheet_id, &payload, &manifest)
    }
}
