//! # Spreadsheet Ingestion Worker
//!
//! Converts uploaded spreadsheet files into the compressed JSON document stored on their
//! spreadsheet record, along with the list of columns of every sheet.
//!
//! ## Features
//!
//! - **Multi-format support**: Office Open XML (`.xlsx`, `.xlsm`) and OpenDocument (`.ods`) workbooks
//! - **Header driven rows**: the first row of every sheet names the columns of the rows below it
//! - **Typed cells**: text, numbers, and booleans with their display text, formula, and hyperlink
//! - **Smart cleanup**: drops sparse rows such as notes and subtotals
//! - **Compact payloads**: gzip and base64 encoded JSON, compatible with payloads already stored
//! - **Safe state transitions**: first ingestion activates a record, later ones refresh its data,
//!   concurrent jobs for one record never interleave their writes
//!
//! ## Processing a job
//!
//! A [`worker::Worker`] receives jobs from a channel and hands each payload to the
//! [`pipeline::Pipeline`]: validate ([`job`]), decode ([`spreadsheet`]), clean up ([`cleanup`]),
//! build the column manifest ([`document`]), compress ([`codec`]), and persist ([`persistence`])
//! into a [`store::SpreadsheetStore`].
pub mod cleanup;
pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod job;
pub mod persistence;
pub mod pipeline;
pub mod spreadsheet;
pub mod store;
pub mod worker;

pub(crate) mod helpers;

pub use crate::document::ColumnManifest;
pub use crate::document::WorkbookDocument;
pub use crate::error::IngestError;
pub use crate::pipeline::Pipeline;
pub use crate::spreadsheet::decode_workbook;
