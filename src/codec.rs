//! Compressed payload codec.
//!
//! A document is stored as base64 (standard alphabet) of the gzip of its JSON envelope
//! `{"json": [...]}`, the layout payloads already written to the store use.
use crate::document::WorkbookDocument;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use serde::Serialize;
use std::io::Read;
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialize document failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Deserialize document failed: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("Compress document failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("Decompress document failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("Decode base64 payload failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    json: &'a WorkbookDocument,
}

#[derive(Deserialize)]
struct Envelope {
    json: WorkbookDocument,
}

/// Serializes, gzips, and base64 encodes a document.
pub fn compress(document: &WorkbookDocument) -> Result<String, CodecError> {
    let json = serde_json::to_vec(&EnvelopeRef { json: document }).map_err(CodecError::Serialize)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json).map_err(CodecError::Compress)?;
    let gzip = encoder.finish().map_err(CodecError::Compress)?;
    Ok(STANDARD.encode(gzip))
}

/// Reverses [`compress`].
pub fn decompress(payload: &str) -> Result<WorkbookDocument, CodecError> {
    let gzip = STANDARD.decode(payload.trim())?;
    let mut json = Vec::new();
    GzDecoder::new(gzip.as_slice())
        .read_to_end(&mut json)
        .map_err(CodecError::Decompress)?;
    let envelope: Envelope = serde_json::from_slice(&json).map_err(CodecError::Deserialize)?;
    Ok(envelope.json)
}
