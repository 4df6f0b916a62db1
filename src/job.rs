//! Job payload validation.
//!
//! A job carries the spreadsheet id, a few descriptive fields, and the uploaded file bytes.
//! The bytes arrive in one of three encodings, resolved once into a plain byte buffer.
use base64::alphabet;
use base64::engine::DecodePaddingMode;
use base64::engine::GeneralPurpose;
use base64::engine::GeneralPurposeConfig;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Standard alphabet, padding optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{0}")]
    Payload(#[from] serde_json::Error),

    #[error("Buffer byte at index {index} is out of range: {value}")]
    ByteOutOfRange { index: usize, value: i64 },

    #[error("Buffer data mixes numbers and strings")]
    MixedBufferData,

    #[error("Unsupported buffer type '{0}'")]
    BufferType(String),

    #[error("Invalid base64 buffer: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Job payload as received from the queue.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub spreadsheet_id: String,
    pub user_id: String,
    pub file_name: String,
    pub size_in_bytes: f64,
    #[serde(default = "default_smart_cleanup")]
    pub smart_cleanup: bool,
    pub buffer: BufferInput,
}

fn default_smart_cleanup() -> bool {
    true
}

/// The accepted encodings of the uploaded file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BufferInput {
    /// `"UEsDBBQ..."`
    Base64(String),
    /// `[80, 75, 3, 4, ...]`
    Bytes(Vec<i64>),
    /// `{"type": "Buffer", "data": [80, 75, ...]}` or `{"type": "Buffer", "data": ["UEsD", "BBQ..."]}`
    Structured {
        #[serde(rename = "type")]
        kind: String,
        data: Vec<BufferFragment>,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BufferFragment {
    Byte(i64),
    Text(String),
}

impl BufferInput {
    /// Resolves the encoding into the file bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>, ValidationError> {
        match self {
            BufferInput::Base64(text) => decode_base64(&text),
            BufferInput::Bytes(values) => to_bytes(&values),
            BufferInput::Structured { kind, data } => {
                if kind != "Buffer" {
                    return Err(ValidationError::BufferType(kind));
                }
                if matches!(data.first(), Some(BufferFragment::Text(_))) {
                    let mut text = String::new();
                    for fragment in data {
                        match fragment {
                            BufferFragment::Text(part) => text.push_str(&part),
                            BufferFragment::Byte(_) => return Err(ValidationError::MixedBufferData),
                        }
                    }
                    decode_base64(&text)
                } else {
                    let values = data
                        .into_iter()
                        .map(|fragment| match fragment {
                            BufferFragment::Byte(value) => Ok(value),
                            BufferFragment::Text(_) => Err(ValidationError::MixedBufferData),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    to_bytes(&values)
                }
            }
        }
    }
}

fn to_bytes(values: &[i64]) -> Result<Vec<u8>, ValidationError> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            u8::try_from(*value).map_err(|_| ValidationError::ByteOutOfRange { index, value: *value })
        })
        .collect()
}

fn decode_base64(text: &str) -> Result<Vec<u8>, ValidationError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(LENIENT_BASE64.decode(compact)?)
}

/// A validated job, ready for the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct SpreadsheetJob {
    pub spreadsheet_id: String,
    pub user_id: String,
    pub file_name: String,
    pub size_in_bytes: f64,
    pub smart_cleanup: bool,
    pub bytes: Vec<u8>,
}

impl SpreadsheetJob {
    /// Validates a raw job payload.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        JobPayload::deserialize(value)?.try_into()
    }
}

impl TryFrom<JobPayload> for SpreadsheetJob {
    type Error = ValidationError;

    fn try_from(payload: JobPayload) -> Result<Self, Self::Error> {
        let bytes = payload.buffer.into_bytes()?;
        if payload.size_in_bytes != bytes.len() as f64 {
            warn!(
                spreadsheet_id = %payload.spreadsheet_id,
                declared = payload.size_in_bytes,
                actual = bytes.len(),
                "declared size does not match buffer length"
            );
        }
        Ok(SpreadsheetJob {
            spreadsheet_id: payload.spreadsheet_id,
            user_id: payload.user_id,
            file_name: payload.file_name,
            size_in_bytes: payload.size_in_bytes,
            smart_cleanup: payload.smart_cleanup,
            bytes,
        })
    }
}
