use thiserror::Error;

/// Top level error of a spreadsheet ingestion job.
/// Every variant aborts the current job and is reported upward as its failure message.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid job payload: {0}")]
    Validation(#[from] crate::job::ValidationError),

    #[error("Decode spreadsheet failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Codec(#[from] crate::codec::CodecError),

    #[error("Spreadsheet '{id}' not found")]
    NotFound { id: String },

    #[error("{0}")]
    Store(#[from] crate::store::StoreError),
}

/// Error raised while decoding workbook bytes.
/// Aggregates errors from the standard library, the archive and XML readers, and the spreadsheet module.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("{0}")]
    WithContextError(String),

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    // Helper module errors
    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    OdsError(#[from] crate::spreadsheet::OdsError),
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, DecodeError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| DecodeError::WithContextError(format!("{}: {}", message, e)))
    }
}
