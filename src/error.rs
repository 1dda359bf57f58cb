//! Error taxonomy for decoding and ingestion

use thiserror::Error;

use crate::defaults::DECODE_REMEDIATION_HINT;

/// Failure of a single decode strategy
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip container error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("compound file error: {0}")]
    Cfb(String),

    #[error("BIFF record error: {0}")]
    Biff(String),

    #[error("XLSB record error: {0}")]
    Xlsb(String),

    #[error("delimited text error: {0}")]
    Delimited(#[from] csv::Error),

    #[error("workbook is encrypted or rights-protected")]
    Encrypted,

    #[error("missing workbook part: {0}")]
    MissingPart(String),

    #[error("decoded table is empty")]
    EmptyTable,

    #[error("cell at row {row}, column {col} is outside the sheet bounds")]
    CellOutOfRange { row: usize, col: usize },

    #[error("{program} failed: {message}")]
    Converter { program: String, message: String },

    #[error("{program} timed out after {secs}s")]
    ConverterTimeout { program: String, secs: u64 },

    #[error("unsupported file signature")]
    UnsupportedSignature,
}

impl From<quick_xml::Error> for DecodeError {
    fn from(e: quick_xml::Error) -> Self {
        DecodeError::Xml(e.to_string())
    }
}

/// Fatal failure for a single document
#[derive(Debug, Error)]
pub enum IngestError {
    /// Every decode strategy failed; carries the last one
    #[error("could not read the spreadsheet (last attempt '{strategy}': {cause}). {hint}", hint = DECODE_REMEDIATION_HINT)]
    DecodeExhausted { strategy: String, cause: String },

    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),
}

/// Per-row failure; counted, never fatal
#[derive(Debug, Error)]
pub enum RowError {
    #[error("row {row}: {message}")]
    MalformedRow { row: usize, message: String },
}

impl RowError {
    pub fn malformed(row: usize, message: impl std::fmt::Display) -> Self {
        RowError::MalformedRow {
            row,
            message: message.to_string(),
        }
    }
}
