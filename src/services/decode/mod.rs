//! Spreadsheet decoding with an ordered fallback chain
//!
//! Uploaded workbooks arrive in several container formats, sometimes
//! wrapped by a rights-management layer that breaks one reader but not
//! another. `FormatDecoder` tries each `DecodeStrategy` in order, records
//! every failure and stops at the first strategy that yields data rows.
//!
//! Strategy order:
//! 1. `ooxml-stream`, `biff-stream`, `xlsb-stream` - in-memory readers
//! 2. `ooxml-tempfile`, `biff-tempfile`, `xlsb-tempfile` - same readers over a disk copy
//! 3. `soffice-convert`, `ssconvert-convert` - external office automation
//! 4. `raw-sheet-scan` - byte-level worksheet scan
//! 5. `sniffed` - dispatch on the file signature, plain text as CSV

pub mod biff;
pub mod converter;
pub mod delimited;
pub mod ooxml;
pub mod raw_xml;
pub mod tempcopy;
pub mod xlsb;

#[cfg(test)]
pub(crate) mod fixtures;

use std::io::{Cursor, Read, Seek};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{DecodeError, IngestError};
use crate::types::{DecodeAttempt, DecodedTable, RawDocument};

pub use converter::{ConverterSettings, ConverterStrategy};
pub use tempcopy::TempCopyStrategy;

/// One way of turning workbook bytes into a raw cell grid
#[async_trait]
pub trait DecodeStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Raw grid, sheet row `i` at index `i`; layout is applied by the caller
    async fn decode(&self, bytes: &[u8], filename: &str) -> Result<DecodedTable, DecodeError>;
}

// =============================================================================
// READER ENGINES
// =============================================================================

/// Container readers shared by the stream and temp-copy strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Ooxml,
    Biff,
    Xlsb,
}

impl Engine {
    pub fn read<R: Read + Seek>(&self, reader: R) -> Result<DecodedTable, DecodeError> {
        match self {
            Engine::Ooxml => ooxml::read_workbook(reader),
            Engine::Biff => biff::read_workbook(reader),
            Engine::Xlsb => xlsb::read_workbook(reader),
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Engine::Ooxml => ".xlsx",
            Engine::Biff => ".xls",
            Engine::Xlsb => ".xlsb",
        }
    }
}

/// Reads straight from the uploaded buffer
pub struct StreamStrategy {
    name: &'static str,
    engine: Engine,
}

impl StreamStrategy {
    pub fn new(name: &'static str, engine: Engine) -> Self {
        Self { name, engine }
    }
}

#[async_trait]
impl DecodeStrategy for StreamStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn decode(&self, bytes: &[u8], _filename: &str) -> Result<DecodedTable, DecodeError> {
        self.engine.read(Cursor::new(bytes))
    }
}

pub struct RawScanStrategy;

#[async_trait]
impl DecodeStrategy for RawScanStrategy {
    fn name(&self) -> &str {
        "raw-sheet-scan"
    }

    async fn decode(&self, bytes: &[u8], _filename: &str) -> Result<DecodedTable, DecodeError> {
        raw_xml::scan_workbook(Cursor::new(bytes))
    }
}

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// No declared engine: pick one from the leading bytes
pub struct SniffedStrategy;

#[async_trait]
impl DecodeStrategy for SniffedStrategy {
    fn name(&self) -> &str {
        "sniffed"
    }

    async fn decode(&self, bytes: &[u8], _filename: &str) -> Result<DecodedTable, DecodeError> {
        if bytes.starts_with(ZIP_SIGNATURE) {
            ooxml::read_workbook(Cursor::new(bytes))
                .or_else(|_| xlsb::read_workbook(Cursor::new(bytes)))
                .or_else(|_| raw_xml::scan_workbook(Cursor::new(bytes)))
        } else if bytes.starts_with(&biff::CFB_SIGNATURE) {
            biff::read_workbook(Cursor::new(bytes))
        } else {
            delimited::read_delimited(bytes)
        }
    }
}

// =============================================================================
// FORMAT DECODER
// =============================================================================

/// Successful decode plus the failures that preceded it
#[derive(Debug)]
pub struct DecodeOutcome {
    /// Laid-out data rows
    pub table: DecodedTable,
    pub strategy: String,
    pub attempts: Vec<DecodeAttempt>,
    /// SHA-256 of the uploaded bytes
    pub fingerprint: String,
}

pub struct FormatDecoder {
    strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl FormatDecoder {
    pub fn new(strategies: Vec<Box<dyn DecodeStrategy>>) -> Self {
        Self { strategies }
    }

    /// The full production chain
    pub fn standard(settings: &ConverterSettings) -> Self {
        Self::new(vec![
            Box::new(StreamStrategy::new("ooxml-stream", Engine::Ooxml)),
            Box::new(StreamStrategy::new("biff-stream", Engine::Biff)),
            Box::new(StreamStrategy::new("xlsb-stream", Engine::Xlsb)),
            Box::new(TempCopyStrategy::new("ooxml-tempfile", Engine::Ooxml)),
            Box::new(TempCopyStrategy::new("biff-tempfile", Engine::Biff)),
            Box::new(TempCopyStrategy::new("xlsb-tempfile", Engine::Xlsb)),
            Box::new(ConverterStrategy::soffice(settings)),
            Box::new(ConverterStrategy::ssconvert(settings)),
            Box::new(RawScanStrategy),
            Box::new(SniffedStrategy),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try every strategy in order until one yields at least one data row
    pub async fn decode(&self, document: &RawDocument) -> Result<DecodeOutcome, IngestError> {
        let bytes = document
            .read_bytes()
            .await
            .map_err(|e| IngestError::DecodeExhausted {
                strategy: "read-source".to_string(),
                cause: e.to_string(),
            })?;
        let fingerprint = fingerprint(&bytes);
        let layout = document.kind.layout();
        let mut attempts: Vec<DecodeAttempt> = Vec::new();

        for strategy in &self.strategies {
            let name = strategy.name();
            let result = strategy
                .decode(&bytes, &document.filename)
                .await
                .and_then(|raw| {
                    let table = raw.apply_layout(&layout);
                    if table.is_empty() {
                        Err(DecodeError::EmptyTable)
                    } else {
                        Ok(table)
                    }
                });

            match result {
                Ok(table) => {
                    info!(
                        filename = %document.filename,
                        strategy = name,
                        rows = table.len(),
                        failed_attempts = attempts.len(),
                        "Spreadsheet decoded"
                    );
                    return Ok(DecodeOutcome {
                        table,
                        strategy: name.to_string(),
                        attempts,
                        fingerprint,
                    });
                }
                Err(e) => {
                    debug!(filename = %document.filename, strategy = name, error = %e, "Decode strategy failed");
                    attempts.push(DecodeAttempt {
                        strategy: name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let (strategy, cause) = attempts
            .pop()
            .map(|a| (a.strategy, a.error))
            .unwrap_or_else(|| ("none".to_string(), "no decode strategies configured".to_string()));
        warn!(filename = %document.filename, strategy = %strategy, cause = %cause, "All decode strategies failed");
        Err(IngestError::DecodeExhausted { strategy, cause })
    }
}

pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellValue, DocumentKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // ==========================================================================
    // Scripted strategies
    // ==========================================================================

    struct Scripted {
        name: &'static str,
        rows: Option<Vec<&'static str>>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn failing(name: &'static str) -> (Box<dyn DecodeStrategy>, Arc<AtomicUsize>) {
            Self::boxed(name, None)
        }

        fn returning(name: &'static str, rows: Vec<&'static str>) -> (Box<dyn DecodeStrategy>, Arc<AtomicUsize>) {
            Self::boxed(name, Some(rows))
        }

        fn boxed(name: &'static str, rows: Option<Vec<&'static str>>) -> (Box<dyn DecodeStrategy>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (Box::new(Scripted { name, rows, calls: calls.clone() }), calls)
        }
    }

    #[async_trait]
    impl DecodeStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn decode(&self, _bytes: &[u8], _filename: &str) -> Result<DecodedTable, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.rows {
                Some(rows) => DecodedTable::from_cells(
                    rows.iter()
                        .enumerate()
                        .map(|(i, v)| (i, 0, CellValue::Text(v.to_string()))),
                ),
                None => Err(DecodeError::UnsupportedSignature),
            }
        }
    }

    fn document() -> RawDocument {
        RawDocument::from_bytes("report_20240320.xlsx", DocumentKind::General, b"bytes".to_vec())
    }

    #[tokio::test]
    async fn test_first_non_empty_result_short_circuits() {
        let (s1, c1) = Scripted::failing("one");
        let (s2, c2) = Scripted::failing("two");
        let (s3, c3) = Scripted::returning("three", vec!["header", "P240115-001"]);
        let (s4, c4) = Scripted::returning("four", vec!["header", "other"]);
        let (s5, c5) = Scripted::failing("five");
        let decoder = FormatDecoder::new(vec![s1, s2, s3, s4, s5]);

        let outcome = decoder.decode(&document()).await.unwrap();

        assert_eq!(outcome.strategy, "three");
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.rows()[0].text(0).as_deref(), Some("P240115-001"));
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].strategy, "one");
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
        assert_eq!(c3.load(Ordering::SeqCst), 1);
        assert_eq!(c4.load(Ordering::SeqCst), 0);
        assert_eq!(c5.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_header_only_table_counts_as_failure() {
        let (s1, _) = Scripted::returning("header-only", vec!["header"]);
        let (s2, _) = Scripted::returning("with-data", vec!["header", "row"]);
        let decoder = FormatDecoder::new(vec![s1, s2]);

        let outcome = decoder.decode(&document()).await.unwrap();

        assert_eq!(outcome.strategy, "with-data");
        assert_eq!(outcome.attempts[0].error, DecodeError::EmptyTable.to_string());
    }

    #[tokio::test]
    async fn test_exhausted_carries_last_failure() {
        let (s1, _) = Scripted::failing("first");
        let (s2, _) = Scripted::failing("last");
        let decoder = FormatDecoder::new(vec![s1, s2]);

        let err = decoder.decode(&document()).await.unwrap_err();

        match err {
            IngestError::DecodeExhausted { strategy, cause } => {
                assert_eq!(strategy, "last");
                assert_eq!(cause, DecodeError::UnsupportedSignature.to_string());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_unreadable_path_is_exhausted() {
        let decoder = FormatDecoder::new(vec![]);
        let doc = RawDocument::from_path("/nonexistent/voc.xlsx", DocumentKind::General);
        let err = decoder.decode(&doc).await.unwrap_err();
        assert!(matches!(err, IngestError::DecodeExhausted { ref strategy, .. } if strategy == "read-source"));
    }

    #[test]
    fn test_standard_chain_order() {
        let settings = ConverterSettings {
            soffice_bin: "soffice".to_string(),
            ssconvert_bin: "ssconvert".to_string(),
            timeout_secs: 1,
        };
        assert_eq!(
            FormatDecoder::standard(&settings).strategy_names(),
            vec![
                "ooxml-stream",
                "biff-stream",
                "xlsb-stream",
                "ooxml-tempfile",
                "biff-tempfile",
                "xlsb-tempfile",
                "soffice-convert",
                "ssconvert-convert",
                "raw-sheet-scan",
                "sniffed",
            ]
        );
    }

    // ==========================================================================
    // Real containers through the standard chain
    // ==========================================================================

    fn offline_decoder() -> FormatDecoder {
        FormatDecoder::standard(&ConverterSettings {
            soffice_bin: "/nonexistent/soffice".to_string(),
            ssconvert_bin: "/nonexistent/ssconvert".to_string(),
            timeout_secs: 1,
        })
    }

    #[tokio::test]
    async fn test_xlsx_wins_on_first_strategy() {
        let bytes = fixtures::xlsx_rows(&[&["Case Code"], &["P240115-001"]]);
        let doc = RawDocument::from_bytes("voc.xlsx", DocumentKind::General, bytes);

        let outcome = offline_decoder().decode(&doc).await.unwrap();

        assert_eq!(outcome.strategy, "ooxml-stream");
        assert!(outcome.attempts.is_empty());
        assert_eq!(outcome.fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn test_xls_falls_through_to_biff() {
        let stream = fixtures::biff_workbook(&["Case Code", "P240115-001"], &[
            fixtures::BiffCell::Sst(0, 0, 0),
            fixtures::BiffCell::Sst(1, 0, 1),
        ]);
        let doc = RawDocument::from_bytes("voc.xls", DocumentKind::General, fixtures::compound_file("Workbook", &stream));

        let outcome = offline_decoder().decode(&doc).await.unwrap();

        assert_eq!(outcome.strategy, "biff-stream");
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_csv_renamed_as_xlsx_reaches_sniffed() {
        let doc = RawDocument::from_bytes(
            "voc.xlsx",
            DocumentKind::General,
            b"case,title\nP240115-001,Galaxy Watch5 issue\n".to_vec(),
        );

        let outcome = offline_decoder().decode(&doc).await.unwrap();

        assert_eq!(outcome.strategy, "sniffed");
        assert_eq!(outcome.attempts.len(), 9);
        assert_eq!(outcome.table.rows()[0].text(1).as_deref(), Some("Galaxy Watch5 issue"));
    }

    #[tokio::test]
    async fn test_cell_reference_past_sheet_bounds_is_exhausted() {
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>Case Code</t></is></c></row>
            <row r="2"><c r="A99999999999999999" t="inlineStr"><is><t>P240115-001</t></is></c></row>
        </sheetData></worksheet>"#;
        let doc = RawDocument::from_bytes("voc.xlsx", DocumentKind::General, fixtures::xlsx(sheet, &[]));

        let err = offline_decoder().decode(&doc).await.unwrap_err();

        assert!(matches!(
            err,
            IngestError::DecodeExhausted { ref cause, .. } if cause.contains("outside the sheet bounds")
        ));
    }

    #[tokio::test]
    async fn test_rights_managed_file_is_exhausted() {
        let bytes = fixtures::compound_file("EncryptedPackage", &[0u8; 4096]);
        let doc = RawDocument::from_bytes("voc.xlsx", DocumentKind::General, bytes);

        let err = offline_decoder().decode(&doc).await.unwrap_err();

        assert!(matches!(err, IngestError::DecodeExhausted { ref strategy, .. } if strategy == "sniffed"));
        assert!(err.to_string().contains(crate::defaults::DECODE_REMEDIATION_HINT));
    }
}
