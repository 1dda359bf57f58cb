//! Fixed contracts and default tunables

/// Rows handed to the store between checkpoints
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Row errors kept in a batch report
pub const MAX_REPORTED_ROW_ERRORS: usize = 20;

pub const DEFAULT_CONVERTER_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.70;

/// Sheet bounds of the XLSX/XLSB formats; decoded cells beyond them are rejected
pub const MAX_SHEET_ROWS: usize = 1_048_576;
pub const MAX_SHEET_COLUMNS: usize = 16_384;

/// Appended to every exhausted decode
pub const DECODE_REMEDIATION_HINT: &str =
    "Open the file in Excel, use 'Save As' with the plain 'Excel Workbook (*.xlsx)' format, and upload the re-saved file.";

// =============================================================================
// VOC SHEET COLUMNS
// =============================================================================

pub const VOC_COL_CASE_CODE: usize = 0;
pub const VOC_COL_TITLE: usize = 7;
pub const VOC_COL_PROBLEM: usize = 12;
pub const VOC_COL_REPRODUCTION: usize = 13;
pub const VOC_COL_RESOLVER: usize = 14;
pub const VOC_COL_RESOLVE_OPTION: usize = 17;
pub const VOC_COL_CAUSE: usize = 20;
pub const VOC_COL_SOLUTION: usize = 21;

/// Problem/reproduction text mentioning any of these came from an external channel
pub const EXTERNAL_ISSUE_KEYWORDS: &[&str] = &["samsung members", "k zone", "rdm"];

// =============================================================================
// Q-DATA SHEET
// =============================================================================

/// Zero-based row of the Q-data header; data starts right after it
pub const QDATA_HEADER_ROW: usize = 8;

/// F, M, P, Q, T, Z, AD, AR, BE, BF
pub const QDATA_COLUMNS: &[usize] = &[5, 12, 15, 16, 19, 25, 29, 43, 50, 51];

/// Positions within the projected row
pub const QDATA_POS_SERVICE_DATE: usize = 0;
pub const QDATA_POS_PROCESS_TYPE: usize = 1;
pub const QDATA_POS_REPAIR_NAME: usize = 2;
pub const QDATA_POS_REPAIR_DETAIL: usize = 3;
pub const QDATA_POS_DETAIL_CONTENT: usize = 4;
pub const QDATA_POS_MODEL_NAME: usize = 5;
pub const QDATA_POS_SERIAL_NUMBER: usize = 6;
pub const QDATA_POS_LOG_ID: usize = 7;
pub const QDATA_POS_SW_BEFORE: usize = 8;
pub const QDATA_POS_SW_AFTER: usize = 9;

/// Rows without a service date or model name are dropped at decode time
pub const QDATA_REQUIRED: &[usize] = &[QDATA_POS_SERVICE_DATE, QDATA_POS_MODEL_NAME];

// =============================================================================
// CHIPSET NAMES
// =============================================================================

/// Vendor code that must never be normalized into another name
pub const CHIPSET_LITERAL_EXCEPTION: &str = "JDM T618";

/// Chipset names starting with this prefix are kept verbatim
pub const CHIPSET_PREFIX_EXCEPTION: &str = "SM";
