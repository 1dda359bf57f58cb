//! Decoded spreadsheet types
//!
//! A `RawDocument` is what the caller hands in: bytes or a path, the original
//! filename and the declared document kind. Decoders turn it into a
//! `DecodedTable`, a positional grid with no header semantics at all.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults::{
    MAX_SHEET_COLUMNS, MAX_SHEET_ROWS, QDATA_COLUMNS, QDATA_HEADER_ROW, QDATA_REQUIRED,
};
use crate::error::DecodeError;

// =============================================================================
// RAW DOCUMENT
// =============================================================================

/// Declared layout of an uploaded sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// VOC export and the small mapping sheets: header on the first row
    General,
    /// Fixed-layout service log ("Q-data")
    QData,
}

impl DocumentKind {
    pub fn layout(&self) -> SheetLayout {
        match self {
            DocumentKind::General => SheetLayout {
                header_row: 0,
                columns: None,
                required: &[],
            },
            DocumentKind::QData => SheetLayout {
                header_row: QDATA_HEADER_ROW,
                columns: Some(QDATA_COLUMNS),
                required: QDATA_REQUIRED,
            },
        }
    }
}

/// Where the document bytes live
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// One uploaded spreadsheet, discarded once decoded
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub filename: String,
    pub kind: DocumentKind,
    pub source: DocumentSource,
}

impl RawDocument {
    pub fn from_bytes(filename: impl Into<String>, kind: DocumentKind, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            kind,
            source: DocumentSource::Bytes(bytes),
        }
    }

    pub fn from_path(path: impl AsRef<Path>, kind: DocumentKind) -> Self {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            filename,
            kind,
            source: DocumentSource::Path(path.to_path_buf()),
        }
    }

    /// Read the full document content
    pub async fn read_bytes(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match &self.source {
            DocumentSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            DocumentSource::Path(path) => tokio::fs::read(path).await.map(Cow::Owned),
        }
    }
}

// =============================================================================
// CELLS AND TABLES
// =============================================================================

/// A single decoded cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Error(String),
}

impl CellValue {
    /// Text form of the cell; empty, blank and error cells have none
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty | CellValue::Error(_) => None,
            CellValue::Text(s) if s.trim().is_empty() => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Number(n) => Some(format_number(*n)),
            CellValue::Bool(true) => Some("True".to_string()),
            CellValue::Bool(false) => Some("False".to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_text().is_none()
    }
}

/// Integral values print without a fractional part
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// One row, addressed by column position only
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRow {
    cells: Vec<CellValue>,
}

impl DecodedRow {
    pub fn new(cells: Vec<CellValue>) -> Self {
        Self { cells }
    }

    pub fn cell(&self, pos: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cells.get(pos).unwrap_or(&EMPTY)
    }

    /// Text at `pos`, or `None` when the cell is missing or blank
    pub fn text(&self, pos: usize) -> Option<String> {
        self.cell(pos).as_text()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(CellValue::is_empty)
    }
}

impl From<Vec<CellValue>> for DecodedRow {
    fn from(cells: Vec<CellValue>) -> Self {
        Self::new(cells)
    }
}

/// Ordered rows of a decoded sheet.
///
/// Strategies return the raw grid where row `i` is sheet row `i`; the
/// decoder then applies the document's `SheetLayout`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedTable {
    rows: Vec<DecodedRow>,
}

impl DecodedTable {
    pub fn new(rows: Vec<DecodedRow>) -> Self {
        Self { rows }
    }

    /// Build a grid from sparse `(row, col, value)` triples.
    ///
    /// Positions come straight from file content, so anything past the
    /// sheet bounds fails before the grid grows.
    pub fn from_cells(
        cells: impl IntoIterator<Item = (usize, usize, CellValue)>,
    ) -> Result<Self, DecodeError> {
        let mut grid: Vec<Vec<CellValue>> = Vec::new();
        for (row, col, value) in cells {
            if row >= MAX_SHEET_ROWS || col >= MAX_SHEET_COLUMNS {
                return Err(DecodeError::CellOutOfRange { row, col });
            }
            if grid.len() <= row {
                grid.resize_with(row + 1, Vec::new);
            }
            let cells = &mut grid[row];
            if cells.len() <= col {
                cells.resize(col + 1, CellValue::Empty);
            }
            cells[col] = value;
        }
        Ok(Self::new(grid.into_iter().map(DecodedRow::new).collect()))
    }

    pub fn rows(&self) -> &[DecodedRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<DecodedRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop the header rows, project the declared columns, then drop blank
    /// rows and rows missing a required cell
    pub fn apply_layout(self, layout: &SheetLayout) -> DecodedTable {
        let rows = self
            .rows
            .into_iter()
            .skip(layout.header_row + 1)
            .map(|row| match layout.columns {
                Some(columns) => {
                    DecodedRow::new(columns.iter().map(|&pos| row.cell(pos).clone()).collect())
                }
                None => row,
            })
            .filter(|row| !row.is_blank())
            .filter(|row| layout.required.iter().all(|&pos| !row.cell(pos).is_empty()))
            .collect();
        DecodedTable::new(rows)
    }
}

/// Positional contract of a document kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    /// Zero-based sheet row holding the (ignored) header
    pub header_row: usize,
    /// Column positions to keep, in output order
    pub columns: Option<&'static [usize]>,
    /// Output positions that must hold a value
    pub required: &'static [usize],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_cell_text_skips_blank_and_errors() {
        assert_eq!(CellValue::Empty.as_text(), None);
        assert_eq!(text("   ").as_text(), None);
        assert_eq!(CellValue::Error("#N/A".into()).as_text(), None);
        assert_eq!(text(" x ").as_text(), Some(" x ".to_string()));
    }

    #[test]
    fn test_integral_numbers_print_without_fraction() {
        assert_eq!(CellValue::Number(260209.0).as_text(), Some("260209".to_string()));
        assert_eq!(CellValue::Number(1.5).as_text(), Some("1.5".to_string()));
    }

    #[test]
    fn test_from_cells_fills_gaps() {
        let table = DecodedTable::from_cells(vec![(0, 0, text("a")), (2, 3, text("b"))]).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.rows()[1].is_blank());
        assert_eq!(table.rows()[2].text(3), Some("b".to_string()));
        assert_eq!(table.rows()[2].cell(99), &CellValue::Empty);
    }

    #[test]
    fn test_general_layout_drops_header_and_blank_rows() {
        let table = DecodedTable::from_cells(vec![
            (0, 0, text("header")),
            (1, 0, text("P240115-001")),
            (3, 0, text("P240116-002")),
        ])
        .unwrap();
        let laid_out = table.apply_layout(&DocumentKind::General.layout());
        assert_eq!(laid_out.len(), 2);
        assert_eq!(laid_out.rows()[0].text(0), Some("P240115-001".to_string()));
    }

    #[test]
    fn test_qdata_layout_projects_fixed_columns() {
        let mut cells = vec![(QDATA_HEADER_ROW, 5, text("Date"))];
        for (i, &col) in QDATA_COLUMNS.iter().enumerate() {
            cells.push((QDATA_HEADER_ROW + 1, col, text(&format!("v{}", i))));
        }
        let laid_out = DecodedTable::from_cells(cells).unwrap().apply_layout(&DocumentKind::QData.layout());
        assert_eq!(laid_out.len(), 1);
        let row = &laid_out.rows()[0];
        assert_eq!(row.len(), QDATA_COLUMNS.len());
        assert_eq!(row.text(0), Some("v0".to_string()));
        assert_eq!(row.text(9), Some("v9".to_string()));
    }

    #[test]
    fn test_qdata_layout_drops_rows_missing_date_or_model() {
        let data_row = QDATA_HEADER_ROW + 1;
        let cells = vec![
            (data_row, QDATA_COLUMNS[0], text("240115")),
            (data_row, QDATA_COLUMNS[5], text("SM-S921N")),
            (data_row + 1, QDATA_COLUMNS[0], text("240116")),
            (data_row + 2, QDATA_COLUMNS[5], text("SM-S921N")),
        ];
        let laid_out = DecodedTable::from_cells(cells).unwrap().apply_layout(&DocumentKind::QData.layout());
        assert_eq!(laid_out.len(), 1);
        assert_eq!(laid_out.rows()[0].text(0), Some("240115".to_string()));
    }

    #[test]
    fn test_from_cells_rejects_positions_past_sheet_bounds() {
        let err = DecodedTable::from_cells(vec![(0, 0, text("a")), (99_999_999_999, 0, text("b"))])
            .unwrap_err();
        assert!(matches!(err, DecodeError::CellOutOfRange { row: 99_999_999_999, col: 0 }));

        let err = DecodedTable::from_cells(vec![(0, MAX_SHEET_COLUMNS, text("a"))]).unwrap_err();
        assert!(matches!(err, DecodeError::CellOutOfRange { .. }));

        let last = DecodedTable::from_cells(vec![(2, MAX_SHEET_COLUMNS - 1, text("z"))]).unwrap();
        assert_eq!(last.rows()[2].text(MAX_SHEET_COLUMNS - 1), Some("z".to_string()));
    }

    #[tokio::test]
    async fn test_document_from_path_keeps_file_name() {
        let doc = RawDocument::from_path("/uploads/Report_20240320.XLSX", DocumentKind::General);
        assert_eq!(doc.filename, "Report_20240320.XLSX");
        assert!(doc.read_bytes().await.is_err());
    }

    #[tokio::test]
    async fn test_document_from_path_reads_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voc_20240320.csv");
        tokio::fs::write(&path, b"case\nP240115-001\n").await.unwrap();

        let doc = RawDocument::from_path(&path, DocumentKind::General);
        let bytes = doc.read_bytes().await.unwrap();
        assert_eq!(&bytes[..], b"case\nP240115-001\n");
    }
}
