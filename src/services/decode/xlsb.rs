//! Binary workbook (xlsb) reader
//!
//! The container is zip like xlsx, but workbook, shared strings and sheets
//! are record streams with variable-length type and size headers.

use std::io::{Read, Seek};

use zip::ZipArchive;

use super::ooxml::{read_part, relationship_target};
use crate::error::DecodeError;
use crate::types::{CellValue, DecodedTable};

const WORKBOOK_PART: &str = "xl/workbook.bin";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.bin.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.bin";
const FALLBACK_SHEET_PART: &str = "xl/worksheets/sheet1.bin";

const BRT_ROW_HDR: u16 = 0;
const BRT_CELL_BLANK: u16 = 1;
const BRT_CELL_RK: u16 = 2;
const BRT_CELL_ERROR: u16 = 3;
const BRT_CELL_BOOL: u16 = 4;
const BRT_CELL_REAL: u16 = 5;
const BRT_CELL_ST: u16 = 6;
const BRT_CELL_ISST: u16 = 7;
const BRT_FMLA_STRING: u16 = 8;
const BRT_FMLA_NUM: u16 = 9;
const BRT_FMLA_BOOL: u16 = 10;
const BRT_FMLA_ERROR: u16 = 11;
const BRT_SST_ITEM: u16 = 19;
const BRT_BUNDLE_SH: u16 = 156;

fn xlsb_err(message: impl Into<String>) -> DecodeError {
    DecodeError::Xlsb(message.into())
}

struct Record<'a> {
    kind: u16,
    data: &'a [u8],
}

/// Record stream reader; type is up to two 7-bit groups, size up to four
struct RecordIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn read(&mut self) -> Result<Option<Record<'a>>, DecodeError> {
        let Some(first) = self.byte() else {
            return Ok(None);
        };
        let mut kind = (first & 0x7F) as u16;
        if first & 0x80 != 0 {
            let second = self.byte().ok_or_else(|| xlsb_err("truncated record type"))?;
            kind |= ((second & 0x7F) as u16) << 7;
        }

        let mut len = 0usize;
        for shift in [0, 7, 14, 21] {
            let b = self.byte().ok_or_else(|| xlsb_err("truncated record size"))?;
            len |= ((b & 0x7F) as usize) << shift;
            if b & 0x80 == 0 {
                break;
            }
        }

        let data = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| xlsb_err("record runs past end of part"))?;
        self.pos += len;
        Ok(Some(Record { kind, data }))
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<Record<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

fn le_u32(data: &[u8], off: usize) -> Option<u32> {
    data.get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn le_f64(data: &[u8], off: usize) -> Option<f64> {
    let b = data.get(off..off + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Some(f64::from_le_bytes(raw))
}

/// XLWideString at `off`; returns the string and the offset after it
fn wide_string(data: &[u8], off: usize) -> Option<(String, usize)> {
    let cch = le_u32(data, off)?;
    if cch == u32::MAX {
        return Some((String::new(), off + 4));
    }
    let end = off + 4 + cch as usize * 2;
    let bytes = data.get(off + 4..end)?;
    let (text, _) = encoding_rs::UTF_16LE.decode_without_bom_handling(bytes);
    Some((text.into_owned(), end))
}

fn rk_to_f64(rk: u32) -> f64 {
    let value = if rk & 0x02 != 0 {
        ((rk as i32) >> 2) as f64
    } else {
        f64::from_bits(((rk & 0xFFFF_FFFC) as u64) << 32)
    };
    if rk & 0x01 != 0 {
        value / 100.0
    } else {
        value
    }
}

fn error_text(code: u8) -> String {
    match code {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        _ => "#ERROR",
    }
    .to_string()
}

pub fn read_workbook<R: Read + Seek>(reader: R) -> Result<DecodedTable, DecodeError> {
    let mut archive = ZipArchive::new(reader)?;

    let workbook = read_part(&mut archive, WORKBOOK_PART)?
        .ok_or_else(|| DecodeError::MissingPart(WORKBOOK_PART.to_string()))?;
    let sheet_part = match first_sheet_rel_id(&workbook)? {
        Some(rel_id) => relationship_target(&mut archive, WORKBOOK_RELS_PART, &rel_id)?,
        None => None,
    }
    .unwrap_or_else(|| FALLBACK_SHEET_PART.to_string());

    let shared = match read_part(&mut archive, SHARED_STRINGS_PART)? {
        Some(bin) => parse_shared_strings(&bin)?,
        None => Vec::new(),
    };
    let sheet = read_part(&mut archive, &sheet_part)?
        .ok_or(DecodeError::MissingPart(sheet_part))?;

    parse_sheet(&sheet, &shared)
}

fn first_sheet_rel_id(workbook: &[u8]) -> Result<Option<String>, DecodeError> {
    for record in RecordIter::new(workbook) {
        let record = record?;
        if record.kind == BRT_BUNDLE_SH {
            // hsState, iTabID, strRelID
            return Ok(wide_string(record.data, 8).map(|(rel_id, _)| rel_id));
        }
    }
    Ok(None)
}

fn parse_shared_strings(bin: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut strings = Vec::new();
    for record in RecordIter::new(bin) {
        let record = record?;
        if record.kind == BRT_SST_ITEM {
            // flags byte, then the plain text; rich runs and phonetics follow and are ignored
            let (text, _) = wide_string(record.data, 1)
                .ok_or_else(|| xlsb_err("malformed shared string"))?;
            strings.push(text);
        }
    }
    Ok(strings)
}

fn parse_sheet(bin: &[u8], shared: &[String]) -> Result<DecodedTable, DecodeError> {
    let mut cells = Vec::new();
    let mut row = 0usize;

    for record in RecordIter::new(bin) {
        let record = record?;
        let data = record.data;
        if record.kind == BRT_ROW_HDR {
            row = le_u32(data, 0).ok_or_else(|| xlsb_err("malformed row header"))? as usize;
            continue;
        }
        if !(BRT_CELL_BLANK..=BRT_FMLA_ERROR).contains(&record.kind) {
            continue;
        }
        let Some(col) = le_u32(data, 0).map(|c| c as usize) else {
            continue;
        };
        let value = match record.kind {
            BRT_CELL_RK => le_u32(data, 8).map(|rk| CellValue::Number(rk_to_f64(rk))),
            BRT_CELL_REAL | BRT_FMLA_NUM => le_f64(data, 8).map(CellValue::Number),
            BRT_CELL_BOOL | BRT_FMLA_BOOL => data.get(8).map(|&b| CellValue::Bool(b != 0)),
            BRT_CELL_ERROR | BRT_FMLA_ERROR => data.get(8).map(|&e| CellValue::Error(error_text(e))),
            BRT_CELL_ST | BRT_FMLA_STRING => wide_string(data, 8).map(|(s, _)| CellValue::Text(s)),
            BRT_CELL_ISST => le_u32(data, 8)
                .and_then(|idx| shared.get(idx as usize))
                .map(|s| CellValue::Text(s.clone())),
            _ => None,
        };
        if let Some(value) = value {
            cells.push((row, col, value));
        }
    }

    DecodedTable::from_cells(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::decode::fixtures::{self, XlsbCell};
    use std::io::Cursor;

    #[test]
    fn test_record_header_varints() {
        // type 156 needs two bytes, size 200 needs two bytes
        let mut stream = vec![0x9C, 0x01, 0xC8, 0x01];
        stream.extend(std::iter::repeat(0u8).take(200));
        let mut iter = RecordIter::new(&stream);
        let record = iter.next().unwrap().unwrap();
        assert_eq!(record.kind, 156);
        assert_eq!(record.data.len(), 200);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let stream = [0x06, 0x10, 0x00];
        let mut iter = RecordIter::new(&stream);
        assert!(iter.next().unwrap().is_err());
    }

    #[test]
    fn test_reads_first_sheet_cells() {
        let bytes = fixtures::xlsb(
            &["Case Code", "SM-S921N"],
            &[
                XlsbCell::Isst(0, 0, 0),
                XlsbCell::Isst(1, 3, 1),
                XlsbCell::Text(1, 0, "P240115-001"),
                XlsbCell::Real(1, 1, 2.5),
                XlsbCell::Rk(1, 2, (7 << 2) | 0x02),
                XlsbCell::Bool(2, 0, false),
            ],
        );

        let table = read_workbook(Cursor::new(bytes)).unwrap();
        let rows = table.rows();

        assert_eq!(rows[0].text(0).as_deref(), Some("Case Code"));
        assert_eq!(rows[1].text(0).as_deref(), Some("P240115-001"));
        assert_eq!(rows[1].cell(1), &CellValue::Number(2.5));
        assert_eq!(rows[1].cell(2), &CellValue::Number(7.0));
        assert_eq!(rows[1].text(3).as_deref(), Some("SM-S921N"));
        assert_eq!(rows[2].cell(0), &CellValue::Bool(false));
    }

    #[test]
    fn test_row_header_past_sheet_bounds_fails_the_read() {
        let bytes = fixtures::xlsb(
            &[],
            &[XlsbCell::Text(0, 0, "Case Code"), XlsbCell::Text(u32::MAX, 0, "x")],
        );
        let err = read_workbook(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::CellOutOfRange { .. }));

        let bytes = fixtures::xlsb(&[], &[XlsbCell::Real(0, 70_000, 1.0)]);
        let err = read_workbook(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::CellOutOfRange { row: 0, col: 70_000 }));
    }

    #[test]
    fn test_xlsx_container_is_not_xlsb() {
        let bytes = fixtures::xlsx("<worksheet><sheetData/></worksheet>", &[]);
        let err = read_workbook(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::MissingPart(_)));
    }
}
