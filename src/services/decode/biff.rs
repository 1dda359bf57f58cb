//! Legacy Excel (xls) reader
//!
//! Two layers: the OLE compound file container (FAT, mini-FAT, directory)
//! and the BIFF8 record stream stored in its `Workbook` entry. Only the
//! first worksheet is read.

use std::io::{Read, Seek};

use crate::error::DecodeError;
use crate::types::{CellValue, DecodedTable};

pub const CFB_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

// =============================================================================
// COMPOUND FILE
// =============================================================================

const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
const FREE_SECTOR: u32 = 0xFFFF_FFFF;
const HEADER_DIFAT_ENTRIES: usize = 109;
const DIR_ENTRY_SIZE: usize = 128;

fn le_u16(data: &[u8], off: usize) -> Option<u16> {
    data.get(off..off + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
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

fn cfb_err(message: &str) -> DecodeError {
    DecodeError::Cfb(message.to_string())
}

#[derive(Debug)]
struct DirEntry {
    name: String,
    kind: u8,
    start: u32,
    size: u64,
}

/// Read-only view over an OLE2 compound file
pub struct CompoundFile<'a> {
    data: &'a [u8],
    sector_size: usize,
    mini_sector_size: usize,
    mini_cutoff: u64,
    fat: Vec<u32>,
    mini_fat: Vec<u32>,
    entries: Vec<DirEntry>,
}

impl<'a> CompoundFile<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < 512 || data[..8] != CFB_SIGNATURE {
            return Err(cfb_err("missing compound file signature"));
        }
        let sector_shift = le_u16(data, 0x1E).ok_or_else(|| cfb_err("truncated header"))?;
        let mini_shift = le_u16(data, 0x20).ok_or_else(|| cfb_err("truncated header"))?;
        if !(7..=16).contains(&sector_shift) || mini_shift >= sector_shift {
            return Err(cfb_err("invalid sector size"));
        }
        let header = |off| le_u32(data, off).ok_or_else(|| cfb_err("truncated header"));
        let fat_sectors = header(0x2C)? as usize;
        let first_dir = header(0x30)?;
        let mini_cutoff = header(0x38)? as u64;
        let first_mini_fat = header(0x3C)?;
        let mut difat_sector = header(0x44)?;

        let mut cfb = CompoundFile {
            data,
            sector_size: 1usize << sector_shift,
            mini_sector_size: 1usize << mini_shift,
            mini_cutoff,
            fat: Vec::new(),
            mini_fat: Vec::new(),
            entries: Vec::new(),
        };

        let mut fat_ids: Vec<u32> = (0..HEADER_DIFAT_ENTRIES.min(fat_sectors))
            .filter_map(|i| le_u32(data, 0x4C + i * 4))
            .collect();
        let per_difat = cfb.sector_size / 4 - 1;
        let mut guard = 0;
        while fat_ids.len() < fat_sectors && difat_sector < END_OF_CHAIN {
            let sector = cfb.sector(difat_sector)?;
            for i in 0..per_difat {
                if fat_ids.len() >= fat_sectors {
                    break;
                }
                fat_ids.push(le_u32(sector, i * 4).ok_or_else(|| cfb_err("truncated DIFAT"))?);
            }
            difat_sector = le_u32(sector, per_difat * 4).unwrap_or(END_OF_CHAIN);
            guard += 1;
            if guard > data.len() / cfb.sector_size {
                return Err(cfb_err("DIFAT chain loops"));
            }
        }

        let mut fat = Vec::with_capacity(fat_ids.len() * cfb.sector_size / 4);
        for id in fat_ids {
            let sector = cfb.sector(id)?;
            fat.extend(sector.chunks_exact(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])));
        }
        cfb.fat = fat;

        if first_mini_fat < END_OF_CHAIN {
            let raw = cfb.read_chain(first_mini_fat, None)?;
            cfb.mini_fat = raw
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
        }

        let dir = cfb.read_chain(first_dir, None)?;
        cfb.entries = dir
            .chunks_exact(DIR_ENTRY_SIZE)
            .filter_map(parse_dir_entry)
            .collect();
        if cfb.entries.is_empty() {
            return Err(cfb_err("empty directory"));
        }
        Ok(cfb)
    }

    fn sector(&self, id: u32) -> Result<&'a [u8], DecodeError> {
        let start = (id as usize + 1) * self.sector_size;
        self.data
            .get(start..start + self.sector_size)
            .ok_or_else(|| cfb_err("sector out of range"))
    }

    fn chain(table: &[u32], start: u32) -> Result<Vec<u32>, DecodeError> {
        let mut ids = Vec::new();
        let mut id = start;
        while id != END_OF_CHAIN && id != FREE_SECTOR {
            if ids.len() > table.len() {
                return Err(cfb_err("sector chain loops"));
            }
            ids.push(id);
            id = *table
                .get(id as usize)
                .ok_or_else(|| cfb_err("sector chain leaves the allocation table"))?;
        }
        Ok(ids)
    }

    fn read_chain(&self, start: u32, size: Option<u64>) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::new();
        for id in Self::chain(&self.fat, start)? {
            out.extend_from_slice(self.sector(id)?);
        }
        if let Some(size) = size {
            out.truncate(size as usize);
        }
        Ok(out)
    }

    fn read_mini_chain(&self, start: u32, size: u64) -> Result<Vec<u8>, DecodeError> {
        let root = &self.entries[0];
        let mini_stream = self.read_chain(root.start, Some(root.size))?;
        let mut out = Vec::new();
        for id in Self::chain(&self.mini_fat, start)? {
            let off = id as usize * self.mini_sector_size;
            let sector = mini_stream
                .get(off..off + self.mini_sector_size)
                .ok_or_else(|| cfb_err("mini sector out of range"))?;
            out.extend_from_slice(sector);
        }
        out.truncate(size as usize);
        Ok(out)
    }

    pub fn has_stream(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind == 2 && e.name.eq_ignore_ascii_case(name))
    }

    /// Content of the named stream, if present
    pub fn stream(&self, name: &str) -> Result<Option<Vec<u8>>, DecodeError> {
        let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.kind == 2 && e.name.eq_ignore_ascii_case(name))
        else {
            return Ok(None);
        };
        let data = if entry.size < self.mini_cutoff {
            self.read_mini_chain(entry.start, entry.size)?
        } else {
            self.read_chain(entry.start, Some(entry.size))?
        };
        Ok(Some(data))
    }
}

fn parse_dir_entry(raw: &[u8]) -> Option<DirEntry> {
    let name_len = le_u16(raw, 64)? as usize;
    let kind = raw[66];
    if kind == 0 || name_len < 2 || name_len > 64 {
        return None;
    }
    let units: Vec<u16> = raw[..name_len - 2]
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    Some(DirEntry {
        name: String::from_utf16_lossy(&units),
        kind,
        start: le_u32(raw, 116)?,
        // v3 files leave the high half undefined
        size: le_u32(raw, 120)? as u64,
    })
}

// =============================================================================
// BIFF8 RECORDS
// =============================================================================

const RT_FORMULA: u16 = 0x0006;
const RT_EOF: u16 = 0x000A;
const RT_FILEPASS: u16 = 0x002F;
const RT_CONTINUE: u16 = 0x003C;
const RT_BOUNDSHEET: u16 = 0x0085;
const RT_MULRK: u16 = 0x00BD;
const RT_SST: u16 = 0x00FC;
const RT_LABELSST: u16 = 0x00FD;
const RT_NUMBER: u16 = 0x0203;
const RT_LABEL: u16 = 0x0204;
const RT_BOOLERR: u16 = 0x0205;
const RT_STRING: u16 = 0x0207;
const RT_RK: u16 = 0x027E;
const RT_BOF: u16 = 0x0809;

const BIFF8_VERSION: u16 = 0x0600;

fn biff_err(message: impl Into<String>) -> DecodeError {
    DecodeError::Biff(message.into())
}

struct Record<'a> {
    kind: u16,
    data: &'a [u8],
}

fn records(stream: &[u8], mut pos: usize) -> impl Iterator<Item = Record<'_>> {
    std::iter::from_fn(move || {
        let kind = le_u16(stream, pos)?;
        let len = le_u16(stream, pos + 2)? as usize;
        let data = stream.get(pos + 4..pos + 4 + len)?;
        pos += 4 + len;
        Some(Record { kind, data })
    })
}

/// Decode an xls file: compound container, then the first worksheet
pub fn read_workbook<R: Read + Seek>(mut reader: R) -> Result<DecodedTable, DecodeError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    let cfb = CompoundFile::open(&data)?;

    // Rights-managed OOXML wrapped in OLE
    if cfb.has_stream("EncryptedPackage") {
        return Err(DecodeError::Encrypted);
    }
    let stream = match cfb.stream("Workbook")? {
        Some(stream) => stream,
        None => cfb
            .stream("Book")?
            .ok_or_else(|| DecodeError::MissingPart("Workbook".to_string()))?,
    };
    parse_biff_stream(&stream)
}

fn parse_biff_stream(stream: &[u8]) -> Result<DecodedTable, DecodeError> {
    let mut iter = records(stream, 0);
    let bof = iter.next().ok_or_else(|| biff_err("empty workbook stream"))?;
    if bof.kind != RT_BOF {
        return Err(biff_err("workbook stream does not start with BOF"));
    }
    if le_u16(bof.data, 0) != Some(BIFF8_VERSION) {
        return Err(biff_err("only BIFF8 workbooks are supported"));
    }

    let mut sst_parts: Vec<&[u8]> = Vec::new();
    let mut in_sst = false;
    let mut first_sheet: Option<usize> = None;

    for record in iter {
        match record.kind {
            RT_FILEPASS => return Err(DecodeError::Encrypted),
            RT_SST => {
                sst_parts.push(record.data);
                in_sst = true;
                continue;
            }
            RT_CONTINUE if in_sst => {
                sst_parts.push(record.data);
                continue;
            }
            RT_BOUNDSHEET if first_sheet.is_none() => {
                // high byte of grbit: 0 = worksheet
                if record.data.get(5) == Some(&0) {
                    first_sheet = le_u32(record.data, 0).map(|off| off as usize);
                }
            }
            RT_EOF => break,
            _ => {}
        }
        in_sst = false;
    }

    let shared = if sst_parts.is_empty() {
        Vec::new()
    } else {
        parse_sst(&sst_parts)?
    };
    let offset = first_sheet.ok_or_else(|| biff_err("workbook has no worksheet"))?;
    parse_sheet(stream, offset, &shared)
}

fn parse_sheet(stream: &[u8], offset: usize, shared: &[String]) -> Result<DecodedTable, DecodeError> {
    let mut iter = records(stream, offset);
    match iter.next() {
        Some(record) if record.kind == RT_BOF => {}
        _ => return Err(biff_err("worksheet offset does not point at BOF")),
    }

    let mut cells: Vec<(usize, usize, CellValue)> = Vec::new();
    let mut pending_string: Option<(usize, usize)> = None;

    for record in iter {
        let data = record.data;
        let pos = || -> Option<(usize, usize)> {
            Some((le_u16(data, 0)? as usize, le_u16(data, 2)? as usize))
        };
        match record.kind {
            RT_EOF => break,
            RT_LABELSST => {
                if let (Some((r, c)), Some(idx)) = (pos(), le_u32(data, 6)) {
                    if let Some(s) = shared.get(idx as usize) {
                        cells.push((r, c, CellValue::Text(s.clone())));
                    }
                }
            }
            RT_LABEL => {
                if let (Some((r, c)), Some(s)) = (pos(), data.get(6..).and_then(unicode_string)) {
                    cells.push((r, c, CellValue::Text(s)));
                }
            }
            RT_NUMBER => {
                if let (Some((r, c)), Some(n)) = (pos(), le_f64(data, 6)) {
                    cells.push((r, c, CellValue::Number(n)));
                }
            }
            RT_RK => {
                if let (Some((r, c)), Some(rk)) = (pos(), le_u32(data, 6)) {
                    cells.push((r, c, CellValue::Number(rk_to_f64(rk))));
                }
            }
            RT_MULRK => {
                if let Some((r, first)) = pos() {
                    let count = data.len().saturating_sub(6) / 6;
                    for i in 0..count {
                        if let Some(rk) = le_u32(data, 4 + i * 6 + 2) {
                            cells.push((r, first + i, CellValue::Number(rk_to_f64(rk))));
                        }
                    }
                }
            }
            RT_BOOLERR => {
                if let (Some((r, c)), Some(&value), Some(&is_error)) = (pos(), data.get(6), data.get(7)) {
                    let cell = if is_error == 0 {
                        CellValue::Bool(value != 0)
                    } else {
                        CellValue::Error(error_code(value).to_string())
                    };
                    cells.push((r, c, cell));
                }
            }
            RT_FORMULA => {
                let Some((r, c)) = pos() else { continue };
                let Some(result) = data.get(6..14) else { continue };
                if result[6] == 0xFF && result[7] == 0xFF {
                    match result[0] {
                        0 => pending_string = Some((r, c)),
                        1 => cells.push((r, c, CellValue::Bool(result[2] != 0))),
                        2 => cells.push((r, c, CellValue::Error(error_code(result[2]).to_string()))),
                        _ => {}
                    }
                } else if let Some(n) = le_f64(data, 6) {
                    cells.push((r, c, CellValue::Number(n)));
                }
            }
            RT_STRING => {
                if let (Some((r, c)), Some(s)) = (pending_string.take(), unicode_string(data)) {
                    cells.push((r, c, CellValue::Text(s)));
                }
            }
            _ => {}
        }
    }

    DecodedTable::from_cells(cells)
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

fn error_code(code: u8) -> &'static str {
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
}

fn decode_chars(bytes: &[u8], high_byte: bool) -> String {
    if high_byte {
        let (text, _) = encoding_rs::UTF_16LE.decode_without_bom_handling(bytes);
        text.into_owned()
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// XLUnicodeString inside a single record: cch, flags, characters
fn unicode_string(data: &[u8]) -> Option<String> {
    let cch = le_u16(data, 0)? as usize;
    let flags = *data.get(2)?;
    let high_byte = flags & 0x01 != 0;
    let mut pos = 3;
    if flags & 0x08 != 0 {
        pos += 2;
    }
    if flags & 0x04 != 0 {
        pos += 4;
    }
    let width = if high_byte { 2 } else { 1 };
    let bytes = data.get(pos..pos + cch * width)?;
    Some(decode_chars(bytes, high_byte))
}

/// Cursor over SST + CONTINUE payloads
struct SstReader<'a> {
    parts: &'a [&'a [u8]],
    part: usize,
    pos: usize,
}

impl<'a> SstReader<'a> {
    fn remaining_in_part(&self) -> usize {
        self.parts
            .get(self.part)
            .map(|p| p.len().saturating_sub(self.pos))
            .unwrap_or(0)
    }

    fn next_part(&mut self) -> Result<(), DecodeError> {
        self.part += 1;
        self.pos = 0;
        if self.part >= self.parts.len() {
            return Err(biff_err("shared string table is truncated"));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        while self.remaining_in_part() == 0 {
            self.next_part()?;
        }
        let b = self.parts[self.part][self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes([self.u8()?, self.u8()?, self.u8()?, self.u8()?]))
    }

    fn skip(&mut self, mut n: usize) -> Result<(), DecodeError> {
        while n > 0 {
            if self.remaining_in_part() == 0 {
                self.next_part()?;
                continue;
            }
            let step = n.min(self.remaining_in_part());
            self.pos += step;
            n -= step;
        }
        Ok(())
    }

    /// Characters may continue in the next record, which then starts with a fresh flags byte
    fn chars(&mut self, mut count: usize, mut high_byte: bool) -> Result<String, DecodeError> {
        let mut out = String::with_capacity(count);
        while count > 0 {
            if self.remaining_in_part() == 0 {
                self.next_part()?;
                high_byte = self.u8()? & 0x01 != 0;
                continue;
            }
            let width = if high_byte { 2 } else { 1 };
            let take = count.min(self.remaining_in_part() / width);
            if take == 0 {
                return Err(biff_err("split character in shared string table"));
            }
            let part = self.parts[self.part];
            out.push_str(&decode_chars(&part[self.pos..self.pos + take * width], high_byte));
            self.pos += take * width;
            count -= take;
        }
        Ok(out)
    }
}

fn parse_sst(parts: &[&[u8]]) -> Result<Vec<String>, DecodeError> {
    let mut reader = SstReader { parts, part: 0, pos: 0 };
    let _total = reader.u32()?;
    let unique = reader.u32()? as usize;
    let mut strings = Vec::with_capacity(unique.min(1 << 16));
    for _ in 0..unique {
        let cch = reader.u16()? as usize;
        let flags = reader.u8()?;
        let runs = if flags & 0x08 != 0 { reader.u16()? as usize } else { 0 };
        let ext = if flags & 0x04 != 0 { reader.u32()? as usize } else { 0 };
        strings.push(reader.chars(cch, flags & 0x01 != 0)?);
        reader.skip(runs * 4 + ext)?;
    }
    Ok(strings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::decode::fixtures::{self, BiffCell};
    use std::io::Cursor;

    #[test]
    fn test_rk_values() {
        // integer 5
        assert_eq!(rk_to_f64((5 << 2) | 0x02), 5.0);
        // integer 1234 / 100
        assert_eq!(rk_to_f64((1234 << 2) | 0x03), 12.34);
        // IEEE 1.0 with low bits dropped
        let one = (1.0f64.to_bits() >> 32) as u32;
        assert_eq!(rk_to_f64(one), 1.0);
    }

    #[test]
    fn test_reads_cells_from_compound_file() {
        let stream = fixtures::biff_workbook(
            &["Case Code", "갤럭시 워치4"],
            &[
                BiffCell::Sst(0, 0, 0),
                BiffCell::Sst(1, 7, 1),
                BiffCell::Number(1, 1, 240115.0),
                BiffCell::Rk(1, 2, (42 << 2) | 0x02),
                BiffCell::Label(1, 0, "P240115-001"),
                BiffCell::Bool(2, 0, true),
                BiffCell::FormulaString(2, 1, "computed"),
            ],
        );
        let bytes = fixtures::compound_file("Workbook", &stream);

        let table = read_workbook(Cursor::new(bytes)).unwrap();
        let rows = table.rows();

        assert_eq!(rows[0].text(0).as_deref(), Some("Case Code"));
        assert_eq!(rows[1].text(0).as_deref(), Some("P240115-001"));
        assert_eq!(rows[1].text(7).as_deref(), Some("갤럭시 워치4"));
        assert_eq!(rows[1].cell(1), &CellValue::Number(240115.0));
        assert_eq!(rows[1].cell(2), &CellValue::Number(42.0));
        assert_eq!(rows[2].cell(0), &CellValue::Bool(true));
        assert_eq!(rows[2].text(1).as_deref(), Some("computed"));
    }

    #[test]
    fn test_column_past_sheet_bounds_fails_the_read() {
        let stream = fixtures::biff_workbook(&[], &[BiffCell::Number(0, 0, 1.0), BiffCell::Number(0, u16::MAX, 2.0)]);
        let bytes = fixtures::compound_file("Workbook", &stream);
        let err = read_workbook(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::CellOutOfRange { row: 0, col: 65535 }));
    }

    #[test]
    fn test_sst_string_split_across_continue() {
        // "abcdef" compressed, split after "abc"; CONTINUE restarts with a UTF-16 flags byte
        let mut sst = Vec::new();
        sst.extend_from_slice(&1u32.to_le_bytes());
        sst.extend_from_slice(&1u32.to_le_bytes());
        sst.extend_from_slice(&6u16.to_le_bytes());
        sst.push(0x00);
        sst.extend_from_slice(b"abc");
        let mut cont = vec![0x01];
        for ch in "def".encode_utf16() {
            cont.extend_from_slice(&ch.to_le_bytes());
        }
        let strings = parse_sst(&[sst.as_slice(), cont.as_slice()]).unwrap();
        assert_eq!(strings, vec!["abcdef"]);
    }

    #[test]
    fn test_encrypted_package_is_reported() {
        let bytes = fixtures::compound_file("EncryptedPackage", &[0u8; 4096]);
        let err = read_workbook(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::Encrypted));
    }

    #[test]
    fn test_filepass_record_is_reported() {
        let stream = fixtures::biff_workbook_with_globals(&[fixtures::biff_record(RT_FILEPASS, &[0; 6])], &[], &[]);
        let bytes = fixtures::compound_file("Workbook", &stream);
        let err = read_workbook(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::Encrypted));
    }

    #[test]
    fn test_rejects_non_compound_input() {
        let err = read_workbook(Cursor::new(b"PK\x03\x04 not ole".to_vec())).unwrap_err();
        assert!(matches!(err, DecodeError::Cfb(_)));
    }
}
