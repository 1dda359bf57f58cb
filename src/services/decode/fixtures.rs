//! Workbook builders for decoder tests

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn zip_parts(parts: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in parts {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn rels(target: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="{}"/></Relationships>"#,
        target
    )
    .into_bytes()
}

// =============================================================================
// XLSX
// =============================================================================

/// Minimal xlsx whose only sheet is `sheet_xml`
pub fn xlsx(sheet_xml: &str, shared: &[&str]) -> Vec<u8> {
    let workbook = r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="VOC" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
    let sst: String = shared
        .iter()
        .map(|s| format!("<si><t>{}</t></si>", escape(s)))
        .collect();
    let sst = format!(r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{}</sst>"#, sst);

    zip_parts(&[
        ("xl/workbook.xml", workbook.as_bytes().to_vec()),
        ("xl/_rels/workbook.xml.rels", rels("worksheets/sheet1.xml")),
        ("xl/sharedStrings.xml", sst.into_bytes()),
        ("xl/worksheets/sheet1.xml", sheet_xml.as_bytes().to_vec()),
    ])
}

/// Rows of inline strings, starting at sheet row 1
pub fn xlsx_rows(rows: &[&[&str]]) -> Vec<u8> {
    let mut sheet = String::from("<worksheet><sheetData>");
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            sheet.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                column_name(c),
                r + 1,
                escape(value)
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");
    xlsx(&sheet, &[])
}

fn column_name(mut col: usize) -> String {
    let mut name = String::new();
    loop {
        name.insert(0, (b'A' + (col % 26) as u8) as char);
        if col < 26 {
            return name;
        }
        col = col / 26 - 1;
    }
}

// =============================================================================
// XLSB
// =============================================================================

pub enum XlsbCell {
    Isst(u32, u32, u32),
    Text(u32, u32, &'static str),
    Real(u32, u32, f64),
    Rk(u32, u32, u32),
    Bool(u32, u32, bool),
}

fn xlsb_record(kind: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if kind < 0x80 {
        out.push(kind as u8);
    } else {
        out.push((kind & 0x7F) as u8 | 0x80);
        out.push((kind >> 7) as u8);
    }
    let mut len = data.len();
    loop {
        let b = (len & 0x7F) as u8;
        len >>= 7;
        if len == 0 {
            out.push(b);
            break;
        }
        out.push(b | 0x80);
    }
    out.extend_from_slice(data);
    out
}

fn wide(s: &str) -> Vec<u8> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let mut out = (units.len() as u32).to_le_bytes().to_vec();
    for u in units {
        out.extend_from_slice(&u.to_le_bytes());
    }
    out
}

pub fn xlsb(shared: &[&str], cells: &[XlsbCell]) -> Vec<u8> {
    let mut bundle = Vec::new();
    bundle.extend_from_slice(&0u32.to_le_bytes());
    bundle.extend_from_slice(&1u32.to_le_bytes());
    bundle.extend(wide("rId1"));
    bundle.extend(wide("VOC"));
    let workbook = xlsb_record(156, &bundle);

    let mut sst = Vec::new();
    for s in shared {
        let mut item = vec![0u8];
        item.extend(wide(s));
        sst.extend(xlsb_record(19, &item));
    }

    let mut sheet = Vec::new();
    let mut current_row = None;
    for cell in cells {
        let (row, col) = match cell {
            XlsbCell::Isst(r, c, _)
            | XlsbCell::Text(r, c, _)
            | XlsbCell::Real(r, c, _)
            | XlsbCell::Rk(r, c, _)
            | XlsbCell::Bool(r, c, _) => (*r, *c),
        };
        if current_row != Some(row) {
            let mut hdr = row.to_le_bytes().to_vec();
            hdr.extend_from_slice(&[0u8; 9]);
            sheet.extend(xlsb_record(0, &hdr));
            current_row = Some(row);
        }
        let mut data = col.to_le_bytes().to_vec();
        data.extend_from_slice(&0u32.to_le_bytes());
        let kind = match cell {
            XlsbCell::Isst(_, _, idx) => {
                data.extend_from_slice(&idx.to_le_bytes());
                7
            }
            XlsbCell::Text(_, _, s) => {
                data.extend(wide(s));
                6
            }
            XlsbCell::Real(_, _, n) => {
                data.extend_from_slice(&n.to_le_bytes());
                5
            }
            XlsbCell::Rk(_, _, rk) => {
                data.extend_from_slice(&rk.to_le_bytes());
                2
            }
            XlsbCell::Bool(_, _, b) => {
                data.push(*b as u8);
                4
            }
        };
        sheet.extend(xlsb_record(kind, &data));
    }

    zip_parts(&[
        ("xl/workbook.bin", workbook),
        ("xl/_rels/workbook.bin.rels", rels("worksheets/sheet1.bin")),
        ("xl/sharedStrings.bin", sst),
        ("xl/worksheets/sheet1.bin", sheet),
    ])
}

// =============================================================================
// XLS (BIFF8 IN A COMPOUND FILE)
// =============================================================================

pub enum BiffCell {
    Sst(u16, u16, u32),
    Label(u16, u16, &'static str),
    Number(u16, u16, f64),
    Rk(u16, u16, u32),
    Bool(u16, u16, bool),
    FormulaString(u16, u16, &'static str),
}

pub fn biff_record(kind: u16, data: &[u8]) -> Vec<u8> {
    let mut out = kind.to_le_bytes().to_vec();
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn bof(substream: u16) -> Vec<u8> {
    let mut data = 0x0600u16.to_le_bytes().to_vec();
    data.extend_from_slice(&substream.to_le_bytes());
    data.extend_from_slice(&[0u8; 12]);
    biff_record(0x0809, &data)
}

/// XLUnicodeString, UTF-16 when any character is outside Latin-1
fn unicode_string(s: &str) -> Vec<u8> {
    let compressed = s.chars().all(|c| (c as u32) < 0x100);
    let mut out = (s.chars().count() as u16).to_le_bytes().to_vec();
    if compressed {
        out.push(0);
        out.extend(s.chars().map(|c| c as u8));
    } else {
        out.push(1);
        for u in s.encode_utf16() {
            out.extend_from_slice(&u.to_le_bytes());
        }
    }
    out
}

fn cell_prefix(row: u16, col: u16) -> Vec<u8> {
    let mut data = row.to_le_bytes().to_vec();
    data.extend_from_slice(&col.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data
}

pub fn biff_workbook(shared: &[&str], cells: &[BiffCell]) -> Vec<u8> {
    biff_workbook_with_globals(&[], shared, cells)
}

/// Globals substream (with `extra` records after BOF), then one worksheet
pub fn biff_workbook_with_globals(extra: &[Vec<u8>], shared: &[&str], cells: &[BiffCell]) -> Vec<u8> {
    let mut sst = (shared.len() as u32).to_le_bytes().to_vec();
    sst.extend_from_slice(&(shared.len() as u32).to_le_bytes());
    for s in shared {
        sst.extend(unicode_string(s));
    }

    let boundsheet_len = 4 + 11;
    let mut globals = bof(0x0005);
    for record in extra {
        globals.extend_from_slice(record);
    }
    let sheet_offset = globals.len() + boundsheet_len + 4 + sst.len() + 4;

    let mut boundsheet = (sheet_offset as u32).to_le_bytes().to_vec();
    boundsheet.extend_from_slice(&[0, 0]);
    boundsheet.extend_from_slice(&[3, 0]);
    boundsheet.extend_from_slice(b"VOC");
    globals.extend(biff_record(0x0085, &boundsheet));
    globals.extend(biff_record(0x00FC, &sst));
    globals.extend(biff_record(0x000A, &[]));
    assert_eq!(globals.len(), sheet_offset);

    let mut stream = globals;
    stream.extend(bof(0x0010));
    for cell in cells {
        let record = match cell {
            BiffCell::Sst(r, c, idx) => {
                let mut data = cell_prefix(*r, *c);
                data.extend_from_slice(&idx.to_le_bytes());
                biff_record(0x00FD, &data)
            }
            BiffCell::Label(r, c, s) => {
                let mut data = cell_prefix(*r, *c);
                data.extend(unicode_string(s));
                biff_record(0x0204, &data)
            }
            BiffCell::Number(r, c, n) => {
                let mut data = cell_prefix(*r, *c);
                data.extend_from_slice(&n.to_le_bytes());
                biff_record(0x0203, &data)
            }
            BiffCell::Rk(r, c, rk) => {
                let mut data = cell_prefix(*r, *c);
                data.extend_from_slice(&rk.to_le_bytes());
                biff_record(0x027E, &data)
            }
            BiffCell::Bool(r, c, b) => {
                let mut data = cell_prefix(*r, *c);
                data.extend_from_slice(&[*b as u8, 0]);
                biff_record(0x0205, &data)
            }
            BiffCell::FormulaString(r, c, s) => {
                let mut data = cell_prefix(*r, *c);
                data.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);
                data.extend_from_slice(&[0u8; 6]);
                let mut out = biff_record(0x0006, &data);
                out.extend(biff_record(0x0207, &unicode_string(s)));
                out
            }
        };
        stream.extend(record);
    }
    stream.extend(biff_record(0x000A, &[]));
    stream
}

/// Version 3 compound file holding a single stream.
///
/// Sector 0 is the FAT, sector 1 the directory, the stream follows. The
/// stream is padded to the mini-stream cutoff so it lives in regular sectors.
pub fn compound_file(stream_name: &str, stream: &[u8]) -> Vec<u8> {
    const SECTOR: usize = 512;
    const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
    const FREE: u32 = 0xFFFF_FFFF;

    let mut content = stream.to_vec();
    if content.len() < 4096 {
        content.resize(4096, 0);
    }
    let stream_sectors = content.len().div_ceil(SECTOR);
    assert!(stream_sectors + 2 <= SECTOR / 4);

    let mut header = vec![0u8; SECTOR];
    header[..8].copy_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
    header[0x18..0x1A].copy_from_slice(&0x003Eu16.to_le_bytes());
    header[0x1A..0x1C].copy_from_slice(&3u16.to_le_bytes());
    header[0x1C..0x1E].copy_from_slice(&0xFFFEu16.to_le_bytes());
    header[0x1E..0x20].copy_from_slice(&9u16.to_le_bytes());
    header[0x20..0x22].copy_from_slice(&6u16.to_le_bytes());
    header[0x2C..0x30].copy_from_slice(&1u32.to_le_bytes());
    header[0x30..0x34].copy_from_slice(&1u32.to_le_bytes());
    header[0x38..0x3C].copy_from_slice(&4096u32.to_le_bytes());
    header[0x3C..0x40].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    header[0x44..0x48].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    for i in 0..109 {
        let value = if i == 0 { 0 } else { FREE };
        header[0x4C + i * 4..0x50 + i * 4].copy_from_slice(&value.to_le_bytes());
    }

    let mut fat = vec![FREE; SECTOR / 4];
    fat[0] = 0xFFFF_FFFD;
    fat[1] = END_OF_CHAIN;
    for i in 0..stream_sectors {
        let id = 2 + i;
        fat[id] = if i + 1 == stream_sectors { END_OF_CHAIN } else { (id + 1) as u32 };
    }
    let fat_sector: Vec<u8> = fat.iter().flat_map(|v| v.to_le_bytes()).collect();

    let mut dir = vec![0u8; SECTOR];
    write_dir_entry(&mut dir[..128], "Root Entry", 5, END_OF_CHAIN, 0, 1);
    write_dir_entry(&mut dir[128..256], stream_name, 2, 2, stream.len().max(4096) as u32, FREE);

    let mut out = header;
    out.extend(fat_sector);
    out.extend(dir);
    out.extend(&content);
    out.resize(SECTOR * (3 + stream_sectors), 0);
    out
}

fn write_dir_entry(entry: &mut [u8], name: &str, kind: u8, start: u32, size: u32, child: u32) {
    let units: Vec<u16> = name.encode_utf16().collect();
    for (i, u) in units.iter().enumerate() {
        entry[i * 2..i * 2 + 2].copy_from_slice(&u.to_le_bytes());
    }
    entry[64..66].copy_from_slice(&(((units.len() + 1) * 2) as u16).to_le_bytes());
    entry[66] = kind;
    entry[67] = 1;
    entry[68..72].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    entry[72..76].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    entry[76..80].copy_from_slice(&child.to_le_bytes());
    entry[116..120].copy_from_slice(&start.to_le_bytes());
    entry[120..124].copy_from_slice(&size.to_le_bytes());
}
