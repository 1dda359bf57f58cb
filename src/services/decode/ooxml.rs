//! Office Open XML (xlsx) reader
//!
//! Opens the zip container, resolves the first worksheet through
//! `xl/workbook.xml` and its relationships, then streams the sheet XML.

use std::io::{Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::DecodeError;
use crate::types::{CellValue, DecodedTable};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const FALLBACK_SHEET_PART: &str = "xl/worksheets/sheet1.xml";

/// Decode the first worksheet of an xlsx container
pub fn read_workbook<R: Read + Seek>(reader: R) -> Result<DecodedTable, DecodeError> {
    let mut archive = ZipArchive::new(reader)?;

    let sheet_part = first_sheet_part(&mut archive)?;
    let shared = match read_part(&mut archive, SHARED_STRINGS_PART)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet_xml = read_part(&mut archive, &sheet_part)?
        .ok_or_else(|| DecodeError::MissingPart(sheet_part.clone()))?;

    parse_sheet(&sheet_xml, &shared)
}

/// Read a zip member; `None` when it does not exist
pub(crate) fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, DecodeError> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, DecodeError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| DecodeError::Xml(e.to_string()))?;
        if attr.key.as_ref() == key || attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn first_sheet_part<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String, DecodeError> {
    let workbook = read_part(archive, WORKBOOK_PART)?
        .ok_or_else(|| DecodeError::MissingPart(WORKBOOK_PART.to_string()))?;

    let target = match first_sheet_rel_id(&workbook)? {
        Some(rel_id) => relationship_target(archive, WORKBOOK_RELS_PART, &rel_id)?,
        None => None,
    };
    Ok(target.unwrap_or_else(|| FALLBACK_SHEET_PART.to_string()))
}

/// Resolve a relationship id to a part name through a `.rels` part
pub(crate) fn relationship_target<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    rels_part: &str,
    rel_id: &str,
) -> Result<Option<String>, DecodeError> {
    let Some(rels) = read_part(archive, rels_part)? else {
        return Ok(None);
    };

    let mut reader = Reader::from_reader(rels.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attr_value(&e, b"Id")?.as_deref() == Some(rel_id) {
                    return Ok(attr_value(&e, b"Target")?.map(|t| resolve_target(&t)));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn first_sheet_rel_id(workbook: &[u8]) -> Result<Option<String>, DecodeError> {
    let mut reader = Reader::from_reader(workbook);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                // r:id, matched on its local name
                return attr_value(&e, b"id");
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

/// Shared string table; rich-text runs are concatenated, phonetic runs dropped
pub(crate) fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" if !in_phonetic => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_t => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based `(row, col)` from an A1-style reference
pub(crate) fn cell_position(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col
            .checked_mul(26)?
            .checked_add(ch.to_ascii_uppercase() as usize - 'A' as usize + 1)?;
    }
    let row: usize = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}

fn reference_position(reference: &str) -> Result<(usize, usize), DecodeError> {
    cell_position(reference)
        .ok_or_else(|| DecodeError::Xml(format!("invalid cell reference '{}'", reference)))
}

/// Typed cell value from the `t` attribute and raw `<v>` text
pub(crate) fn typed_cell(cell_type: Option<&str>, raw: &str, shared: &[String]) -> CellValue {
    match cell_type {
        Some("s") => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|idx| shared.get(idx))
            .map(|s| CellValue::Text(s.clone()))
            .unwrap_or(CellValue::Empty),
        Some("str") | Some("inlineStr") | Some("d") => {
            if raw.is_empty() {
                CellValue::Empty
            } else {
                CellValue::Text(raw.to_string())
            }
        }
        Some("b") => CellValue::Bool(raw.trim() == "1"),
        Some("e") => CellValue::Error(raw.to_string()),
        _ => {
            if raw.trim().is_empty() {
                CellValue::Empty
            } else {
                raw.trim()
                    .parse::<f64>()
                    .map(CellValue::Number)
                    .unwrap_or_else(|_| CellValue::Text(raw.to_string()))
            }
        }
    }
}

fn parse_sheet(xml: &[u8], shared: &[String]) -> Result<DecodedTable, DecodeError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut cells = Vec::new();

    let mut next_row = 0usize;
    let mut row = 0usize;
    let mut next_col = 0usize;

    let mut cell: Option<(usize, usize, Option<String>)> = None;
    let mut value = String::new();
    let mut in_value = false;
    let mut in_inline = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row = attr_value(&e, b"r")?
                        .and_then(|r| r.parse::<usize>().ok())
                        .filter(|&r| r > 0)
                        .map(|r| r - 1)
                        .unwrap_or(next_row);
                    next_row = row + 1;
                    next_col = 0;
                }
                b"c" => {
                    let (r, c) = match attr_value(&e, b"r")? {
                        Some(reference) => reference_position(&reference)?,
                        None => (row, next_col),
                    };
                    next_col = c + 1;
                    cell = Some((r, c, attr_value(&e, b"t")?));
                    value.clear();
                }
                b"v" => in_value = true,
                b"is" => in_inline = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => {
                    row = next_row;
                    next_row += 1;
                }
                b"c" => {
                    next_col = match attr_value(&e, b"r")? {
                        Some(reference) => reference_position(&reference)?.1 + 1,
                        None => next_col + 1,
                    };
                }
                _ => {}
            },
            Event::Text(t) if in_value || in_inline => value.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"is" => in_inline = false,
                b"c" => {
                    if let Some((r, c, t)) = cell.take() {
                        let parsed = typed_cell(t.as_deref(), &value, shared);
                        if !matches!(parsed, CellValue::Empty) {
                            cells.push((r, c, parsed));
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    DecodedTable::from_cells(cells)
}
