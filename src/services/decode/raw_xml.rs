//! Lenient worksheet scanner
//!
//! Walks the worksheet part byte-wise looking for `<row>`, `<c>`, `<v>` and
//! inline `<t>` elements. No XML parser is involved, so mismatched or
//! truncated markup that a strict reader rejects still yields cells.

use std::borrow::Cow;
use std::io::{Read, Seek};

use memchr::{memchr, memmem};
use zip::ZipArchive;

use super::ooxml::{cell_position, read_part, typed_cell};
use crate::error::DecodeError;
use crate::types::{CellValue, DecodedTable};

const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const WORKSHEET_PREFIX: &str = "xl/worksheets/";

pub fn scan_workbook<R: Read + Seek>(reader: R) -> Result<DecodedTable, DecodeError> {
    let mut archive = ZipArchive::new(reader)?;

    let mut sheets: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with(WORKSHEET_PREFIX) && name.ends_with(".xml"))
        .filter(|name| !name[WORKSHEET_PREFIX.len()..].contains('/'))
        .map(str::to_string)
        .collect();
    // sheet2.xml before sheet10.xml
    sheets.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    let sheet = sheets
        .first()
        .cloned()
        .ok_or_else(|| DecodeError::MissingPart(format!("{}*.xml", WORKSHEET_PREFIX)))?;

    let shared = read_part(&mut archive, SHARED_STRINGS_PART)?
        .map(|xml| scan_shared_strings(&xml))
        .unwrap_or_default();
    let xml = read_part(&mut archive, &sheet)?.ok_or(DecodeError::MissingPart(sheet))?;

    scan_sheet(&xml, &shared)
}

/// Position of `<name` followed by a tag delimiter
fn find_tag(hay: &[u8], name: &[u8]) -> Option<usize> {
    memmem::find_iter(hay, name).find(|&pos| {
        matches!(
            hay.get(pos + name.len()),
            Some(b' ') | Some(b'>') | Some(b'/') | Some(b'\t') | Some(b'\r') | Some(b'\n')
        )
    })
}

fn attr<'a>(tag: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let mut needle = Vec::with_capacity(name.len() + 3);
    needle.push(b' ');
    needle.extend_from_slice(name);
    needle.extend_from_slice(b"=\"");
    let start = memmem::find(tag, &needle)? + needle.len();
    let len = memchr(b'"', &tag[start..])?;
    Some(&tag[start..start + len])
}

/// Byte range of the text between `<name ...>` and `</name>`
fn element_span(content: &[u8], open: &[u8], close: &[u8]) -> Option<(usize, usize)> {
    let start = find_tag(content, open)?;
    let gt = memchr(b'>', &content[start..])? + start;
    if content[gt - 1] == b'/' {
        return Some((gt + 1, gt + 1));
    }
    let end = memmem::find(&content[gt + 1..], close)
        .map(|e| gt + 1 + e)
        .unwrap_or(content.len());
    Some((gt + 1, end))
}

fn element_text<'a>(content: &'a [u8], open: &[u8], close: &[u8]) -> Option<&'a [u8]> {
    element_span(content, open, close).map(|(start, end)| &content[start..end])
}

fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Decode the predefined and numeric XML entities; unknown ones stay literal
fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    if let Some(hex) = entity.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok().and_then(char::from_u32)
                    } else {
                        None
                    }
                }
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn strip_phonetic(si: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(si.len());
    let mut rest = si;
    while let Some(start) = find_tag(rest, b"<rPh") {
        out.extend_from_slice(&rest[..start]);
        match memmem::find(&rest[start..], b"</rPh>") {
            Some(end) => rest = &rest[start + end + b"</rPh>".len()..],
            None => return out,
        }
    }
    out.extend_from_slice(rest);
    out
}

fn scan_shared_strings(xml: &[u8]) -> Vec<String> {
    let mut strings = Vec::new();
    let mut pos = 0;
    while let Some(off) = find_tag(&xml[pos..], b"<si") {
        let start = pos + off;
        let Some(gt) = memchr(b'>', &xml[start..]).map(|g| start + g) else {
            break;
        };
        if xml[gt - 1] == b'/' {
            strings.push(String::new());
            pos = gt + 1;
            continue;
        }
        let end = memmem::find(&xml[gt..], b"</si>")
            .map(|e| gt + e)
            .unwrap_or(xml.len());
        let body = strip_phonetic(&xml[gt + 1..end]);

        let mut text = String::new();
        let mut cursor = 0;
        while let Some((start, end)) = element_span(&body[cursor..], b"<t", b"</t>") {
            text.push_str(&unescape(&lossy(&body[cursor + start..cursor + end])));
            cursor += end;
        }
        strings.push(text);
        pos = end;
    }
    strings
}

fn scan_cells(body: &[u8], row: usize, shared: &[String], cells: &mut Vec<(usize, usize, CellValue)>) {
    let mut pos = 0;
    let mut next_col = 0;
    while let Some(off) = find_tag(&body[pos..], b"<c") {
        let start = pos + off;
        let Some(gt) = memchr(b'>', &body[start..]).map(|g| start + g) else {
            break;
        };
        let tag = &body[start..gt];
        let col = attr(tag, b"r")
            .and_then(|r| std::str::from_utf8(r).ok())
            .and_then(cell_position)
            .map(|(_, c)| c)
            .unwrap_or(next_col);
        next_col = col + 1;

        if tag.ends_with(b"/") {
            pos = gt + 1;
            continue;
        }

        let content_end = memmem::find(&body[gt + 1..], b"</c>")
            .map(|e| gt + 1 + e)
            .unwrap_or(body.len());
        let content = &body[gt + 1..content_end];
        let cell_type = attr(tag, b"t").map(lossy);
        let raw = element_text(content, b"<v", b"</v>")
            .or_else(|| element_text(content, b"<t", b"</t>"))
            .map(|v| unescape(&lossy(v)));

        if let Some(raw) = raw {
            let value = typed_cell(cell_type.as_deref(), &raw, shared);
            if !matches!(value, CellValue::Empty) {
                cells.push((row, col, value));
            }
        }
        pos = content_end;
    }
}

fn scan_sheet(xml: &[u8], shared: &[String]) -> Result<DecodedTable, DecodeError> {
    let mut cells = Vec::new();
    let mut pos = 0;
    let mut next_row = 0;

    while let Some(off) = find_tag(&xml[pos..], b"<row") {
        let start = pos + off;
        let Some(gt) = memchr(b'>', &xml[start..]).map(|g| start + g) else {
            break;
        };
        let tag = &xml[start..gt];
        let row = attr(tag, b"r")
            .and_then(|r| std::str::from_utf8(r).ok())
            .and_then(|r| r.parse::<usize>().ok())
            .filter(|&r| r > 0)
            .map(|r| r - 1)
            .unwrap_or(next_row);
        next_row = row + 1;

        if tag.ends_with(b"/") {
            pos = gt + 1;
            continue;
        }

        // An unterminated row runs up to the next one
        let end = memmem::find(&xml[gt + 1..], b"</row>")
            .map(|e| gt + 1 + e)
            .or_else(|| find_tag(&xml[gt + 1..], b"<row").map(|e| gt + 1 + e))
            .unwrap_or(xml.len());
        scan_cells(&xml[gt + 1..end], row, shared, &mut cells);
        pos = end;
    }

    DecodedTable::from_cells(cells)
}
