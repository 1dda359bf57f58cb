//! Delimited text reader (csv exports, converter output, mislabelled text)

use encoding_rs::EUC_KR;

use crate::error::DecodeError;
use crate::types::{CellValue, DecodedRow, DecodedTable};

const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];
const SNIFF_LINES: usize = 10;

/// UTF-8 first, then EUC-KR (CP949) which legacy Korean exports use
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = EUC_KR.decode(bytes);
            text.into_owned()
        }
    }
}

/// Delimiter that appears most often and on the most of the first lines
fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();

    CANDIDATE_DELIMITERS
        .iter()
        .map(|&d| {
            let per_line: Vec<usize> = lines
                .iter()
                .map(|line| line.bytes().filter(|&b| b == d).count())
                .collect();
            let lines_with = per_line.iter().filter(|&&n| n > 0).count();
            let total: usize = per_line.iter().sum();
            (d, lines_with, total)
        })
        .filter(|&(_, lines_with, _)| lines_with > 0)
        .max_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)).then(b.0.cmp(&a.0)))
        .map(|(d, _, _)| d)
        .unwrap_or(b',')
}

pub fn read_delimited(bytes: &[u8]) -> Result<DecodedTable, DecodeError> {
    let text = decode_text(bytes);
    if text.contains('\0') {
        return Err(DecodeError::UnsupportedSignature);
    }
    let delimiter = sniff_delimiter(&text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cells = record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect();
        rows.push(DecodedRow::new(cells));
    }
    Ok(DecodedTable::new(rows))
}
