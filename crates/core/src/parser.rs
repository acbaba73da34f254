//! Row parser: raw CSV bytes -> headers + ordered raw rows.
//!
//! Stateless and free of type coercion; every cell is a string here.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One imported line: column header -> cell value, in header order.
pub type RawRow = IndexMap<String, String>;

/// Delimiters considered when sniffing, in tie-break order.
const DELIMITER_CANDIDATES: &[u8] = &[b',', b';', b'\t', b'|'];

/// Number of leading lines sampled by [`sniff_delimiter`].
const SNIFF_SAMPLE_LINES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("File is empty")]
    Empty,

    #[error("File is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("Header in column {column} is empty")]
    EmptyHeader { column: usize },

    #[error("Header '{name}' appears more than once")]
    DuplicateHeader { name: String },

    #[error("Malformed CSV at line {line}: {message}")]
    Malformed { line: u64, message: String },
}

/// Result of parsing an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Parse CSV bytes, sniffing the field delimiter.
pub fn parse_csv(data: &[u8]) -> Result<ParsedFile, ParseError> {
    let text = decode(data)?;
    let delimiter = sniff_delimiter(text);
    parse_text(text, delimiter)
}

/// Parse CSV bytes with a caller-supplied delimiter.
pub fn parse_csv_with_delimiter(data: &[u8], delimiter: u8) -> Result<ParsedFile, ParseError> {
    let text = decode(data)?;
    parse_text(text, delimiter)
}

fn decode(data: &[u8]) -> Result<&str, ParseError> {
    let text = std::str::from_utf8(data).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

/// Pick the delimiter that yields the most consistent multi-column split
/// over the first few non-empty lines. Falls back to `,`.
pub fn sniff_delimiter(text: &str) -> u8 {
    let sample: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_SAMPLE_LINES)
        .collect();

    let mut best = b',';
    let mut best_score = 0usize;

    for &delim in DELIMITER_CANDIDATES {
        let counts: Vec<usize> = sample
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let Some(&target) = counts.first() else {
            continue;
        };
        if target <= 1 {
            continue;
        }

        let consistent = counts.iter().filter(|&&c| c == target).count();
        let score = consistent * target;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

fn parse_text(text: &str, delimiter: u8) -> Result<ParsedFile, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records();

    let headers = loop {
        match records.next() {
            None => return Err(ParseError::Empty),
            Some(result) => {
                let cells = record_cells(result)?.1;
                if !cells.iter().all(|c| c.is_empty()) {
                    break check_headers(cells)?;
                }
            }
        }
    };

    let mut rows = Vec::new();
    for result in records {
        let (line, cells) = record_cells(result)?;
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        if cells.len() > headers.len() {
            tracing::debug!(
                line,
                extra = cells.len() - headers.len(),
                "Ignoring cells beyond the header row"
            );
        }
        let mut cells = cells.into_iter();
        let row: RawRow = headers
            .iter()
            .map(|h| (h.clone(), cells.next().unwrap_or_default()))
            .collect();
        rows.push(row);
    }

    Ok(ParsedFile { headers, rows })
}

/// Source line and cleaned cells of one CSV record.
fn record_cells(
    result: Result<csv::StringRecord, csv::Error>,
) -> Result<(u64, Vec<String>), ParseError> {
    let record = result.map_err(|e| ParseError::Malformed {
        line: e.position().map(|p| p.line()).unwrap_or(0),
        message: e.to_string(),
    })?;
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    Ok((line, record.iter().map(clean_cell).collect()))
}

/// Trim surrounding whitespace. A field with whitespace before its
/// opening quote (`  "value"`) is not unquoted by the CSV reader, so that
/// one pair of quotes is removed and doubled quotes inside are unescaped
/// here. Quotes that are part of a value are kept.
fn clean_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    let left_quoted = raw.starts_with(char::is_whitespace)
        && trimmed.len() >= 2
        && trimmed.starts_with('"')
        && trimmed.ends_with('"');
    if left_quoted {
        trimmed[1..trimmed.len() - 1]
            .replace("\"\"", "\"")
            .trim()
            .to_string()
    } else {
        trimmed.to_string()
    }
}

fn check_headers(headers: Vec<String>) -> Result<Vec<String>, ParseError> {
    let mut seen = std::collections::HashSet::new();
    for (i, h) in headers.iter().enumerate() {
        if h.is_empty() {
            return Err(ParseError::EmptyHeader { column: i + 1 });
        }
        if !seen.insert(h.as_str()) {
            return Err(ParseError::DuplicateHeader { name: h.clone() });
        }
    }
    Ok(headers)
}
