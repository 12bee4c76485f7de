//! Plain-text format adapter (import only).
//!
//! The whole input becomes a single asset carrying the fallback kind.
//! Blank input yields no rows.

use crate::io::formats::{io_fatal, too_large};
use crate::io::input::ReadSeek;
use crate::io::traits::{ParseContext, ParsedRow, RowIter};
use crate::models::{Asset, ParseError, Row, RowErrorCode};
use std::io::Read;

/// Opens a plain-text parser.
#[must_use]
pub fn rows(reader: Box<dyn ReadSeek>, ctx: &ParseContext) -> RowIter {
    let ctx = ctx.clone();
    let mut reader = Some(reader);
    Box::new(std::iter::from_fn(move || {
        let reader = reader.take()?;
        let cap = ctx.limits.entry_bytes;
        let mut data = Vec::new();
        if let Err(e) = reader.take(cap.saturating_add(1)).read_to_end(&mut data) {
            return Some(Err(io_fatal(&e)));
        }
        let bytes = data.len() as u64;
        if bytes > cap {
            return Some(Ok(ParsedRow::new(too_large(1, cap), bytes)));
        }
        if data.trim_ascii().is_empty() {
            return None;
        }
        let row: Row = match (String::from_utf8(data), ctx.fallback()) {
            (Err(_), _) => ParseError::new(RowErrorCode::InvalidRecord, 1)
                .with_detail("input is not valid UTF-8")
                .into(),
            (Ok(_), None) => ParseError::new(RowErrorCode::MissingKind, 1).into(),
            (Ok(content), Some(kind)) => Asset::new(1, kind, content).into(),
        };
        Some(Ok(ParsedRow::new(row, bytes)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use std::io::Cursor;

    fn parse(data: &[u8], fallback: Option<&str>, cap: u64) -> Vec<ParsedRow> {
        let limits = Limits {
            entry_bytes: cap,
            ..Limits::default()
        };
        let ctx = ParseContext::new(limits, fallback.map(str::to_string));
        rows(Box::new(Cursor::new(data.to_vec())), &ctx)
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_whole_input_is_one_asset() {
        let rows = parse(b"line one\nline two\n", Some("note"), 1024);
        assert_eq!(rows.len(), 1);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.kind == "note" && a.content == "line one\nline two\n"));
        assert_eq!(rows[0].bytes, 18);
    }

    #[test]
    fn test_without_fallback_kind() {
        let rows = parse(b"text", None, 1024);
        assert!(matches!(&rows[0].row, Row::Error(e) if e.code == RowErrorCode::MissingKind));
    }

    #[test]
    fn test_blank_and_oversized() {
        assert!(parse(b"  \n", Some("note"), 1024).is_empty());
        let rows = parse(b"0123456789", Some("note"), 4);
        assert!(matches!(&rows[0].row, Row::Error(e) if e.code == RowErrorCode::TooLarge));
    }
}
