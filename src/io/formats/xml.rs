//! XML format adapter for import/export.
//!
//! Walks the document with a pull parser and opens an asset at every element
//! whose lower-cased local name is allow-listed. Attributes supply `kind`,
//! `name` and `hash`; text and CDATA inside the element are concatenated into
//! `content`. Malformed XML ends the stream with `PARSER_ERROR`.

use crate::io::formats::{RecordFields, too_large};
use crate::io::input::ReadSeek;
use crate::io::traits::{ExportSink, ParseContext, ParsedRow, RowIter};
use crate::models::{ExportAsset, FatalCode, FatalError, ParseError, Row, RowErrorCode};
use crate::Result;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use std::io::BufReader;

/// Opens an XML parser that yields one row per allow-listed element.
#[must_use]
pub fn rows(reader: Box<dyn ReadSeek>, tags: &[String], ctx: &ParseContext) -> RowIter {
    Box::new(XmlRows {
        reader: Reader::from_reader(BufReader::new(reader)),
        buf: Vec::new(),
        tags: tags.iter().map(|t| t.to_lowercase()).collect(),
        open: None,
        ordinal: 0,
        position: 0,
        ctx: ctx.clone(),
        done: false,
    })
}

/// An asset element being accumulated.
#[derive(Debug)]
struct OpenAsset {
    tag: String,
    fields: RecordFields,
    text: String,
    /// Nested elements with the same name as `tag`.
    depth: usize,
    oversized: bool,
    invalid: Option<String>,
}

impl OpenAsset {
    fn from_start(start: &BytesStart<'_>, tag: String) -> Self {
        let mut asset = Self {
            tag,
            fields: RecordFields::default(),
            text: String::new(),
            depth: 0,
            oversized: false,
            invalid: None,
        };
        for attr in start.attributes() {
            match attr {
                Ok(attr) => match attr.unescape_value() {
                    Ok(value) => {
                        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                        asset.fields.set(&key, value.into_owned());
                    },
                    Err(e) => asset.invalid = Some(e.to_string()),
                },
                Err(e) => asset.invalid = Some(e.to_string()),
            }
        }
        asset
    }

    fn push_text(&mut self, text: &str, cap: u64) {
        if self.oversized {
            return;
        }
        if (self.text.len() + text.len()) as u64 > cap {
            self.oversized = true;
            self.text.clear();
        } else {
            self.text.push_str(text);
        }
    }

    fn into_row(mut self, ordinal: u64, ctx: &ParseContext) -> Row {
        if self.oversized {
            return too_large(ordinal, ctx.limits.entry_bytes);
        }
        if let Some(detail) = self.invalid {
            return ParseError::new(RowErrorCode::InvalidRecord, ordinal)
                .with_detail(detail)
                .into();
        }
        // Element text wins over a `content` attribute unless it is blank.
        if !self.text.trim().is_empty() || self.fields.content.is_none() {
            self.fields.content = Some(self.text);
        }
        self.fields.into_row(ordinal, ctx.fallback())
    }
}

/// Lazy XML row parser.
struct XmlRows {
    reader: Reader<BufReader<Box<dyn ReadSeek>>>,
    buf: Vec<u8>,
    tags: Vec<String>,
    open: Option<OpenAsset>,
    ordinal: u64,
    position: u64,
    ctx: ParseContext,
    done: bool,
}

impl XmlRows {
    fn matches(&self, local_name: &[u8]) -> Option<String> {
        let name = String::from_utf8_lossy(local_name).to_lowercase();
        self.tags.contains(&name).then_some(name)
    }

    fn consumed(&mut self) -> u64 {
        let position = self.reader.buffer_position() as u64;
        let bytes = position.saturating_sub(self.position);
        self.position = position;
        bytes
    }

    fn emit(&mut self, asset: OpenAsset) -> ParsedRow {
        self.ordinal += 1;
        let bytes = self.consumed();
        ParsedRow::new(asset.into_row(self.ordinal, &self.ctx), bytes)
    }

    fn fail(&mut self, detail: String) -> Option<std::result::Result<ParsedRow, FatalError>> {
        self.done = true;
        Some(Err(FatalError::with_detail(FatalCode::ParserError, detail)))
    }
}

impl Iterator for XmlRows {
    type Item = std::result::Result<ParsedRow, FatalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cap = self.ctx.limits.entry_bytes;
        while !self.done {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event.into_owned(),
                Err(e) => {
                    let at = self.reader.error_position();
                    return self.fail(format!("{e} at byte {at}"));
                },
            };

            match event {
                Event::Eof => {
                    if let Some(open) = &self.open {
                        let detail = format!("document ended inside <{}>", open.tag);
                        return self.fail(detail);
                    }
                    self.done = true;
                },
                Event::Start(start) => {
                    if let Some(open) = self.open.as_mut() {
                        if start.local_name().as_ref().eq_ignore_ascii_case(open.tag.as_bytes()) {
                            open.depth += 1;
                        }
                    } else if let Some(tag) = self.matches(start.local_name().as_ref()) {
                        self.open = Some(OpenAsset::from_start(&start, tag));
                    }
                },
                Event::Empty(start) => {
                    if self.open.is_none()
                        && let Some(tag) = self.matches(start.local_name().as_ref())
                    {
                        let asset = OpenAsset::from_start(&start, tag);
                        return Some(Ok(self.emit(asset)));
                    }
                },
                Event::Text(text) => {
                    if let Some(open) = self.open.as_mut() {
                        match text.unescape() {
                            Ok(text) => open.push_text(&text, cap),
                            Err(e) => open.invalid = Some(e.to_string()),
                        }
                    }
                },
                Event::CData(data) => {
                    if let Some(open) = self.open.as_mut() {
                        open.push_text(&String::from_utf8_lossy(&data.into_inner()), cap);
                    }
                },
                Event::End(end) => {
                    let closes = self.open.as_mut().is_some_and(|open| {
                        if !end.local_name().as_ref().eq_ignore_ascii_case(open.tag.as_bytes()) {
                            return false;
                        }
                        if open.depth == 0 {
                            return true;
                        }
                        open.depth -= 1;
                        false
                    });
                    if closes && let Some(asset) = self.open.take() {
                        return Some(Ok(self.emit(asset)));
                    }
                },
                _ => {},
            }
        }
        None
    }
}

/// XML export sink.
///
/// Writes `<assets>` with one `<asset>` element per asset.
pub struct XmlExportSink {
    buffer: String,
    started: bool,
}

impl XmlExportSink {
    /// Creates a new XML export sink.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
            started: false,
        }
    }

    fn ensure_prolog(&mut self) {
        if !self.started {
            self.buffer
                .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<assets>\n");
            self.started = true;
        }
    }
}

impl Default for XmlExportSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportSink for XmlExportSink {
    fn write(&mut self, asset: &ExportAsset) -> Result<()> {
        self.ensure_prolog();
        self.buffer.push_str(&format!(
            "  <asset id=\"{}\" kind=\"{}\"",
            escape(&asset.id),
            escape(&asset.kind)
        ));
        if let Some(name) = &asset.name {
            self.buffer.push_str(&format!(" name=\"{}\"", escape(name)));
        }
        if let Some(hash) = &asset.hash {
            self.buffer.push_str(&format!(" hash=\"{}\"", escape(hash)));
        }
        self.buffer.push_str(&format!(
            " created_at=\"{}\">{}</asset>\n",
            asset.created_at,
            escape(&asset.content)
        ));
        Ok(())
    }

    fn take_chunk(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.buffer).into_bytes())
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.ensure_prolog();
        self.buffer.push_str("</assets>\n");
        Ok(self.buffer.into_bytes())
    }
}
