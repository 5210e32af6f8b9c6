//! Incremental XML parser driving an [`XmlTarget`].
//!
//! Tokenizing is done by `quick-xml`. This adapter adds what the callback
//! contract needs on top of it: incremental input with arbitrary chunk
//! boundaries, encoding detection, namespace processing (names in Clark
//! notation, `xmlns` attributes reported as `start_ns` / `end_ns`), end-tag
//! matching, the single-root rule, attribute-value and line-end
//! normalization, and error locations.
//!
//! Each `feed` appends the decoded text to an internal buffer and reads
//! events from it until the buffer is exhausted or only an incomplete
//! construct remains. The incomplete tail is kept for the next call.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::encoding::StreamDecoder;
use crate::error::{Error, ParseError, SourceLocation, UsageError};

use super::namespace::NamespaceScope;
use super::XmlTarget;

/// An element whose end tag has not been seen yet.
struct OpenElement {
    /// The name as written in the source (`p:local`).
    raw: String,
    /// The name in Clark notation.
    tag: String,
    /// Prefixes declared on the element, `""` for the default namespace.
    declared: Vec<String>,
}

/// Parser lifecycle.
enum State {
    Feeding,
    Failed(Failure),
    Closed,
}

/// What a failed parser reports on every later call.
#[derive(Clone)]
enum Failure {
    Parse(ParseError),
    Target(String),
}

impl Failure {
    fn to_error(&self) -> Error {
        match self {
            Self::Parse(e) => Error::Parse(e.clone()),
            Self::Target(message) => Error::Usage(UsageError::new(format!(
                "parser stopped after target error: {message}"
            ))),
        }
    }
}

/// Tracks the source location while walking forward through a buffer.
struct Cursor {
    location: SourceLocation,
    pos: usize,
}

impl Cursor {
    fn at(&mut self, buffer: &str, pos: usize) -> SourceLocation {
        if pos > self.pos {
            let skipped = &buffer[self.pos..pos];
            for ch in skipped.chars() {
                if ch == '\n' {
                    self.location.line += 1;
                    self.location.column = 1;
                } else {
                    self.location.column += 1;
                }
            }
            self.location.byte_offset += skipped.len();
            self.pos = pos;
        }
        self.location
    }
}

/// A push parser that reports document structure to an [`XmlTarget`].
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::{TreeBuilder, XmlParser};
///
/// let mut parser = XmlParser::new(TreeBuilder::new());
/// parser.feed(b"<root><chi").unwrap();
/// parser.feed(b"ld>Hello</child></root>").unwrap();
/// let root = parser.close().unwrap();
///
/// let doc = parser.into_target().into_document();
/// assert_eq!(doc.tag(root), Some("root"));
/// assert_eq!(doc.text_content(root), "Hello");
/// ```
pub struct XmlParser<T: XmlTarget> {
    target: T,
    decoder: StreamDecoder,
    /// Decoded, line-end normalized text not yet consumed.
    buffer: String,
    /// A trailing `\r` held back in case the next chunk starts with `\n`.
    pending_cr: bool,
    namespaces: NamespaceScope,
    open: Vec<OpenElement>,
    root_seen: bool,
    /// Location of the first byte of `buffer`.
    location: SourceLocation,
    state: State,
}

impl<T: XmlTarget> XmlParser<T> {
    /// Creates a parser that detects the input encoding itself.
    #[must_use]
    pub fn new(target: T) -> Self {
        Self::with_decoder(target, StreamDecoder::new())
    }

    /// Creates a parser that decodes its input with the encoding named by
    /// `encoding`, overriding any BOM or XML declaration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the encoding label is unknown.
    pub fn with_encoding(target: T, encoding: &str) -> Result<Self, Error> {
        let decoder =
            StreamDecoder::with_encoding(encoding).map_err(|e| Error::Config(e.message))?;
        Ok(Self::with_decoder(target, decoder))
    }

    fn with_decoder(target: T, decoder: StreamDecoder) -> Self {
        Self {
            target,
            decoder,
            buffer: String::new(),
            pending_cr: false,
            namespaces: NamespaceScope::new(),
            open: Vec::new(),
            root_seen: false,
            location: SourceLocation {
                line: 1,
                column: 1,
                byte_offset: 0,
            },
            state: State::Feeding,
        }
    }

    /// Returns the target.
    #[must_use]
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Returns the target mutably.
    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// Consumes the parser, returning the target.
    pub fn into_target(self) -> T {
        self.target
    }

    /// Location of the first unconsumed character.
    #[must_use]
    pub fn position(&self) -> SourceLocation {
        self.location
    }

    /// Feeds a chunk of encoded input. The chunk may end anywhere, even
    /// inside a character, a tag or an entity reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed input, any error raised by the
    /// target, or [`Error::Usage`] once the parser is closed. After an error
    /// every later call fails with the same error.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.ensure_feeding()?;
        tracing::trace!(bytes = data.len(), "feed");
        let result = self
            .decode(data, false)
            .and_then(|()| self.parse_buffer(false));
        self.record(result)
    }

    /// Feeds already decoded text. Any encoding declaration in it is
    /// ignored.
    ///
    /// # Errors
    ///
    /// As for [`feed`](Self::feed).
    pub fn feed_str(&mut self, text: &str) -> Result<(), Error> {
        self.ensure_feeding()?;
        let text = if self.location.byte_offset == 0 && self.buffer.is_empty() {
            text.strip_prefix('\u{FEFF}').unwrap_or(text)
        } else {
            text
        };
        self.push_text(text, false);
        let result = self.parse_buffer(false);
        self.record(result)
    }

    /// Finishes the input and returns the target's result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the document is incomplete or has no root
    /// element, or any error raised by the target.
    pub fn close(&mut self) -> Result<T::Output, Error> {
        self.ensure_feeding()?;
        let result = self.finish();
        let output = self.record(result)?;
        self.state = State::Closed;
        tracing::debug!(bytes = self.location.byte_offset, "parser closed");
        Ok(output)
    }

    fn finish(&mut self) -> Result<T::Output, Error> {
        self.decode(&[], true)?;
        self.parse_buffer(true)?;
        if !self.open.is_empty() || !self.root_seen {
            return Err(self.error_at(self.location, "no element found"));
        }
        self.target.close()
    }

    fn ensure_feeding(&self) -> Result<(), Error> {
        match &self.state {
            State::Feeding => Ok(()),
            State::Failed(failure) => Err(failure.to_error()),
            State::Closed => Err(UsageError::new("parser is closed").into()),
        }
    }

    /// Poisons the parser on error.
    fn record<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if let Err(e) = &result {
            let failure = match e {
                Error::Parse(parse) => Failure::Parse(parse.clone()),
                other => Failure::Target(other.to_string()),
            };
            self.state = State::Failed(failure);
        }
        result
    }

    fn error_at(&self, location: SourceLocation, message: impl Into<String>) -> Error {
        Error::Parse(ParseError::new(message, location))
    }

    fn decode(&mut self, data: &[u8], last: bool) -> Result<(), Error> {
        let text = self
            .decoder
            .decode(data, last)
            .map_err(|e| self.error_at(self.location, e.message))?;
        self.push_text(&text, last);
        Ok(())
    }

    /// Appends decoded text, turning CRLF and lone CR into LF.
    fn push_text(&mut self, text: &str, last: bool) {
        let mut text = Cow::Borrowed(text);
        if self.pending_cr {
            self.pending_cr = false;
            text = Cow::Owned(format!("\r{text}"));
        }
        if !last && text.ends_with('\r') {
            self.pending_cr = true;
            let mut owned = text.into_owned();
            owned.pop();
            text = Cow::Owned(owned);
        }
        if text.contains('\r') {
            self.buffer
                .push_str(&text.replace("\r\n", "\n").replace('\r', "\n"));
        } else {
            self.buffer.push_str(&text);
        }
    }

    fn parse_buffer(&mut self, last: bool) -> Result<(), Error> {
        let buffer = std::mem::take(&mut self.buffer);
        let mut cursor = Cursor {
            location: self.location,
            pos: 0,
        };
        let consumed = self.parse_events(&buffer, last, &mut cursor)?;
        self.location = cursor.at(&buffer, consumed);
        self.buffer = buffer[consumed..].to_string();
        Ok(())
    }

    /// Reads events from `buffer`, returning how many bytes were consumed.
    fn parse_events(
        &mut self,
        buffer: &str,
        last: bool,
        cursor: &mut Cursor,
    ) -> Result<usize, Error> {
        let mut reader = Reader::from_str(buffer);
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.expand_empty_elements = true;
        config.check_comments = true;

        loop {
            let before = position(reader.buffer_position());
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    if !last && may_be_incomplete(&buffer[before..]) {
                        return Ok(before);
                    }
                    let location = cursor.at(buffer, before);
                    return Err(self.error_at(location, e.to_string()));
                }
            };
            let after = position(reader.buffer_position());
            let location = cursor.at(buffer, before);

            match event {
                Event::Start(start) => self.on_start(&start, location)?,
                Event::End(end) => {
                    let qname = end.name();
                    self.on_end(utf8(qname.as_ref()), location)?;
                }
                Event::Empty(start) => {
                    // expand_empty_elements is set, but stay correct without it
                    self.on_start(&start, location)?;
                    let qname = start.name();
                    self.on_end(utf8(qname.as_ref()), location)?;
                }
                Event::Text(_) => {
                    let raw = &buffer[before..after];
                    if !last && after == buffer.len() {
                        let keep = safe_text_split(raw);
                        self.on_text(&raw[..keep], location)?;
                        return Ok(before + keep);
                    }
                    self.on_text(raw, location)?;
                }
                Event::CData(cdata) => {
                    let text = utf8(&cdata);
                    if self.open.is_empty() {
                        return Err(self.error_at(location, self.outside_root_message()));
                    }
                    self.target.data(text)?;
                }
                Event::Comment(comment) => self.target.comment(utf8(&comment))?,
                Event::PI(pi) => {
                    let content = utf8(&pi);
                    let (target, data) = match content.find(is_xml_space) {
                        Some(split) => (
                            &content[..split],
                            content[split..].trim_start_matches(is_xml_space),
                        ),
                        None => (content, ""),
                    };
                    self.target.pi(target, data)?;
                }
                Event::Decl(_) => {
                    if location.byte_offset > 0 {
                        return Err(self.error_at(
                            location,
                            "XML or text declaration not at start of entity",
                        ));
                    }
                }
                Event::DocType(_) => {}
                Event::Eof => return Ok(buffer.len()),
            }
        }
    }

    fn outside_root_message(&self) -> &'static str {
        if self.root_seen {
            "junk after document element"
        } else {
            "syntax error"
        }
    }

    fn on_text(&mut self, raw: &str, location: SourceLocation) -> Result<(), Error> {
        if raw.is_empty() {
            return Ok(());
        }
        if self.open.is_empty() {
            if raw.chars().all(is_xml_space) {
                return Ok(());
            }
            return Err(self.error_at(location, self.outside_root_message()));
        }
        let text = quick_xml::escape::unescape(raw)
            .map_err(|e| self.error_at(location, format!("undefined entity: {e}")))?;
        self.target.data(&text)
    }

    fn on_start(&mut self, start: &BytesStart<'_>, location: SourceLocation) -> Result<(), Error> {
        if self.open.is_empty() && self.root_seen {
            return Err(self.error_at(location, "junk after document element"));
        }
        let raw_name = utf8(start.name().as_ref()).to_string();

        let mut raw_attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.error_at(location, e.to_string()))?;
            let key = utf8(attr.key.as_ref()).to_string();
            // literal whitespace is normalized, character references are not
            let normalized = utf8(&attr.value).replace(['\t', '\n', '\r'], " ");
            let value = quick_xml::escape::unescape(&normalized)
                .map_err(|e| self.error_at(location, format!("undefined entity: {e}")))?
                .into_owned();
            raw_attrs.push((key, value));
        }

        self.namespaces.enter();
        let mut declared = Vec::new();
        for (key, value) in &raw_attrs {
            if key == "xmlns" {
                self.namespaces.declare(None, value);
                declared.push((String::new(), value.clone()));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                self.namespaces.declare(Some(prefix), value);
                declared.push((prefix.to_string(), value.clone()));
            }
        }

        let unbound = |prefix: &str| format!("unbound prefix '{prefix}'");
        let tag = self
            .namespaces
            .expand(&raw_name, false)
            .map_err(|prefix| self.error_at(location, unbound(prefix)))?;
        let mut attrs = Vec::with_capacity(raw_attrs.len());
        for (key, value) in raw_attrs {
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let name = self
                .namespaces
                .expand(&key, true)
                .map_err(|prefix| self.error_at(location, unbound(prefix)))?;
            if attrs.iter().any(|(existing, _)| *existing == name) {
                return Err(self.error_at(location, "duplicate attribute"));
            }
            attrs.push((name, value));
        }

        for (prefix, uri) in &declared {
            self.target.start_ns(prefix, uri)?;
        }
        self.target.start(&tag, &attrs)?;
        self.root_seen = true;
        self.open.push(OpenElement {
            raw: raw_name,
            tag,
            declared: declared.into_iter().map(|(prefix, _)| prefix).collect(),
        });
        Ok(())
    }

    fn on_end(&mut self, raw_name: &str, location: SourceLocation) -> Result<(), Error> {
        match self.open.last() {
            Some(open) if open.raw == raw_name => {}
            _ => return Err(self.error_at(location, "mismatched tag")),
        }
        let Some(open) = self.open.pop() else {
            return Err(self.error_at(location, "mismatched tag"));
        };
        self.target.end(&open.tag)?;
        for prefix in open.declared.iter().rev() {
            self.target.end_ns(prefix)?;
        }
        self.namespaces.leave();
        Ok(())
    }
}

fn position<P>(pos: P) -> usize
where
    usize: TryFrom<P>,
{
    usize::try_from(pos).unwrap_or(usize::MAX)
}

/// Slices of the buffer are valid UTF-8 because the buffer is a `str` and
/// `quick-xml` only splits at ASCII delimiters.
fn utf8(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap_or_default()
}

fn is_xml_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// Length of the prefix of trailing text that can be delivered before more
/// input arrives: everything except an unterminated entity reference.
fn safe_text_split(raw: &str) -> usize {
    match raw.rfind('&') {
        Some(amp) if !raw[amp..].contains(';') => amp,
        _ => raw.len(),
    }
}

/// Whether `rest`, which failed to tokenize, could still become valid markup
/// once more input arrives.
fn may_be_incomplete(rest: &str) -> bool {
    const OPENERS: [&str; 3] = ["<!--", "<![CDATA[", "<!DOCTYPE"];
    if OPENERS
        .iter()
        .any(|opener| rest.len() < opener.len() && opener.starts_with(rest))
    {
        return true;
    }
    if rest.starts_with("<!--") {
        return !rest.contains("-->");
    }
    if rest.starts_with("<![CDATA[") {
        return !rest.contains("]]>");
    }
    if rest.starts_with("<?") {
        return !rest.contains("?>");
    }
    if rest.starts_with("<!DOCTYPE") {
        return match rest.rfind(']') {
            Some(close) if rest.contains('[') => !rest[close..].contains('>'),
            _ => !rest.contains('>'),
        };
    }
    if rest.starts_with('<') {
        return !has_unquoted_gt(rest);
    }
    false
}

/// Whether `tag` contains a `>` outside attribute-value quotes.
fn has_unquoted_gt(tag: &str) -> bool {
    let mut quote = None;
    for c in tag.chars() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, '>') => return true,
            _ => {}
        }
    }
    false
}
