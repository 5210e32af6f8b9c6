//! Pull-style parsing: feed bytes in, read events out.
//!
//! [`XmlPullParser`] builds a tree like [`TreeBuilder`] while queueing the
//! events the caller asked for. Nothing blocks: `feed` runs the tokenizer
//! over whatever input is available and [`XmlPullParser::read_events`]
//! drains the queue. [`iterparse`] drives the same machinery from a reader,
//! pulling one chunk at a time only when the queue runs dry.
//!
//! # Examples
//!
//! ```
//! use etree_oxide::parser::{PullEvent, XmlPullParser};
//!
//! let mut parser = XmlPullParser::new(Some(&["start", "end"])).unwrap();
//! parser.feed(b"<root><chi").unwrap();
//! let events: Vec<_> = parser.read_events().collect::<Result<_, _>>().unwrap();
//! assert_eq!(events.len(), 1);
//!
//! parser.feed(b"ld/></root>").unwrap();
//! parser.close().unwrap();
//! let names: Vec<_> = parser.read_events().map(|e| e.unwrap().name()).collect();
//! assert_eq!(names, ["start", "end", "end"]);
//! ```

use std::collections::VecDeque;
use std::io::Read;
use std::str::FromStr;

use crate::error::{Error, UsageError};
use crate::tree::{Document, NodeId};

use super::builder::{TreeBuilder, TreeBuilderOptions};
use super::xml::XmlParser;
use super::XmlTarget;

/// Size of the chunks [`iterparse`] reads from its source.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// The kinds of event a pull parser can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `start`
    Start,
    /// `end`
    End,
    /// `start-ns`
    StartNs,
    /// `end-ns`
    EndNs,
    /// `comment`
    Comment,
    /// `pi`
    Pi,
}

impl EventKind {
    /// The event's name as accepted by [`FromStr`].
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::StartNs => "start-ns",
            Self::EndNs => "end-ns",
            Self::Comment => "comment",
            Self::Pi => "pi",
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "start" => Self::Start,
            "end" => Self::End,
            "start-ns" => Self::StartNs,
            "end-ns" => Self::EndNs,
            "comment" => Self::Comment,
            "pi" => Self::Pi,
            other => return Err(Error::Config(format!("unknown event {other:?}"))),
        })
    }
}

/// An event reported by [`XmlPullParser`].
///
/// Node ids refer to the parser's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullEvent {
    /// An element was opened. Its text and children are not complete yet.
    Start(NodeId),
    /// An element was closed and is complete.
    End(NodeId),
    /// A namespace declaration came into scope.
    StartNs {
        /// Declared prefix, empty for the default namespace.
        prefix: String,
        /// Namespace URI.
        uri: String,
    },
    /// The namespace declaration with this prefix went out of scope.
    EndNs(String),
    /// A comment, attached to the tree only if the builder inserts comments.
    Comment(NodeId),
    /// A processing instruction.
    Pi(NodeId),
}

impl PullEvent {
    /// The kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Start(_) => EventKind::Start,
            Self::End(_) => EventKind::End,
            Self::StartNs { .. } => EventKind::StartNs,
            Self::EndNs(_) => EventKind::EndNs,
            Self::Comment(_) => EventKind::Comment,
            Self::Pi(_) => EventKind::Pi,
        }
    }

    /// The event's name: `start`, `end`, `start-ns`, `end-ns`, `comment` or
    /// `pi`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Target that builds the tree and queues the requested events.
struct EventCollector {
    builder: TreeBuilder,
    wanted: Vec<EventKind>,
    queue: VecDeque<Result<PullEvent, Error>>,
}

impl EventCollector {
    fn push(&mut self, event: PullEvent) {
        if self.wanted.contains(&event.kind()) {
            self.queue.push_back(Ok(event));
        }
    }
}

impl XmlTarget for EventCollector {
    type Output = NodeId;

    fn start(&mut self, tag: &str, attrs: &[(String, String)]) -> Result<(), Error> {
        let id = self.builder.handle_start(tag, attrs)?;
        self.push(PullEvent::Start(id));
        Ok(())
    }

    fn end(&mut self, tag: &str) -> Result<(), Error> {
        let id = self.builder.handle_end(tag)?;
        self.push(PullEvent::End(id));
        Ok(())
    }

    fn data(&mut self, text: &str) -> Result<(), Error> {
        self.builder.data(text)
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        let id = self.builder.handle_comment(text);
        self.push(PullEvent::Comment(id));
        Ok(())
    }

    fn pi(&mut self, target: &str, data: &str) -> Result<(), Error> {
        let id = self.builder.handle_pi(target, data);
        self.push(PullEvent::Pi(id));
        Ok(())
    }

    fn start_ns(&mut self, prefix: &str, uri: &str) -> Result<(), Error> {
        self.push(PullEvent::StartNs {
            prefix: prefix.to_string(),
            uri: uri.to_string(),
        });
        Ok(())
    }

    fn end_ns(&mut self, prefix: &str) -> Result<(), Error> {
        self.push(PullEvent::EndNs(prefix.to_string()));
        Ok(())
    }

    fn close(&mut self) -> Result<NodeId, Error> {
        self.builder.close()
    }
}

/// A non-blocking parser that reports events while building a tree.
pub struct XmlPullParser {
    parser: XmlParser<EventCollector>,
    root: Option<NodeId>,
    closed: bool,
}

impl XmlPullParser {
    /// Creates a parser that queues the named events.
    ///
    /// `None` reports `end` events only. Valid names are `start`, `end`,
    /// `start-ns`, `end-ns`, `comment` and `pi`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown event name.
    pub fn new(events: Option<&[&str]>) -> Result<Self, Error> {
        Self::with_options(events, TreeBuilderOptions::default())
    }

    /// Creates a parser whose tree builder uses `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown event name.
    pub fn with_options(
        events: Option<&[&str]>,
        options: TreeBuilderOptions,
    ) -> Result<Self, Error> {
        let wanted = match events {
            Some(names) => names
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<EventKind>, Error>>()?,
            None => vec![EventKind::End],
        };
        let collector = EventCollector {
            builder: TreeBuilder::with_options(options),
            wanted,
            queue: VecDeque::new(),
        };
        Ok(Self {
            parser: XmlParser::new(collector),
            root: None,
            closed: false,
        })
    }

    /// Feeds a chunk of input.
    ///
    /// Parse errors do not fail this call; they are queued and returned by
    /// [`read_events`](Self::read_events). Once the input is malformed every
    /// later call queues the same error again.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError`] after [`close`](Self::close).
    pub fn feed(&mut self, data: &[u8]) -> Result<(), UsageError> {
        if self.closed {
            return Err(UsageError::new("feed() called after end of stream"));
        }
        if let Err(e) = self.parser.feed(data) {
            self.parser.target_mut().queue.push_back(Err(e));
        }
        Ok(())
    }

    /// Finishes parsing and returns the root element. Events produced by the
    /// remaining input are still available from `read_events`.
    ///
    /// # Errors
    ///
    /// Returns the parse error if the document is malformed or incomplete,
    /// or [`UsageError`] if the parser was already closed.
    pub fn close(&mut self) -> Result<NodeId, Error> {
        if self.closed {
            return Err(UsageError::new("parser is already closed").into());
        }
        self.closed = true;
        let root = self.parser.close()?;
        self.root = Some(root);
        Ok(root)
    }

    /// Drains the events queued so far. The iterator is lazy: events queued
    /// by later `feed` calls are returned by a later `read_events`.
    pub fn read_events(&mut self) -> ReadEvents<'_> {
        ReadEvents {
            queue: &mut self.parser.target_mut().queue,
        }
    }

    /// The root element once parsing is closed.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// The document under construction.
    #[must_use]
    pub fn document(&self) -> &Document {
        self.parser.target().builder.document()
    }

    /// Consumes the parser, returning the document.
    pub fn into_document(self) -> Document {
        self.parser.into_target().builder.into_document()
    }

    fn pop_event(&mut self) -> Option<Result<PullEvent, Error>> {
        self.parser.target_mut().queue.pop_front()
    }

    fn clear_queue(&mut self) {
        self.parser.target_mut().queue.clear();
    }
}

impl std::fmt::Debug for XmlPullParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let collector = self.parser.target();
        f.debug_struct("XmlPullParser")
            .field("wanted", &collector.wanted)
            .field("queued", &collector.queue.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Iterator returned by [`XmlPullParser::read_events`].
pub struct ReadEvents<'a> {
    queue: &'a mut VecDeque<Result<PullEvent, Error>>,
}

impl Iterator for ReadEvents<'_> {
    type Item = Result<PullEvent, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.pop_front()
    }
}

/// Parses `source` incrementally, yielding events as they become available.
///
/// `events` is as for [`XmlPullParser::new`]. The source is read in
/// [`CHUNK_SIZE`] chunks, and only once all events from the previous chunk
/// have been consumed.
///
/// # Errors
///
/// Returns [`Error::Config`] for an unknown event name. Parse and I/O errors
/// are yielded by the iterator, which then stops.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::{iterparse, PullEvent};
///
/// let xml = b"<list><item>1</item><item>2</item></list>";
/// let mut events = iterparse(&xml[..], None).unwrap();
/// let mut texts = Vec::new();
/// while let Some(event) = events.next() {
///     if let PullEvent::End(id) = event.unwrap() {
///         let doc = events.document();
///         if doc.tag(id) == Some("item") {
///             texts.push(doc.text_content(id));
///         }
///     }
/// }
/// assert_eq!(texts, ["1", "2"]);
/// assert!(events.root().is_some());
/// ```
pub fn iterparse<R: Read>(source: R, events: Option<&[&str]>) -> Result<IterParse<R>, Error> {
    Ok(IterParse {
        source,
        parser: XmlPullParser::new(events)?,
        done: false,
    })
}

/// Iterator returned by [`iterparse`].
pub struct IterParse<R> {
    source: R,
    parser: XmlPullParser,
    done: bool,
}

impl<R> IterParse<R> {
    /// The document being built.
    #[must_use]
    pub fn document(&self) -> &Document {
        self.parser.document()
    }

    /// The root element, available once the source is exhausted.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.parser.root()
    }

    /// Consumes the iterator, returning the document built so far.
    pub fn into_document(self) -> Document {
        self.parser.into_document()
    }
}

impl<R: Read> Iterator for IterParse<R> {
    type Item = Result<PullEvent, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = vec![0; CHUNK_SIZE];
        loop {
            if let Some(event) = self.parser.pop_event() {
                if event.is_err() {
                    self.done = true;
                    self.parser.clear_queue();
                }
                return Some(event);
            }
            if self.done {
                return None;
            }
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    self.done = true;
                    if let Err(e) = self.parser.close() {
                        return Some(Err(e));
                    }
                }
                Ok(n) => {
                    if let Err(e) = self.parser.feed(&chunk[..n]) {
                        self.done = true;
                        return Some(Err(e.into()));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}
