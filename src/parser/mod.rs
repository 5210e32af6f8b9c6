//! XML parsing.
//!
//! The tokenizer reports document structure through the [`XmlTarget`]
//! callback trait. Two targets are provided: [`TreeBuilder`] builds a
//! [`Document`], and the canonical-XML writer in [`crate::serial::c14n`]
//! produces C14N 2.0 text directly. [`XmlParser`] is the push interface,
//! [`XmlPullParser`] and [`iterparse`] add event reporting on top of tree
//! construction.
//!
//! For the common cases use [`fromstring`] or [`parse`]:
//!
//! ```
//! use etree_oxide::parser::fromstring;
//!
//! let doc = fromstring("<root><child>Hello</child></root>").unwrap();
//! let root = doc.root().unwrap();
//! assert_eq!(doc.tag(root), Some("root"));
//! ```

mod builder;
mod namespace;
pub mod push;
mod xml;

pub use builder::{TreeBuilder, TreeBuilderOptions};
pub use push::{iterparse, EventKind, IterParse, PullEvent, ReadEvents, XmlPullParser};
pub use xml::XmlParser;

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Error;
use crate::tree::{Document, NodeId};

/// Receiver of parser callbacks.
///
/// Element and attribute names arrive in Clark notation (`{uri}local`).
/// Namespace declarations are not attributes: they are reported through
/// [`start_ns`](Self::start_ns) before the element's `start` and through
/// [`end_ns`](Self::end_ns) after its `end`. Character data may be split
/// across several [`data`](Self::data) calls.
///
/// An error returned by any callback stops the parser; it is returned from
/// the `feed` or `close` call that triggered it.
pub trait XmlTarget {
    /// Result of [`close`](Self::close).
    type Output;

    /// An element starts. `attrs` keeps document order.
    ///
    /// # Errors
    ///
    /// Any error stops parsing.
    fn start(&mut self, tag: &str, attrs: &[(String, String)]) -> Result<(), Error>;

    /// An element ends.
    ///
    /// # Errors
    ///
    /// Any error stops parsing.
    fn end(&mut self, tag: &str) -> Result<(), Error>;

    /// Character data, with entity and character references resolved.
    ///
    /// # Errors
    ///
    /// Any error stops parsing.
    fn data(&mut self, text: &str) -> Result<(), Error>;

    /// A comment. Ignored by default.
    ///
    /// # Errors
    ///
    /// Any error stops parsing.
    fn comment(&mut self, _text: &str) -> Result<(), Error> {
        Ok(())
    }

    /// A processing instruction. Ignored by default.
    ///
    /// # Errors
    ///
    /// Any error stops parsing.
    fn pi(&mut self, _target: &str, _data: &str) -> Result<(), Error> {
        Ok(())
    }

    /// A namespace declaration comes into scope; `prefix` is empty for the
    /// default namespace. Ignored by default.
    ///
    /// # Errors
    ///
    /// Any error stops parsing.
    fn start_ns(&mut self, _prefix: &str, _uri: &str) -> Result<(), Error> {
        Ok(())
    }

    /// The declaration of `prefix` goes out of scope. Ignored by default.
    ///
    /// # Errors
    ///
    /// Any error stops parsing.
    fn end_ns(&mut self, _prefix: &str) -> Result<(), Error> {
        Ok(())
    }

    /// The input is complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot produce its result.
    fn close(&mut self) -> Result<Self::Output, Error>;
}

/// Parses a complete document from a string.
///
/// An encoding declaration inside `text` is ignored.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the document is malformed.
pub fn fromstring(text: &str) -> Result<Document, Error> {
    fromstring_with(text, TreeBuilderOptions::default())
}

/// Parses a complete document from a string with the given builder options.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the document is malformed.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::{fromstring_with, TreeBuilderOptions};
///
/// let opts = TreeBuilderOptions::default().insert_comments(true);
/// let doc = fromstring_with("<a><!-- note --></a>", opts).unwrap();
/// assert_eq!(doc.len(doc.root().unwrap()), 1);
/// ```
pub fn fromstring_with(text: &str, options: TreeBuilderOptions) -> Result<Document, Error> {
    let mut parser = XmlParser::new(TreeBuilder::with_options(options));
    parser.feed_str(text)?;
    parser.close()?;
    Ok(parser.into_target().into_document())
}

/// Parses a document delivered as a sequence of encoded chunks.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the document is malformed.
pub fn fromstring_list<I>(chunks: I) -> Result<Document, Error>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut parser = XmlParser::new(TreeBuilder::new());
    for chunk in chunks {
        parser.feed(chunk.as_ref())?;
    }
    parser.close()?;
    Ok(parser.into_target().into_document())
}

/// Parses a document from any reader, in [`push::CHUNK_SIZE`] chunks.
///
/// # Errors
///
/// Returns [`Error::Io`] if reading fails or [`Error::Parse`] if the
/// document is malformed.
pub fn parse_reader<R: Read>(mut reader: R) -> Result<Document, Error> {
    let mut parser = XmlParser::new(TreeBuilder::new());
    let mut chunk = vec![0; push::CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        parser.feed(&chunk[..n])?;
    }
    parser.close()?;
    Ok(parser.into_target().into_document())
}

/// Parses the file at `path`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read or [`Error::Parse`] if
/// the document is malformed.
pub fn parse(path: impl AsRef<Path>) -> Result<Document, Error> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "parsing file");
    parse_reader(File::open(path)?)
}

/// Parses a string and indexes its elements by their `id` attribute.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the document is malformed.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::parse_with_ids;
///
/// let (doc, ids) = parse_with_ids(r#"<a><b id="x"/><c id="y"/></a>"#).unwrap();
/// assert_eq!(doc.tag(ids["y"]), Some("c"));
/// ```
pub fn parse_with_ids(text: &str) -> Result<(Document, HashMap<String, NodeId>), Error> {
    let doc = fromstring(text)?;
    let ids = doc.id_index();
    Ok((doc, ids))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fromstring_structure() {
        let doc = fromstring("<a>x<b k='v'>y</b>z<c/></a>").unwrap();
        let a = doc.root().unwrap();
        let [b, c] = doc.children(a) else {
            panic!("expected two children");
        };
        assert_eq!(doc.text(a), Some("x"));
        assert_eq!(doc.text(*b), Some("y"));
        assert_eq!(doc.tail(*b), Some("z"));
        assert_eq!(doc.get(*b, "k"), Some("v"));
        assert_eq!(doc.tag(*c), Some("c"));
        assert_eq!(doc.text(*c), None);
    }

    #[test]
    fn test_dropped_comments_and_pis_keep_surrounding_text() {
        let doc = fromstring("<a>x<!--c-->y</a>").unwrap();
        let a = doc.root().unwrap();
        assert_eq!(doc.text(a), Some("xy"));
        assert!(doc.children(a).is_empty());

        let doc = fromstring("<a><b/>x<?p d?>y</a>").unwrap();
        let b = doc.children(doc.root().unwrap())[0];
        assert_eq!(doc.tail(b), Some("xy"));
    }

    #[test]
    fn test_fromstring_ignores_declared_encoding() {
        let doc = fromstring("<?xml version='1.0' encoding='latin-1'?><a>\u{e9}</a>").unwrap();
        assert_eq!(doc.text(doc.root().unwrap()), Some("\u{e9}"));
    }

    #[test]
    fn test_fromstring_list_split_multibyte() {
        let bytes = "<a>caf\u{e9}</a>".as_bytes();
        let (head, tail) = bytes.split_at(7);
        let doc = fromstring_list([head, tail]).unwrap();
        assert_eq!(doc.text(doc.root().unwrap()), Some("caf\u{e9}"));
    }

    #[test]
    fn test_declared_encoding_is_honored_for_bytes() {
        let doc = fromstring_list([&b"<?xml version='1.0' encoding='iso-8859-1'?><a>\xE9</a>"[..]])
            .unwrap();
        assert_eq!(doc.text(doc.root().unwrap()), Some("\u{e9}"));
    }

    #[test]
    fn test_parse_reader_and_errors() {
        let doc = parse_reader(&b"<a><b/></a>"[..]).unwrap();
        assert_eq!(doc.len(doc.root().unwrap()), 1);
        let Err(Error::Parse(err)) = parse_reader(&b"<a>\n<b></a>"[..]) else {
            panic!("expected a parse error");
        };
        assert_eq!(err.position(), (2, 4));
    }

    #[test]
    fn test_parse_missing_file() {
        assert!(matches!(
            parse("/nonexistent/etree-oxide/missing.xml"),
            Err(Error::Io(_))
        ));
    }
}
