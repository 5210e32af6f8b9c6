//! Canonical XML 2.0 serialization.
//!
//! Implements C14N 2.0 per <https://www.w3.org/TR/xml-c14n2/> as a parser
//! target: [`C14nWriter`] receives the callbacks of [`XmlParser`] and writes
//! canonical text as it goes, so a document is canonicalized without
//! building a tree.
//!
//! # Rules applied
//!
//! - no XML declaration, no DOCTYPE, CDATA sections become escaped text
//! - empty elements use start-end tag pairs (`<a></a>`)
//! - namespace declarations are written where a prefix is first used,
//!   sorted by prefix; attributes are sorted by namespace URI and name
//! - prefixes are kept from the input, or replaced by `n0`, `n1`, ... with
//!   `rewrite_prefixes`
//! - text escapes `&`, `<`, `>` and CR; attribute values also escape `"`,
//!   TAB, LF and CR, all as hexadecimal character references
//!
//! # Examples
//!
//! ```
//! use etree_oxide::serial::c14n::{canonicalize_str, C14nOptions};
//!
//! let out = canonicalize_str(r#"<root b="2" a="1"><child/></root>"#, &C14nOptions::default())
//!     .unwrap();
//! assert_eq!(out, r#"<root a="1" b="2"><child></child></root>"#);
//! ```

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, NamespaceError, SerializationError};
use crate::parser::{push::CHUNK_SIZE, XmlParser, XmlTarget};
use crate::tree::{Document, NodeId};
use crate::util::qname::{looks_like_prefixed_name, XML_NAMESPACE};

use super::{NamespaceRegistry, WriteOptions};

/// Options for canonicalization.
///
/// ```
/// use etree_oxide::serial::c14n::C14nOptions;
///
/// let opts = C14nOptions::default()
///     .with_comments(true)
///     .strip_text(true)
///     .exclude_tags(["secret"]);
/// assert!(opts.exclude_tags.contains("secret"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct C14nOptions {
    /// Keep comments.
    pub with_comments: bool,
    /// Trim leading and trailing whitespace of text outside `xml:space`
    /// `"preserve"` scopes.
    pub strip_text: bool,
    /// Replace every prefix with `n0`, `n1`, ... in order of first use.
    pub rewrite_prefixes: bool,
    /// Clark names of elements whose text is a prefixed name to rewrite.
    pub qname_aware_tags: HashSet<String>,
    /// Clark names of attributes whose value is a prefixed name to rewrite.
    pub qname_aware_attrs: HashSet<String>,
    /// Clark names of attributes to drop.
    pub exclude_attrs: HashSet<String>,
    /// Clark names of elements to drop together with their content.
    pub exclude_tags: HashSet<String>,
    /// Registry of prefixes that resolve without an in-document
    /// declaration; `None` uses the process-wide one. Ignored with
    /// `rewrite_prefixes`.
    pub registry: Option<NamespaceRegistry>,
}

fn to_set<I, S>(names: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

impl C14nOptions {
    /// Sets whether comments are kept.
    #[must_use]
    pub fn with_comments(mut self, yes: bool) -> Self {
        self.with_comments = yes;
        self
    }

    /// Sets whether text is trimmed.
    #[must_use]
    pub fn strip_text(mut self, yes: bool) -> Self {
        self.strip_text = yes;
        self
    }

    /// Sets whether prefixes are rewritten.
    #[must_use]
    pub fn rewrite_prefixes(mut self, yes: bool) -> Self {
        self.rewrite_prefixes = yes;
        self
    }

    /// Sets the elements whose text is a prefixed name.
    #[must_use]
    pub fn qname_aware_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.qname_aware_tags = to_set(tags);
        self
    }

    /// Sets the attributes whose value is a prefixed name.
    #[must_use]
    pub fn qname_aware_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.qname_aware_attrs = to_set(attrs);
        self
    }

    /// Sets the attributes to drop.
    #[must_use]
    pub fn exclude_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_attrs = to_set(attrs);
        self
    }

    /// Sets the elements to drop.
    #[must_use]
    pub fn exclude_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_tags = to_set(tags);
        self
    }

    /// Uses `registry` instead of the process-wide registry.
    #[must_use]
    pub fn registry(mut self, registry: NamespaceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// A resolved output name.
struct OutputName {
    /// `prefix:local`, or `local` without prefix.
    qname: String,
    local: String,
    uri: String,
}

/// A start tag held back until its text shows whether the text is a
/// prefixed name.
struct PendingStart {
    tag: String,
    attrs: Vec<(String, String)>,
}

/// Parser target writing Canonical XML 2.0 to `W`.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::XmlParser;
/// use etree_oxide::serial::c14n::{C14nOptions, C14nWriter};
///
/// let writer = C14nWriter::new(Vec::new(), C14nOptions::default());
/// let mut parser = XmlParser::new(writer);
/// parser.feed(b"<a><b/></a>").unwrap();
/// parser.close().unwrap();
/// assert_eq!(parser.into_target().into_inner(), b"<a><b></b></a>");
/// ```
pub struct C14nWriter<W: Write> {
    sink: W,
    options: C14nOptions,
    data: Vec<String>,
    /// `(uri, prefix)` pairs declared in the output, one frame per depth.
    declared_ns: Vec<Vec<(String, String)>>,
    /// `(uri, prefix)` pairs declared in the input, one frame per depth.
    input_ns: Vec<Vec<(String, String)>>,
    /// Input declarations reported for the next start tag.
    next_ns: Vec<(String, String)>,
    /// uri -> rewritten prefix.
    prefix_map: HashMap<String, String>,
    preserve_space: Vec<bool>,
    pending_start: Option<PendingStart>,
    root_seen: bool,
    root_done: bool,
    ignored_depth: usize,
}

impl<W: Write> C14nWriter<W> {
    /// Creates a writer that sends canonical output to `sink`.
    pub fn new(sink: W, options: C14nOptions) -> Self {
        let mut input_ns = Vec::new();
        if !options.rewrite_prefixes {
            let registry = options.registry.clone().unwrap_or_else(NamespaceRegistry::global);
            input_ns.push(
                registry
                    .iter()
                    .map(|(uri, prefix)| (uri.to_string(), prefix.to_string()))
                    .collect(),
            );
        }
        input_ns.push(Vec::new());
        Self {
            sink,
            options,
            data: Vec::new(),
            declared_ns: vec![vec![(XML_NAMESPACE.to_string(), "xml".to_string())]],
            input_ns,
            next_ns: Vec::new(),
            prefix_map: HashMap::new(),
            preserve_space: vec![false],
            pending_start: None,
            root_seen: false,
            root_done: false,
            ignored_depth: 0,
        }
    }

    /// Consumes the writer, returning the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn emit(&mut self, text: &str) -> Result<(), Error> {
        self.sink.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Resolves `prefix:local` text against the input declarations.
    fn resolve_prefixed(&self, prefixed: &str) -> Result<String, Error> {
        let (prefix, local) = prefixed.split_once(':').unwrap_or(("", prefixed));
        self.input_ns
            .iter()
            .rev()
            .flatten()
            .find(|(_, p)| p == prefix)
            .map(|(uri, _)| format!("{{{uri}}}{local}"))
            .ok_or_else(|| {
                NamespaceError::new(format!(
                    "prefix {prefix} of QName \"{prefixed}\" is not declared in scope"
                ))
                .into()
            })
    }

    /// Finds or declares the output prefix for a Clark name.
    fn qname(&mut self, name: &str) -> Result<OutputName, Error> {
        let (uri, local) = match name.strip_prefix('{') {
            Some(rest) => rest
                .rsplit_once('}')
                .ok_or_else(|| NamespaceError::new(format!("invalid name {name:?}")))?,
            None => ("", name),
        };
        let output = |prefix: &str| OutputName {
            qname: if prefix.is_empty() {
                local.to_string()
            } else {
                format!("{prefix}:{local}")
            },
            local: local.to_string(),
            uri: uri.to_string(),
        };

        let mut prefixes_seen = HashSet::new();
        for (u, prefix) in self.declared_ns.iter().rev().flatten() {
            if u == uri && !prefixes_seen.contains(prefix.as_str()) {
                return Ok(output(prefix));
            }
            prefixes_seen.insert(prefix.as_str());
        }
        let default_declared = prefixes_seen.contains("");

        // no default namespace in scope, so no prefix needed
        if uri.is_empty() && !default_declared {
            return Ok(output(""));
        }

        if self.options.rewrite_prefixes {
            let next = format!("n{}", self.prefix_map.len());
            let prefix = self.prefix_map.entry(uri.to_string()).or_insert(next).clone();
            self.declare(uri, &prefix);
            return Ok(output(&prefix));
        }

        let found = self
            .input_ns
            .iter()
            .rev()
            .flatten()
            .find(|(u, _)| u == uri)
            .map(|(_, prefix)| prefix.clone());
        if let Some(prefix) = found {
            self.declare(uri, &prefix);
            return Ok(output(&prefix));
        }

        if uri.is_empty() {
            return Ok(output(""));
        }
        Err(NamespaceError::new(format!("namespace \"{uri}\" is not declared in scope")).into())
    }

    fn declare(&mut self, uri: &str, prefix: &str) {
        if let Some(frame) = self.declared_ns.last_mut() {
            frame.push((uri.to_string(), prefix.to_string()));
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        let mut data = self.data.concat();
        self.data.clear();
        if self.options.strip_text && !self.preserve_space.last().copied().unwrap_or(false) {
            data = data.trim().to_string();
        }
        if let Some(pending) = self.pending_start.take() {
            let is_name = !data.is_empty() && looks_like_prefixed_name(&data);
            self.write_start(&pending.tag, pending.attrs, is_name.then_some(data.as_str()))?;
            if is_name {
                return Ok(());
            }
        }
        self.write_data(&data)
    }

    fn write_data(&mut self, data: &str) -> Result<(), Error> {
        if !data.is_empty() && self.root_seen {
            let escaped = escape_text(data);
            self.emit(&escaped)?;
        }
        Ok(())
    }

    fn flush_if_needed(&mut self) -> Result<(), Error> {
        if !self.data.is_empty() || self.pending_start.is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn write_start(
        &mut self,
        tag: &str,
        attrs: Vec<(String, String)>,
        qname_text: Option<&str>,
    ) -> Result<(), Error> {
        let mut attrs: Vec<(String, String)> = attrs
            .into_iter()
            .filter(|(key, _)| !self.options.exclude_attrs.contains(key))
            .collect();

        let mut names: Vec<String> = Vec::with_capacity(attrs.len() + 1);
        names.push(tag.to_string());
        names.extend(attrs.iter().map(|(key, _)| key.clone()));

        // prefixed text -> Clark name
        let mut resolved: HashMap<String, String> = HashMap::new();
        if let Some(text) = qname_text {
            let clark = self.resolve_prefixed(text)?;
            names.push(clark.clone());
            resolved.insert(text.to_string(), clark);
        }
        let mut qname_attrs = HashSet::new();
        for (key, value) in &attrs {
            if self.options.qname_aware_attrs.contains(key) && looks_like_prefixed_name(value) {
                let clark = self.resolve_prefixed(value)?;
                names.push(clark.clone());
                resolved.insert(value.clone(), clark);
                qname_attrs.insert(key.clone());
            }
        }

        // prefixes are assigned in order of namespace URI
        names.sort_by(|a, b| clark_sort_key(a).cmp(&clark_sort_key(b)));
        names.dedup();
        let mut parsed: HashMap<String, OutputName> = HashMap::with_capacity(names.len());
        for name in names {
            let output = self.qname(&name)?;
            parsed.insert(name, output);
        }

        let mut attr_list: Vec<(String, String)> = self
            .declared_ns
            .last()
            .map(|frame| {
                frame
                    .iter()
                    .map(|(uri, prefix)| {
                        let key = if prefix.is_empty() {
                            "xmlns".to_string()
                        } else {
                            format!("xmlns:{prefix}")
                        };
                        (key, uri.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();
        attr_list.sort();

        attrs.sort();
        let mut preserve = self.preserve_space.last().copied().unwrap_or(false);
        for (key, value) in &attrs {
            if key == XML_SPACE && !value.is_empty() {
                preserve = value == "preserve";
            }
            let value = match resolved.get(value) {
                Some(clark) if qname_attrs.contains(key) => parsed
                    .get(clark)
                    .map_or_else(|| value.clone(), |name| name.qname.clone()),
                _ => value.clone(),
            };
            let Some(name) = parsed.get(key) else {
                continue;
            };
            let key = if name.uri.is_empty() {
                name.local.clone()
            } else {
                name.qname.clone()
            };
            attr_list.push((key, value));
        }
        self.preserve_space.push(preserve);

        let mut out = String::from("<");
        if let Some(name) = parsed.get(tag) {
            out.push_str(&name.qname);
        }
        for (key, value) in &attr_list {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push('>');
        if let Some(text) = qname_text {
            let name = resolved.get(text).and_then(|clark| parsed.get(clark));
            if let Some(name) = name {
                out.push_str(&escape_text(&name.qname));
            }
        }
        self.emit(&out)?;
        self.root_seen = true;
        Ok(())
    }

    /// Newline handling shared by comments and processing instructions
    /// outside the root element.
    fn before_leaf(&mut self) -> Result<(), Error> {
        if self.root_done {
            self.emit("\n")
        } else if self.root_seen {
            self.flush_if_needed()
        } else {
            Ok(())
        }
    }

    fn after_leaf(&mut self) -> Result<(), Error> {
        if self.root_seen {
            Ok(())
        } else {
            self.emit("\n")
        }
    }
}

const XML_SPACE: &str = "{http://www.w3.org/XML/1998/namespace}space";

/// Sort key ordering Clark names by namespace URI, then local name; names
/// without namespace sort by their text.
fn clark_sort_key(name: &str) -> Vec<&str> {
    name.splitn(2, '}').collect()
}

impl<W: Write> XmlTarget for C14nWriter<W> {
    type Output = ();

    fn start(&mut self, tag: &str, attrs: &[(String, String)]) -> Result<(), Error> {
        if self.ignored_depth > 0 || self.options.exclude_tags.contains(tag) {
            self.ignored_depth += 1;
            self.next_ns.clear();
            return Ok(());
        }
        self.flush_if_needed()?;
        self.declared_ns.push(Vec::new());
        self.input_ns.push(std::mem::take(&mut self.next_ns));
        if self.options.qname_aware_tags.contains(tag) {
            self.pending_start = Some(PendingStart {
                tag: tag.to_string(),
                attrs: attrs.to_vec(),
            });
            return Ok(());
        }
        self.write_start(tag, attrs.to_vec(), None)
    }

    fn end(&mut self, tag: &str) -> Result<(), Error> {
        if self.ignored_depth > 0 {
            self.ignored_depth -= 1;
            return Ok(());
        }
        self.flush_if_needed()?;
        let name = self.qname(tag)?;
        self.emit(&format!("</{}>", name.qname))?;
        self.preserve_space.pop();
        self.root_done = self.preserve_space.len() == 1;
        self.declared_ns.pop();
        self.input_ns.pop();
        Ok(())
    }

    fn data(&mut self, text: &str) -> Result<(), Error> {
        if self.ignored_depth == 0 {
            self.data.push(text.to_string());
        }
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        if !self.options.with_comments || self.ignored_depth > 0 {
            return Ok(());
        }
        self.before_leaf()?;
        self.emit(&format!("<!--{}-->", escape_text(text)))?;
        self.after_leaf()
    }

    fn pi(&mut self, target: &str, data: &str) -> Result<(), Error> {
        if self.ignored_depth > 0 {
            return Ok(());
        }
        self.before_leaf()?;
        if data.is_empty() {
            self.emit(&format!("<?{target}?>"))?;
        } else {
            self.emit(&format!("<?{target} {}?>", escape_text(data)))?;
        }
        self.after_leaf()
    }

    fn start_ns(&mut self, prefix: &str, uri: &str) -> Result<(), Error> {
        if self.ignored_depth > 0 {
            return Ok(());
        }
        // text before the declaring element may hold a prefixed name to
        // resolve in the outer scope
        self.flush_if_needed()?;
        self.next_ns.push((uri.to_string(), prefix.to_string()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.flush_if_needed()?;
        self.sink.flush()?;
        Ok(())
    }
}

/// Escapes text content.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes attribute values.
fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Canonicalizes a document read from `source`, writing the result to
/// `sink` as it is produced. Returns the sink.
///
/// Output written before an error stays written.
///
/// # Errors
///
/// Returns [`Error::Parse`] for malformed input, [`Error::Namespace`] for a
/// name whose namespace cannot be declared, or [`Error::Io`].
pub fn canonicalize_to<R: Read, W: Write>(
    mut source: R,
    sink: W,
    options: &C14nOptions,
) -> Result<W, Error> {
    let mut parser = XmlParser::new(C14nWriter::new(sink, options.clone()));
    let mut chunk = vec![0; CHUNK_SIZE];
    loop {
        let n = match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        parser.feed(&chunk[..n])?;
    }
    parser.close()?;
    Ok(parser.into_target().into_inner())
}

/// Canonicalizes an encoded document.
///
/// # Errors
///
/// As for [`canonicalize_to`].
pub fn canonicalize_bytes(xml: &[u8], options: &C14nOptions) -> Result<String, Error> {
    into_string(canonicalize_to(xml, Vec::new(), options)?)
}

/// Canonicalizes a document held in a string. An encoding declaration in
/// it is ignored.
///
/// # Errors
///
/// As for [`canonicalize_to`].
pub fn canonicalize_str(xml: &str, options: &C14nOptions) -> Result<String, Error> {
    let mut parser = XmlParser::new(C14nWriter::new(Vec::new(), options.clone()));
    parser.feed_str(xml)?;
    parser.close()?;
    into_string(parser.into_target().into_inner())
}

/// Canonicalizes the file at `path`.
///
/// # Errors
///
/// As for [`canonicalize_to`].
pub fn canonicalize_file(path: impl AsRef<Path>, options: &C14nOptions) -> Result<String, Error> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "canonicalizing file");
    into_string(canonicalize_to(File::open(path)?, Vec::new(), options)?)
}

/// Canonicalizes the subtree at `node`, without its tail.
///
/// The subtree is serialized and parsed again, so prefixes are those the
/// serializer chooses; combine with `rewrite_prefixes` for output that does
/// not depend on them.
///
/// # Errors
///
/// As for [`canonicalize_str`], plus the serializer's errors.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::fromstring;
/// use etree_oxide::serial::c14n::{canonicalize_document, C14nOptions};
///
/// let doc = fromstring("<a><b z='1' y='2'/>tail</a>").unwrap();
/// let b = doc.children(doc.root().unwrap())[0];
/// let out = canonicalize_document(&doc, b, &C14nOptions::default()).unwrap();
/// assert_eq!(out, r#"<b y="2" z="1"></b>"#);
/// ```
pub fn canonicalize_document(
    doc: &Document,
    node: NodeId,
    options: &C14nOptions,
) -> Result<String, Error> {
    let mut write_options = WriteOptions::default();
    if let Some(registry) = &options.registry {
        write_options = write_options.registry(registry.clone());
    }
    let xml = super::element_to_string(doc, node, &write_options)?;
    canonicalize_str(&xml, options)
}

fn into_string(bytes: Vec<u8>) -> Result<String, Error> {
    String::from_utf8(bytes).map_err(|e| SerializationError::new(e.to_string()).into())
}
