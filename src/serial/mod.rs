//! Serialization of element trees.
//!
//! [`tostring`], [`tobytes`], [`write`] and [`write_file`] turn a subtree
//! into XML, HTML or plain text according to [`WriteOptions`]. Namespaced
//! names are written with prefixes chosen by a single pass over the subtree
//! (see [`NamespaceRegistry`]); all declarations go on the outermost element.
//! [`indent`] pretty-prints a tree in place, and [`c14n`] produces Canonical
//! XML 2.0.

pub mod c14n;
mod html;
mod indent;
mod xml;

pub use indent::indent;

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use parking_lot::RwLock;

use crate::encoding::{encode_output, is_ascii_label, is_utf8_label};
use crate::error::{Error, NamespaceError, SerializationError};
use crate::tree::{Document, NodeId};
use crate::util::qname::XML_NAMESPACE;

/// Prefixes the serializer uses for well-known namespaces unless told
/// otherwise.
const WELL_KNOWN: [(&str, &str); 7] = [
    (XML_NAMESPACE, "xml"),
    ("http://www.w3.org/1999/xhtml", "html"),
    ("http://www.w3.org/1999/02/22-rdf-syntax-ns#", "rdf"),
    ("http://schemas.xmlsoap.org/wsdl/", "wsdl"),
    ("http://www.w3.org/2001/XMLSchema", "xs"),
    ("http://www.w3.org/2001/XMLSchema-instance", "xsi"),
    ("http://purl.org/dc/elements/1.1/", "dc"),
];

static GLOBAL_REGISTRY: LazyLock<RwLock<NamespaceRegistry>> =
    LazyLock::new(|| RwLock::new(NamespaceRegistry::well_known()));

/// Preferred prefixes for namespace URIs.
///
/// The serializer uses the registered prefix for a URI before inventing
/// `ns0`, `ns1`, ...; the canonicalizer resolves unprefixed input names
/// against it. A process-wide instance backs [`register_namespace`]; a
/// registry passed in [`WriteOptions`] or [`c14n::C14nOptions`] replaces it
/// for that call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRegistry {
    /// uri -> prefix
    prefixes: HashMap<String, String>,
}

impl NamespaceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefixes: HashMap::new(),
        }
    }

    /// Creates a registry holding the prefixes `xml`, `html`, `rdf`, `wsdl`,
    /// `xs`, `xsi` and `dc`.
    #[must_use]
    pub fn well_known() -> Self {
        Self {
            prefixes: WELL_KNOWN
                .iter()
                .map(|(uri, prefix)| ((*uri).to_string(), (*prefix).to_string()))
                .collect(),
        }
    }

    /// A snapshot of the process-wide registry.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_REGISTRY.read().clone()
    }

    /// Maps `uri` to `prefix`, dropping any earlier mapping of either.
    ///
    /// # Errors
    ///
    /// Returns [`NamespaceError`] for prefixes of the form `ns<digits>`,
    /// which the serializer generates itself.
    pub fn register(&mut self, prefix: &str, uri: &str) -> Result<(), NamespaceError> {
        if is_generated_prefix(prefix) {
            return Err(NamespaceError::new(format!(
                "prefix format reserved for internal use: {prefix}"
            )));
        }
        self.prefixes.retain(|u, p| u != uri && p != prefix);
        self.prefixes.insert(uri.to_string(), prefix.to_string());
        Ok(())
    }

    /// The prefix registered for `uri`.
    #[must_use]
    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.prefixes.get(uri).map(String::as_str)
    }

    /// `(uri, prefix)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefixes.iter().map(|(u, p)| (u.as_str(), p.as_str()))
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::well_known()
    }
}

fn is_generated_prefix(prefix: &str) -> bool {
    prefix
        .strip_prefix("ns")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Registers `prefix` for `uri` in the process-wide registry.
///
/// # Errors
///
/// Returns [`NamespaceError`] for reserved `ns<digits>` prefixes.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::fromstring;
/// use etree_oxide::serial::{register_namespace, tostring, WriteOptions};
///
/// register_namespace("atom", "http://www.w3.org/2005/Atom").unwrap();
/// let doc = fromstring(r#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#).unwrap();
/// let xml = tostring(&doc, doc.root().unwrap(), &WriteOptions::default()).unwrap();
/// assert_eq!(xml, r#"<atom:feed xmlns:atom="http://www.w3.org/2005/Atom"/>"#);
/// ```
pub fn register_namespace(prefix: &str, uri: &str) -> Result<(), NamespaceError> {
    GLOBAL_REGISTRY.write().register(prefix, uri)
}

/// Output method of the serializer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Method {
    /// Well-formed XML.
    #[default]
    Xml,
    /// HTML: void elements without end tags, raw `script`/`style` text.
    Html,
    /// Concatenated character data only.
    Text,
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xml" => Ok(Self::Xml),
            "html" => Ok(Self::Html),
            "text" => Ok(Self::Text),
            other => Err(Error::Config(format!("unknown method {other:?}"))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Text => "text",
        })
    }
}

/// Options controlling serialization.
///
/// ```
/// use etree_oxide::serial::{Method, WriteOptions};
///
/// let opts = WriteOptions::default()
///     .method(Method::Html)
///     .encoding("utf-8")
///     .short_empty_elements(false);
/// assert_eq!(opts.encoding.as_deref(), Some("utf-8"));
/// ```
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Output method. Defaults to XML.
    pub method: Method,
    /// Output encoding label. `None` writes `us-ascii` bytes from
    /// [`tobytes`] and [`write`]; `"unicode"` means text.
    pub encoding: Option<String>,
    /// Force (`Some(true)`) or suppress (`Some(false)`) the XML declaration.
    /// With `None` it is written for encodings other than UTF-8, US-ASCII
    /// and `unicode`.
    pub xml_declaration: Option<bool>,
    /// Namespace written as the default namespace instead of with a prefix.
    pub default_namespace: Option<String>,
    /// Write elements without content as `<tag/>`. Defaults to `true`.
    pub short_empty_elements: bool,
    /// Prefix registry; `None` uses the process-wide one.
    pub registry: Option<NamespaceRegistry>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            method: Method::Xml,
            encoding: None,
            xml_declaration: None,
            default_namespace: None,
            short_empty_elements: true,
            registry: None,
        }
    }
}

impl WriteOptions {
    /// Sets the output method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the output encoding label.
    #[must_use]
    pub fn encoding(mut self, label: &str) -> Self {
        self.encoding = Some(label.to_string());
        self
    }

    /// Forces or suppresses the XML declaration.
    #[must_use]
    pub fn xml_declaration(mut self, yes: bool) -> Self {
        self.xml_declaration = Some(yes);
        self
    }

    /// Sets the namespace written without a prefix.
    #[must_use]
    pub fn default_namespace(mut self, uri: &str) -> Self {
        self.default_namespace = Some(uri.to_string());
        self
    }

    /// Sets whether empty elements are self-closed.
    #[must_use]
    pub fn short_empty_elements(mut self, yes: bool) -> Self {
        self.short_empty_elements = yes;
        self
    }

    /// Uses `registry` instead of the process-wide registry.
    #[must_use]
    pub fn registry(mut self, registry: NamespaceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn wants_declaration(&self, label: &str) -> bool {
        if self.method != Method::Xml {
            return false;
        }
        self.xml_declaration.unwrap_or_else(|| {
            !(label.eq_ignore_ascii_case("unicode") || is_utf8_label(label) || is_ascii_label(label))
        })
    }
}

/// Serializes the subtree at `node`, including its tail, to a string.
///
/// With `encoding` unset or `"unicode"` no declaration is written unless
/// forced; another label only affects the declaration, the result is always
/// text.
///
/// # Errors
///
/// Returns [`NamespaceError`] when `default_namespace` is set and the tree
/// holds names without a namespace, or [`SerializationError`] for a
/// malformed name.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::fromstring;
/// use etree_oxide::serial::{tostring, Method, WriteOptions};
///
/// let doc = fromstring("<a>1<b>2</b>3</a>").unwrap();
/// let root = doc.root().unwrap();
/// let text = tostring(&doc, root, &WriteOptions::default().method(Method::Text)).unwrap();
/// assert_eq!(text, "123");
/// ```
pub fn tostring(doc: &Document, node: NodeId, options: &WriteOptions) -> Result<String, Error> {
    let label = options.encoding.as_deref().unwrap_or("unicode");
    render(doc, node, options, label)
}

/// Serializes the subtree at `node` to bytes in the configured encoding,
/// `us-ascii` by default. Characters the encoding cannot represent are
/// written as character references.
///
/// # Errors
///
/// As for [`tostring`], plus [`SerializationError`] for an unknown
/// encoding label.
pub fn tobytes(doc: &Document, node: NodeId, options: &WriteOptions) -> Result<Vec<u8>, Error> {
    let label = options.encoding.as_deref().unwrap_or("us-ascii");
    let text = render(doc, node, options, label)?;
    if label.eq_ignore_ascii_case("unicode") {
        return Ok(text.into_bytes());
    }
    encode_output(&text, label).map_err(|e| SerializationError::new(e.message).into())
}

/// Serializes the subtree at `node` into `sink`, as [`tobytes`] does.
///
/// # Errors
///
/// As for [`tobytes`], plus [`Error::Io`] if writing fails.
pub fn write<W: Write>(
    doc: &Document,
    node: NodeId,
    mut sink: W,
    options: &WriteOptions,
) -> Result<(), Error> {
    let bytes = tobytes(doc, node, options)?;
    sink.write_all(&bytes)?;
    Ok(())
}

/// Serializes the subtree at `node` into the file at `path`.
///
/// # Errors
///
/// As for [`write`].
pub fn write_file(
    doc: &Document,
    node: NodeId,
    path: impl AsRef<Path>,
    options: &WriteOptions,
) -> Result<(), Error> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), method = %options.method, "writing file");
    write(doc, node, File::create(path)?, options)
}

fn render(
    doc: &Document,
    node: NodeId,
    options: &WriteOptions,
    label: &str,
) -> Result<String, Error> {
    let mut out = String::new();
    if options.wants_declaration(label) {
        let declared = if label.eq_ignore_ascii_case("unicode") {
            "utf-8"
        } else {
            label
        };
        out.push_str(&format!("<?xml version='1.0' encoding='{declared}'?>\n"));
    }
    if options.method == Method::Text {
        xml::write_text(doc, node, &mut out);
        return Ok(out);
    }

    let names = qname_table(doc, node, options)?;
    match options.method {
        Method::Html => html::write_html(doc, node, &names, &mut out),
        _ => xml::write_xml(doc, node, &names, options.short_empty_elements, true, &mut out),
    }
    Ok(out)
}

/// Serializes the subtree at `node` as XML without declaration or tail, so
/// the result parses as a document of its own.
pub(crate) fn element_to_string(
    doc: &Document,
    node: NodeId,
    options: &WriteOptions,
) -> Result<String, Error> {
    let names = qname_table(doc, node, options)?;
    let mut out = String::new();
    xml::write_xml(doc, node, &names, options.short_empty_elements, false, &mut out);
    Ok(out)
}

fn qname_table(
    doc: &Document,
    node: NodeId,
    options: &WriteOptions,
) -> Result<xml::QNameTable, Error> {
    let default_namespace = options.default_namespace.as_deref();
    match &options.registry {
        Some(registry) => xml::QNameTable::build(doc, node, default_namespace, registry),
        None => xml::QNameTable::build(doc, node, default_namespace, &NamespaceRegistry::global()),
    }
}
