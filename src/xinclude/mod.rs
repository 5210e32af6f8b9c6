//! `XInclude` processing.
//!
//! Replaces `<xi:include>` elements (in the `http://www.w3.org/2001/XInclude`
//! namespace) with the content they reference. `parse="xml"` (the default)
//! splices in a copy of the loaded document's root element, processed
//! recursively; `parse="text"` merges the loaded text into the surrounding
//! character data.
//!
//! # Design
//!
//! Resources are fetched through a [`Loader`], so the walk itself does no
//! I/O. [`FileLoader`] reads from the file system; closures and in-memory
//! maps work as well.
//!
//! Recursion is bounded twice: an `href` already being included further up
//! the chain is a fatal error (a definite cycle), and each nested level
//! consumes one unit of the depth budget, whose exhaustion is reported as
//! [`IncludeError::RecursionLimit`].
//!
//! `<xi:fallback>` is recognized only to be rejected: fallback content is
//! never executed, and a fallback met during the walk is an error.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::encoding::transcode;
use crate::error::IncludeError;
use crate::tree::{Document, NodeId};

/// The `XInclude` namespace URI.
pub const XINCLUDE_NS: &str = "http://www.w3.org/2001/XInclude";

/// Clark name of the include element.
pub const XINCLUDE_INCLUDE: &str = "{http://www.w3.org/2001/XInclude}include";

/// Clark name of the fallback element.
pub const XINCLUDE_FALLBACK: &str = "{http://www.w3.org/2001/XInclude}fallback";

/// Default depth budget for nested includes.
pub const DEFAULT_MAX_DEPTH: i32 = 6;

/// How an included resource is interpreted, from the `parse` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Parse the resource as XML and include its root element.
    Xml,
    /// Include the resource as character data.
    Text,
}

impl ParseMode {
    /// The attribute value naming this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Text => "text",
        }
    }
}

impl FromStr for ParseMode {
    type Err = IncludeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xml" => Ok(Self::Xml),
            "text" => Ok(Self::Text),
            other => Err(IncludeError::fatal(
                format!("unknown parse type in xi:include tag ({other:?})"),
                None,
            )),
        }
    }
}

impl fmt::Display for ParseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource returned by a [`Loader`].
#[derive(Debug)]
pub enum Loaded {
    /// A parsed document, for [`ParseMode::Xml`]. Its root is included.
    Tree(Document),
    /// Decoded text, for [`ParseMode::Text`].
    Text(String),
}

/// Fetches the resource named by an include's resolved `href`.
///
/// Returning `Ok(None)` means the resource does not exist; the include then
/// fails with a "cannot load" error. Closures with the same signature are
/// loaders too:
///
/// ```
/// use etree_oxide::error::IncludeError;
/// use etree_oxide::parser::fromstring;
/// use etree_oxide::serial::{tostring, WriteOptions};
/// use etree_oxide::xinclude::{include, IncludeOptions, Loaded, ParseMode};
///
/// let mut doc = fromstring(
///     r#"<doc xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="note.txt" parse="text"/></doc>"#,
/// )
/// .unwrap();
/// let root = doc.root().unwrap();
/// let mut loader = |href: &str, _mode: ParseMode, _encoding: Option<&str>| {
///     Ok::<_, IncludeError>((href == "note.txt").then(|| Loaded::Text("hello".into())))
/// };
/// include(&mut doc, root, &mut loader, &IncludeOptions::default()).unwrap();
/// assert_eq!(tostring(&doc, root, &WriteOptions::default()).unwrap(), "<doc>hello</doc>");
/// ```
pub trait Loader {
    /// Loads `href` for `mode`. `encoding` is the include's `encoding`
    /// attribute, meaningful for text only.
    ///
    /// # Errors
    ///
    /// Returns an [`IncludeError`] if the resource exists but cannot be
    /// read or parsed.
    fn load(
        &mut self,
        href: &str,
        mode: ParseMode,
        encoding: Option<&str>,
    ) -> Result<Option<Loaded>, IncludeError>;
}

impl<F> Loader for F
where
    F: FnMut(&str, ParseMode, Option<&str>) -> Result<Option<Loaded>, IncludeError>,
{
    fn load(
        &mut self,
        href: &str,
        mode: ParseMode,
        encoding: Option<&str>,
    ) -> Result<Option<Loaded>, IncludeError> {
        self(href, mode, encoding)
    }
}

/// Loads includes from the file system, treating `href` as a path.
///
/// XML is parsed with [`crate::parser::parse`]; text is decoded with the
/// include's `encoding`, UTF-8 if absent. A missing file loads as nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl Loader for FileLoader {
    fn load(
        &mut self,
        href: &str,
        mode: ParseMode,
        encoding: Option<&str>,
    ) -> Result<Option<Loaded>, IncludeError> {
        let path = Path::new(href);
        if !path.exists() {
            tracing::debug!(href, "include target not found");
            return Ok(None);
        }
        match mode {
            ParseMode::Xml => crate::parser::parse(path)
                .map(|doc| Some(Loaded::Tree(doc)))
                .map_err(|e| IncludeError::fatal(e.to_string(), Some(href))),
            ParseMode::Text => {
                let bytes =
                    std::fs::read(path).map_err(|e| IncludeError::fatal(e.to_string(), Some(href)))?;
                transcode(&bytes, encoding.unwrap_or("utf-8"))
                    .map(|text| Some(Loaded::Text(text)))
                    .map_err(|e| IncludeError::fatal(e.message, Some(href)))
            }
        }
    }
}

/// Options for [`include`].
///
/// ```
/// use etree_oxide::xinclude::IncludeOptions;
///
/// let opts = IncludeOptions::default().base_url("docs/index.xml");
/// assert_eq!(opts.max_depth, Some(6));
/// ```
#[derive(Debug, Clone)]
pub struct IncludeOptions {
    /// Base against which top-level `href` values are resolved.
    pub base_url: Option<String>,
    /// Nested include budget; `None` disables the limit.
    pub max_depth: Option<i32>,
}

impl Default for IncludeOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            max_depth: Some(DEFAULT_MAX_DEPTH),
        }
    }
}

impl IncludeOptions {
    /// Sets the base URL.
    #[must_use]
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    /// Sets the depth budget.
    #[must_use]
    pub fn max_depth(mut self, depth: Option<i32>) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Expands the `XInclude` directives below `node`. `node` itself is never
/// replaced, only its descendants.
///
/// # Errors
///
/// Returns [`IncludeError::InvalidDepth`] for a negative budget,
/// [`IncludeError::RecursionLimit`] when the budget runs out, and
/// [`IncludeError::Fatal`] for a recursive include, a failed load, a missing
/// `href`, an unknown `parse` value or a stray `xi:fallback`. The tree may
/// be partly processed when an error is returned.
pub fn include<L: Loader + ?Sized>(
    doc: &mut Document,
    node: NodeId,
    loader: &mut L,
    options: &IncludeOptions,
) -> Result<(), IncludeError> {
    let budget = match options.max_depth {
        None => None,
        Some(depth) => {
            Some(u32::try_from(depth).map_err(|_| IncludeError::InvalidDepth(depth))?)
        }
    };
    let mut walk = Walk {
        loader,
        active: HashSet::new(),
    };
    walk.process(doc, node, options.base_url.as_deref(), budget)
}

/// [`include`] with a [`FileLoader`].
///
/// # Errors
///
/// As for [`include`].
pub fn include_files(
    doc: &mut Document,
    node: NodeId,
    options: &IncludeOptions,
) -> Result<(), IncludeError> {
    include(doc, node, &mut FileLoader, options)
}

struct Walk<'l, L: ?Sized> {
    loader: &'l mut L,
    /// hrefs being included on the current chain
    active: HashSet<String>,
}

impl<L: Loader + ?Sized> Walk<'_, L> {
    fn process(
        &mut self,
        doc: &mut Document,
        elem: NodeId,
        base_url: Option<&str>,
        budget: Option<u32>,
    ) -> Result<(), IncludeError> {
        let mut i = 0;
        while i < doc.len(elem) {
            let child = doc.children(elem)[i];
            match doc.tag(child) {
                Some(XINCLUDE_INCLUDE) => {
                    let Some(href) = doc.get(child, "href") else {
                        return Err(IncludeError::fatal("xi:include tag without href", None));
                    };
                    let href = join_url(base_url, href);
                    let mode: ParseMode = doc
                        .get(child, "parse")
                        .unwrap_or("xml")
                        .parse()
                        .map_err(|e| with_href(e, &href))?;
                    tracing::debug!(href = %href, parse = %mode, "processing include");
                    match mode {
                        ParseMode::Xml => {
                            self.include_xml(doc, elem, i, child, &href, budget)?;
                        }
                        ParseMode::Text => {
                            self.include_text(doc, elem, i, child, &href)?;
                            // the include node is gone, index i is the next sibling
                            continue;
                        }
                    }
                }
                Some(XINCLUDE_FALLBACK) => {
                    return Err(IncludeError::fatal(
                        format!("xi:fallback tag must be child of xi:include ({XINCLUDE_FALLBACK:?})"),
                        None,
                    ));
                }
                Some(_) => self.process(doc, child, base_url, budget)?,
                None => {}
            }
            i += 1;
        }
        Ok(())
    }

    fn include_xml(
        &mut self,
        doc: &mut Document,
        parent: NodeId,
        index: usize,
        directive: NodeId,
        href: &str,
        budget: Option<u32>,
    ) -> Result<(), IncludeError> {
        if self.active.contains(href) {
            return Err(IncludeError::fatal(
                format!("recursive include of {href}"),
                Some(href),
            ));
        }
        if budget == Some(0) {
            return Err(IncludeError::RecursionLimit {
                href: href.to_string(),
            });
        }
        self.active.insert(href.to_string());
        let loaded = match self.loader.load(href, ParseMode::Xml, None)? {
            Some(Loaded::Tree(source)) => source,
            _ => return Err(cannot_load(href, ParseMode::Xml)),
        };
        let Some(source_root) = loaded.root() else {
            return Err(cannot_load(href, ParseMode::Xml));
        };
        let node = doc.import(&loaded, source_root);
        self.process(doc, node, Some(href), budget.map(|b| b - 1))?;
        self.active.remove(href);

        if let Some(tail) = doc.tail(directive) {
            let merged = format!("{}{tail}", doc.tail(node).unwrap_or_default());
            doc.set_tail(node, Some(&merged));
        }
        doc.node_mut(parent).children[index] = node;
        Ok(())
    }

    fn include_text(
        &mut self,
        doc: &mut Document,
        parent: NodeId,
        index: usize,
        directive: NodeId,
        href: &str,
    ) -> Result<(), IncludeError> {
        let encoding = doc.get(directive, "encoding").map(str::to_owned);
        let mut text = match self.loader.load(href, ParseMode::Text, encoding.as_deref())? {
            Some(Loaded::Text(text)) => text,
            _ => return Err(cannot_load(href, ParseMode::Text)),
        };
        if let Some(tail) = doc.tail(directive) {
            text.push_str(tail);
        }
        if index > 0 {
            let previous = doc.children(parent)[index - 1];
            let merged = format!("{}{text}", doc.tail(previous).unwrap_or_default());
            doc.set_tail(previous, Some(&merged));
        } else {
            let merged = format!("{}{text}", doc.text(parent).unwrap_or_default());
            doc.set_text(parent, Some(&merged));
        }
        doc.node_mut(parent).children.remove(index);
        Ok(())
    }
}

fn cannot_load(href: &str, mode: ParseMode) -> IncludeError {
    IncludeError::fatal(format!("cannot load {href:?} as {mode:?}"), Some(href))
}

fn with_href(error: IncludeError, href: &str) -> IncludeError {
    match error {
        IncludeError::Fatal { message, .. } => IncludeError::fatal(message, Some(href)),
        other => other,
    }
}

/// Resolves `href` against `base` the way a browser resolves a relative
/// link: absolute references are kept, anything else replaces the last
/// path segment of `base`.
fn join_url(base: Option<&str>, href: &str) -> String {
    let Some(base) = base.filter(|b| !b.is_empty()) else {
        return href.to_string();
    };
    if href.is_empty() {
        return base.to_string();
    }
    if href.contains("://") || href.starts_with('/') {
        return href.to_string();
    }
    match base.rfind('/') {
        Some(pos) => format!("{}{href}", &base[..=pos]),
        None => href.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::fromstring;
    use crate::serial::{tostring, WriteOptions};
    use pretty_assertions::assert_eq;

    /// Serves documents from memory and records every requested href.
    struct MemoryLoader {
        files: Vec<(String, String)>,
        requested: Vec<String>,
    }

    impl MemoryLoader {
        fn new<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
            Self {
                files: files
                    .into_iter()
                    .map(|(name, body)| (name.to_string(), body.to_string()))
                    .collect(),
                requested: Vec::new(),
            }
        }
    }

    impl Loader for MemoryLoader {
        fn load(
            &mut self,
            href: &str,
            mode: ParseMode,
            _encoding: Option<&str>,
        ) -> Result<Option<Loaded>, IncludeError> {
            self.requested.push(href.to_string());
            let Some((_, body)) = self.files.iter().find(|(name, _)| name == href) else {
                return Ok(None);
            };
            match mode {
                ParseMode::Xml => fromstring(body)
                    .map(|doc| Some(Loaded::Tree(doc)))
                    .map_err(|e| IncludeError::fatal(e.to_string(), Some(href))),
                ParseMode::Text => Ok(Some(Loaded::Text(body.clone()))),
            }
        }
    }

    fn xi(body: &str) -> String {
        format!(r#"<doc xmlns:xi="{XINCLUDE_NS}">{body}</doc>"#)
    }

    fn run(src: &str, loader: &mut MemoryLoader, options: &IncludeOptions) -> Result<String, IncludeError> {
        let mut doc = fromstring(src).unwrap();
        let root = doc.root().unwrap();
        include(&mut doc, root, loader, options)?;
        Ok(tostring(&doc, root, &WriteOptions::default()).unwrap())
    }

    /// `1.xml` includes `2.xml` and so on; `{len}.xml` is a leaf.
    fn chain(len: usize) -> Vec<(String, String)> {
        (1..=len)
            .map(|k| {
                let body = if k < len {
                    format!(
                        r#"<l{k} xmlns:xi="{XINCLUDE_NS}"><xi:include href="{}.xml"/></l{k}>"#,
                        k + 1
                    )
                } else {
                    format!("<l{k}/>")
                };
                (format!("{k}.xml"), body)
            })
            .collect()
    }

    fn chain_loader(len: usize) -> MemoryLoader {
        let files = chain(len);
        MemoryLoader::new(files.iter().map(|(n, b)| (n.as_str(), b.as_str())))
    }

    #[test]
    fn test_xml_include_keeps_tail() {
        let mut loader = MemoryLoader::new([("a.xml", "<a>x</a>")]);
        let out = run(
            &xi(r#"<xi:include href="a.xml"/>tail"#),
            &mut loader,
            &IncludeOptions::default(),
        )
        .unwrap();
        assert_eq!(out, "<doc><a>x</a>tail</doc>");
    }

    #[test]
    fn test_nested_elements_processed() {
        let mut loader = MemoryLoader::new([("a.xml", "<a/>")]);
        let out = run(
            &xi(r#"<p><q><xi:include href="a.xml"/></q></p>"#),
            &mut loader,
            &IncludeOptions::default(),
        )
        .unwrap();
        assert_eq!(out, "<doc><p><q><a/></q></p></doc>");
    }

    #[test]
    fn test_text_include_merges_into_neighbours() {
        let mut loader = MemoryLoader::new([("t.txt", "T")]);
        let opts = IncludeOptions::default();
        let out = run(
            &xi(r#"<b/>1<xi:include href="t.txt" parse="text"/>2"#),
            &mut loader,
            &opts,
        )
        .unwrap();
        assert_eq!(out, "<doc><b/>1T2</doc>");

        let out = run(
            &xi(r#"0<xi:include href="t.txt" parse="text"/>2<xi:include href="t.txt" parse="text"/>"#),
            &mut loader,
            &opts,
        )
        .unwrap();
        assert_eq!(out, "<doc>0T2T</doc>");
    }

    #[test]
    fn test_chain_at_budget_succeeds() {
        let mut loader = chain_loader(3);
        let opts = IncludeOptions::default().max_depth(Some(3));
        let out = run(&xi(r#"<xi:include href="1.xml"/>"#), &mut loader, &opts).unwrap();
        assert_eq!(out, "<doc><l1><l2><l3/></l2></l1></doc>");
    }

    #[test]
    fn test_chain_past_budget_is_recursion_limit() {
        let mut loader = chain_loader(4);
        let opts = IncludeOptions::default().max_depth(Some(3));
        let err = run(&xi(r#"<xi:include href="1.xml"/>"#), &mut loader, &opts).unwrap_err();
        assert!(err.is_recursion_limit());
        assert_eq!(
            err,
            IncludeError::RecursionLimit {
                href: "4.xml".to_string()
            }
        );
    }

    #[test]
    fn test_unlimited_depth() {
        let mut loader = chain_loader(20);
        let opts = IncludeOptions::default().max_depth(None);
        assert!(run(&xi(r#"<xi:include href="1.xml"/>"#), &mut loader, &opts).is_ok());
    }

    #[test]
    fn test_self_reference_is_fatal_not_limit() {
        let body = format!(r#"<a xmlns:xi="{XINCLUDE_NS}"><xi:include href="a.xml"/></a>"#);
        let mut loader = MemoryLoader::new([("a.xml", body.as_str())]);
        let opts = IncludeOptions::default().max_depth(Some(50));
        let err = run(&xi(r#"<xi:include href="a.xml"/>"#), &mut loader, &opts).unwrap_err();
        assert!(err.is_fatal());
        assert!(!err.is_recursion_limit());
        assert!(err.to_string().contains("recursive include of a.xml"));
    }

    #[test]
    fn test_same_href_twice_is_not_a_cycle() {
        let mut loader = MemoryLoader::new([("a.xml", "<a/>")]);
        let out = run(
            &xi(r#"<xi:include href="a.xml"/><xi:include href="a.xml"/>"#),
            &mut loader,
            &IncludeOptions::default(),
        )
        .unwrap();
        assert_eq!(out, "<doc><a/><a/></doc>");
    }

    #[test]
    fn test_fatal_directives() {
        let mut loader = MemoryLoader::new([("a.xml", "<a/>")]);
        let opts = IncludeOptions::default();
        for body in [
            r#"<xi:include href="missing.xml"/>"#,
            r#"<xi:include href="a.xml" parse="html"/>"#,
            r#"<xi:include/>"#,
            r#"<xi:fallback/>"#,
        ] {
            let err = run(&xi(body), &mut loader, &opts).unwrap_err();
            assert!(matches!(err, IncludeError::Fatal { .. }), "{body}: {err}");
        }
    }

    #[test]
    fn test_negative_depth_rejected() {
        let mut loader = MemoryLoader::new([]);
        let opts = IncludeOptions::default().max_depth(Some(-1));
        let err = run("<doc/>", &mut loader, &opts).unwrap_err();
        assert_eq!(err, IncludeError::InvalidDepth(-1));
    }

    #[test]
    fn test_base_url_resolution() {
        let nested = format!(r#"<a xmlns:xi="{XINCLUDE_NS}"><xi:include href="b.xml"/></a>"#);
        let mut loader = MemoryLoader::new([("dir/a.xml", nested.as_str()), ("dir/b.xml", "<b/>")]);
        let opts = IncludeOptions::default().base_url("dir/main.xml");
        let out = run(&xi(r#"<xi:include href="a.xml"/>"#), &mut loader, &opts).unwrap();
        assert_eq!(out, "<doc><a><b/></a></doc>");
        assert_eq!(loader.requested, ["dir/a.xml", "dir/b.xml"]);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url(None, "a.xml"), "a.xml");
        assert_eq!(join_url(Some("x/y.xml"), "a.xml"), "x/a.xml");
        assert_eq!(join_url(Some("y.xml"), "a.xml"), "a.xml");
        assert_eq!(join_url(Some("x/y.xml"), "/abs/a.xml"), "/abs/a.xml");
        assert_eq!(
            join_url(Some("http://h/p/q.xml"), "r.xml"),
            "http://h/p/r.xml"
        );
    }

    #[test]
    fn test_file_loader() {
        let dir = std::env::temp_dir().join(format!("etree-xinclude-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let part = dir.join("part.xml");
        let note = dir.join("note.txt");
        std::fs::write(&part, "<part>p</part>").unwrap();
        std::fs::write(&note, b"caf\xE9").unwrap();

        let src = xi(&format!(
            r#"<xi:include href="{}"/><xi:include href="{}" parse="text" encoding="iso-8859-1"/>"#,
            part.display(),
            note.display()
        ));
        let mut doc = fromstring(&src).unwrap();
        let root = doc.root().unwrap();
        include_files(&mut doc, root, &IncludeOptions::default()).unwrap();
        let out = tostring(&doc, root, &WriteOptions::default()).unwrap();
        assert_eq!(out, "<doc><part>p</part>caf\u{e9}</doc>");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
