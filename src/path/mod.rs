//! Path queries over the element tree.
//!
//! A restricted `XPath` dialect: child steps by tag (with `{*}` / `{}` /
//! `{uri}*` wildcards), `*`, `.`, `..`, `//tag`, and predicates on
//! attribute presence or value, child presence, text value, and sibling
//! position (`[n]`, `[last()]`, `[last()-n]`).
//!
//! Compiling a path produces a selector pipeline that is evaluated lazily.
//! Each [`PathEngine`] owns a cache of compiled pipelines keyed by the path
//! and the namespace map it was compiled against.
//!
//! # Examples
//!
//! ```
//! use etree_oxide::parser::fromstring;
//!
//! let doc = fromstring("<a><b x='1'/><b/></a>").unwrap();
//! let root = doc.root().unwrap();
//! assert_eq!(doc.findall(root, "b", None).unwrap().len(), 2);
//! assert_eq!(doc.findall(root, "b[@x='1']", None).unwrap().len(), 1);
//! ```

mod cache;
mod compile;
mod lexer;

pub use cache::CachePolicy;
pub use compile::CompiledPath;

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::PathSyntaxError;
use crate::tree::{Document, NodeId};

use cache::{CacheKey, PathCache};

/// Prefix-to-URI map for path queries. The key `""` sets a default
/// namespace for unprefixed tags.
pub type Namespaces = HashMap<String, String>;

/// A lazy sequence of matching nodes.
pub type NodeIter<'a> = Box<dyn Iterator<Item = NodeId> + 'a>;

/// Compiles and evaluates paths, caching compiled pipelines.
pub struct PathEngine {
    policy: CachePolicy,
    cache: RefCell<PathCache>,
}

impl PathEngine {
    /// Creates an engine with an empty cache.
    #[must_use]
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            cache: RefCell::new(PathCache::new(policy)),
        }
    }

    /// The cache policy.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Number of cached pipelines.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Drops every cached pipeline.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Compiles `path`, or returns the cached pipeline for it.
    ///
    /// A trailing `/` selects all children (`a/` is `a/*`).
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn compile(
        &self,
        path: &str,
        namespaces: Option<&Namespaces>,
    ) -> Result<Arc<CompiledPath>, PathSyntaxError> {
        let path = if path.ends_with('/') {
            Cow::Owned(format!("{path}*"))
        } else {
            Cow::Borrowed(path)
        };
        let key = cache_key(&path, namespaces);
        if let Some(compiled) = self.cache.borrow_mut().get(&key) {
            return Ok(compiled);
        }
        let compiled = Arc::new(CompiledPath::compile(&path, namespaces)?);
        tracing::trace!(path = %path, steps = compiled.len(), "compiled path");
        self.cache.borrow_mut().insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Returns a lazy iterator over the nodes matching `path` from `node`.
    ///
    /// An absolute path (leading `/`) is accepted only when `node` is the
    /// document root; it is then evaluated as `.` + `path`.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn iterfind<'a>(
        &self,
        doc: &'a Document,
        node: NodeId,
        path: &str,
        namespaces: Option<&Namespaces>,
    ) -> Result<NodeIter<'a>, PathSyntaxError> {
        let path = absolute_to_relative(doc, node, path);
        let compiled = self.compile(&path, namespaces)?;
        Ok(compiled.select(doc, node))
    }

    /// Returns the first node matching `path`.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn find(
        &self,
        doc: &Document,
        node: NodeId,
        path: &str,
        namespaces: Option<&Namespaces>,
    ) -> Result<Option<NodeId>, PathSyntaxError> {
        Ok(self.iterfind(doc, node, path, namespaces)?.next())
    }

    /// Returns every node matching `path`, in document order.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn findall(
        &self,
        doc: &Document,
        node: NodeId,
        path: &str,
        namespaces: Option<&Namespaces>,
    ) -> Result<Vec<NodeId>, PathSyntaxError> {
        Ok(self.iterfind(doc, node, path, namespaces)?.collect())
    }

    /// Returns the text of the first match (`""` when it has none), or
    /// `default` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn findtext(
        &self,
        doc: &Document,
        node: NodeId,
        path: &str,
        default: Option<&str>,
        namespaces: Option<&Namespaces>,
    ) -> Result<Option<String>, PathSyntaxError> {
        let text = match self.find(doc, node, path, namespaces)? {
            Some(found) => Some(doc.text(found).unwrap_or_default().to_string()),
            None => default.map(str::to_owned),
        };
        Ok(text)
    }
}

impl Default for PathEngine {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl Clone for PathEngine {
    /// A clone has the same policy and an empty cache.
    fn clone(&self) -> Self {
        Self::new(self.policy)
    }
}

impl fmt::Debug for PathEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathEngine")
            .field("policy", &self.policy)
            .field("cache", &self.cache)
            .finish()
    }
}

fn cache_key(path: &str, namespaces: Option<&Namespaces>) -> CacheKey {
    let mut items: Vec<(String, String)> = namespaces
        .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    items.sort();
    (path.to_string(), items)
}

fn absolute_to_relative<'p>(doc: &Document, node: NodeId, path: &'p str) -> Cow<'p, str> {
    if path.starts_with('/') && doc.root() == Some(node) {
        tracing::warn!(
            path,
            "absolute path evaluated on the document root; treating it as relative"
        );
        Cow::Owned(format!(".{path}"))
    } else {
        Cow::Borrowed(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::fromstring;
    use pretty_assertions::assert_eq;

    fn tags(doc: &Document, nodes: &[NodeId]) -> Vec<String> {
        nodes
            .iter()
            .map(|&n| doc.tag(n).unwrap_or("<?>").to_string())
            .collect()
    }

    #[test]
    fn test_find_and_findall_basic() {
        let doc = fromstring(r#"<a><b x="1"/><b/></a>"#).unwrap();
        let a = doc.root().unwrap();
        let bs = doc.children(a).to_vec();
        assert_eq!(doc.find(a, "b", None).unwrap(), Some(bs[0]));
        assert_eq!(doc.findall(a, "b", None).unwrap(), bs);
        assert_eq!(doc.findall(a, "b[@x]", None).unwrap(), vec![bs[0]]);
        assert_eq!(doc.findall(a, "b[@x='1']", None).unwrap(), vec![bs[0]]);
        assert_eq!(doc.findall(a, "b[@x='2']", None).unwrap(), vec![]);
    }

    #[test]
    fn test_positional_predicates() {
        let doc = fromstring("<a><b/><c/><b/></a>").unwrap();
        let a = doc.root().unwrap();
        let kids = doc.children(a).to_vec();
        assert_eq!(doc.findall(a, "b[1]", None).unwrap(), vec![kids[0]]);
        assert_eq!(doc.findall(a, "b[2]", None).unwrap(), vec![kids[2]]);
        assert_eq!(doc.findall(a, "b[last()]", None).unwrap(), vec![kids[2]]);
        assert_eq!(doc.findall(a, "b[last()-1]", None).unwrap(), vec![kids[0]]);
        assert_eq!(doc.findall(a, "*[3]", None).unwrap(), vec![]);
    }

    #[test]
    fn test_descendants_exclude_self() {
        let doc = fromstring("<b><b><x><b/></x></b><b/></b>").unwrap();
        let root = doc.root().unwrap();
        let found = doc.findall(root, ".//b", None).unwrap();
        assert_eq!(found.len(), 3);
        assert!(!found.contains(&root));
        let all: Vec<NodeId> = doc.iter(root, Some("b")).skip(1).collect();
        assert_eq!(found, all);
    }

    #[test]
    fn test_parent_and_self_steps() {
        let doc = fromstring("<a><b><c/></b><b><c/></b></a>").unwrap();
        let a = doc.root().unwrap();
        let parents = doc.findall(a, "b/c/..", None).unwrap();
        assert_eq!(parents, doc.children(a).to_vec());
        let a_again = doc.findall(a, "b/..", None).unwrap();
        assert_eq!(a_again, vec![a]);
        assert_eq!(doc.findall(a, ".", None).unwrap(), vec![a]);
        assert_eq!(doc.findall(a, "..", None).unwrap(), vec![]);
    }

    #[test]
    fn test_text_predicates() {
        let doc = fromstring("<a><b>x<i>y</i></b><b><n>v</n></b></a>").unwrap();
        let a = doc.root().unwrap();
        let kids = doc.children(a).to_vec();
        assert_eq!(doc.findall(a, "b[.='xy']", None).unwrap(), vec![kids[0]]);
        assert_eq!(doc.findall(a, "b[n='v']", None).unwrap(), vec![kids[1]]);
        assert_eq!(doc.findall(a, "b[i]", None).unwrap(), vec![kids[0]]);
    }

    #[test]
    fn test_wildcards() {
        let mut doc = fromstring(r#"<r xmlns:p="urn:p"><p:a/><a/><p:b/></r>"#).unwrap();
        let r = doc.root().unwrap();
        let comment = doc.create_comment("c");
        doc.append(r, comment);
        let doc = doc;
        let find = |path: &str| tags(&doc, &doc.findall(r, path, None).unwrap());
        assert_eq!(find("{*}a"), vec!["{urn:p}a", "a"]);
        assert_eq!(find("{}*"), vec!["a"]);
        assert_eq!(find("{urn:p}*"), vec!["{urn:p}a", "{urn:p}b"]);
        assert_eq!(find("{*}*").len(), 3);
        // a bare star also reaches the comment
        assert_eq!(doc.findall(r, "*", None).unwrap().len(), 4);
        assert_eq!(doc.findall(r, ".//*", None).unwrap().len(), 4);
    }

    #[test]
    fn test_namespace_map_and_default() {
        let doc = fromstring(r#"<r xmlns="urn:d"><item/></r>"#).unwrap();
        let r = doc.root().unwrap();
        let mut ns = Namespaces::new();
        ns.insert("d".to_string(), "urn:d".to_string());
        assert!(doc.find(r, "d:item", Some(&ns)).unwrap().is_some());
        assert!(doc.find(r, "item", None).unwrap().is_none());
        ns.insert(String::new(), "urn:d".to_string());
        assert!(doc.find(r, "item", Some(&ns)).unwrap().is_some());
    }

    #[test]
    fn test_findtext() {
        let doc = fromstring("<a><b>hi</b><c/></a>").unwrap();
        let a = doc.root().unwrap();
        let text = |path: &str, default| doc.findtext(a, path, default, None).unwrap();
        assert_eq!(text("b", None), Some("hi".to_string()));
        assert_eq!(text("c", Some("d")), Some(String::new()));
        assert_eq!(text("z", Some("d")), Some("d".to_string()));
        assert_eq!(text("z", None), None);
    }

    #[test]
    fn test_trailing_slash_and_absolute_paths() {
        let doc = fromstring("<a><b><c/></b></a>").unwrap();
        let a = doc.root().unwrap();
        let b = doc.child(a, 0).unwrap();
        assert_eq!(doc.findall(a, "b/", None).unwrap().len(), 1);
        assert_eq!(doc.find(a, "/b", None).unwrap(), Some(b));
        let err = doc.find(b, "/c", None).unwrap_err();
        assert_eq!(err.message, "cannot use absolute path on element");
    }

    #[test]
    fn test_iterfind_is_lazy_and_independent_of_cache() {
        let doc = fromstring("<a><b/><b/><b/></a>").unwrap();
        let a = doc.root().unwrap();
        let mut iter = doc.iterfind(a, "b", None).unwrap();
        doc.path_engine().clear_cache();
        assert!(iter.next().is_some());
        assert_eq!(iter.count(), 2);
    }

    #[test]
    fn test_cache_keyed_by_namespaces() {
        let engine = PathEngine::default();
        let mut ns = Namespaces::new();
        ns.insert("p".to_string(), "urn:p".to_string());
        engine.compile("a", None).unwrap();
        engine.compile("a", None).unwrap();
        engine.compile("a", Some(&ns)).unwrap();
        assert_eq!(engine.cache_len(), 2);
        engine.clear_cache();
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_empty_path_matches_nothing() {
        let doc = fromstring("<a><b/></a>").unwrap();
        let a = doc.root().unwrap();
        assert_eq!(doc.findall(a, "", None).unwrap(), vec![]);
    }
}
