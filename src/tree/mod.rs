//! Arena-based element tree.
//!
//! All nodes live in a contiguous `Vec<NodeData>` owned by the [`Document`]
//! and are referenced by [`NodeId`], a newtype over `NonZeroU32`. Child
//! lists hold ids rather than owned nodes, so a node may be attached under
//! several parents, or several times under one parent. Nodes carry no parent
//! link; the path engine reconstructs parents on demand.
//!
//! Character data follows the `text` / `tail` model: an element's `text` is
//! the content before its first child and its `tail` is the content after
//! its end tag, up to the next sibling.
//!
//! Nodes are never freed individually. A node that is detached from every
//! parent stays in the arena until the `Document` is dropped.

mod node;

pub use node::{AttrValue, Attributes, NodeKind};

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::ops::Range;

use crate::error::{PathSyntaxError, UsageError};
use crate::path::{CachePolicy, Namespaces, NodeIter, PathEngine};

/// A typed index into the document's node arena.
///
/// `NodeId` is a newtype over `NonZeroU32`, meaning it can never be zero
/// and `Option<NodeId>` has the same size as `NodeId` (niche optimization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    /// Creates a `NodeId` from a raw arena index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is 0 or does not fit in a `u32`.
    #[allow(clippy::expect_used)]
    fn from_index(index: usize) -> Self {
        let raw = u32::try_from(index).expect("node arena exceeds u32::MAX entries");
        Self(NonZeroU32::new(raw).expect("NodeId index must be non-zero"))
    }

    /// Returns the raw index as a `usize` for indexing into the arena.
    fn as_index(self) -> usize {
        self.0.get() as usize
    }
}

/// Storage for a single node in the document arena.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// What kind of node this is, and the element tag.
    pub kind: NodeKind,
    /// Attributes, in insertion order. Ignored for comments and PIs.
    pub attributes: Attributes,
    /// Child node ids in document order. Ignored for comments and PIs.
    pub children: Vec<NodeId>,
    /// Content before the first child (comment body, PI `"target data"`).
    pub text: Option<String>,
    /// Content after this node's end tag.
    pub tail: Option<String>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attributes: Attributes::new(),
            children: Vec::new(),
            text: None,
            tail: None,
        }
    }
}

/// An XML element tree.
///
/// The `Document` owns every node in an arena plus the path engine (and its
/// compiled-path cache) used by the `find*` family. All tree operations go
/// through `&Document` (navigation) or `&mut Document` (mutation).
///
/// # Examples
///
/// ```
/// use etree_oxide::Document;
///
/// let mut doc = Document::new();
/// let root = doc.create_element("root", [("id", "1")]);
/// doc.set_root(root);
/// let child = doc.sub_element(root, "child", [] as [(&str, &str); 0]);
/// doc.set_text(child, Some("hello"));
///
/// assert_eq!(doc.find(root, "child", None).unwrap(), Some(child));
/// assert_eq!(doc.text_content(root), "hello");
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    /// The node arena. Index 0 is unused (placeholder for `NonZeroU32`).
    nodes: Vec<NodeData>,
    /// The tree's root node, if one has been set.
    root: Option<NodeId>,
    paths: PathEngine,
}

impl Document {
    /// Creates an empty document with the default path-cache policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cache_policy(CachePolicy::default())
    }

    /// Creates an empty document whose path engine uses `policy`.
    #[must_use]
    pub fn with_cache_policy(policy: CachePolicy) -> Self {
        let mut nodes = Vec::with_capacity(64);
        // Index 0: placeholder (NodeId uses NonZeroU32)
        nodes.push(NodeData::new(NodeKind::Wrapper));
        Self {
            nodes,
            root: None,
            paths: PathEngine::new(policy),
        }
    }

    /// Returns the tree's root node.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Makes `id` the root of the tree.
    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    /// Returns the path engine owned by this document.
    #[must_use]
    pub fn path_engine(&self) -> &PathEngine {
        &self.paths
    }

    /// Returns the data for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this document.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.as_index()]
    }

    /// Returns mutable data for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this document.
    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.as_index()]
    }

    /// Returns the total number of nodes in the arena, reachable or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1 // subtract placeholder at index 0
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(data);
        id
    }

    // --- Factories ---

    /// Creates a detached element node.
    pub fn create_element<K, V>(
        &mut self,
        tag: impl Into<String>,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> NodeId
    where
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let mut data = NodeData::new(NodeKind::Element { tag: tag.into() });
        data.attributes = attributes.into_iter().collect();
        self.alloc(data)
    }

    /// Creates a detached comment node.
    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        let mut data = NodeData::new(NodeKind::Comment);
        data.text = Some(text.into());
        self.alloc(data)
    }

    /// Creates a detached processing-instruction node.
    ///
    /// The target and data are packed into `text` as `"target data"`, or just
    /// `"target"` when `data` is empty.
    pub fn create_pi(&mut self, target: &str, data: Option<&str>) -> NodeId {
        let text = match data {
            Some(data) if !data.is_empty() => format!("{target} {data}"),
            _ => target.to_string(),
        };
        let mut node = NodeData::new(NodeKind::ProcessingInstruction);
        node.text = Some(text);
        self.alloc(node)
    }

    /// Creates a detached tagless wrapper node.
    pub fn create_wrapper(&mut self) -> NodeId {
        self.alloc(NodeData::new(NodeKind::Wrapper))
    }

    /// Creates an element and appends it to `parent`.
    pub fn sub_element<K, V>(
        &mut self,
        parent: NodeId,
        tag: impl Into<String>,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> NodeId
    where
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let child = self.create_element(tag, attributes);
        self.append(parent, child);
        child
    }

    // --- Node properties ---

    /// Returns the node's kind.
    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    /// Returns the tag of an element node.
    #[must_use]
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.node(id).kind.tag()
    }

    /// Renames an element node. Other node kinds are left unchanged.
    pub fn set_tag(&mut self, id: NodeId, tag: impl Into<String>) {
        if let NodeKind::Element { tag: current } = &mut self.node_mut(id).kind {
            *current = tag.into();
        }
    }

    /// Returns the node's text.
    #[must_use]
    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.node(id).text.as_deref()
    }

    /// Replaces the node's text.
    pub fn set_text(&mut self, id: NodeId, text: Option<&str>) {
        self.node_mut(id).text = text.map(str::to_owned);
    }

    /// Returns the node's tail.
    #[must_use]
    pub fn tail(&self, id: NodeId) -> Option<&str> {
        self.node(id).tail.as_deref()
    }

    /// Replaces the node's tail.
    pub fn set_tail(&mut self, id: NodeId, tail: Option<&str>) {
        self.node_mut(id).tail = tail.map(str::to_owned);
    }

    // --- Attributes ---

    /// Returns the node's attribute mapping.
    #[must_use]
    pub fn attributes(&self, id: NodeId) -> &Attributes {
        &self.node(id).attributes
    }

    /// Returns the node's attribute mapping for modification.
    pub fn attributes_mut(&mut self, id: NodeId) -> &mut Attributes {
        &mut self.node_mut(id).attributes
    }

    /// Returns the text of attribute `key`.
    #[must_use]
    pub fn get(&self, id: NodeId, key: &str) -> Option<&str> {
        self.node(id).attributes.get(key).map(AttrValue::as_str)
    }

    /// Sets attribute `key`; an existing key keeps its position.
    pub fn set(&mut self, id: NodeId, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.node_mut(id).attributes.set(key, value);
    }

    /// Returns attribute names in insertion order.
    #[must_use]
    pub fn keys(&self, id: NodeId) -> Vec<&str> {
        self.node(id).attributes.keys().collect()
    }

    /// Returns `(name, value)` pairs in insertion order.
    #[must_use]
    pub fn items(&self, id: NodeId) -> Vec<(&str, &str)> {
        self.node(id)
            .attributes
            .iter()
            .map(|(k, v)| (k, v.as_str()))
            .collect()
    }

    /// Drops the node's text, tail, attributes and children.
    pub fn clear(&mut self, id: NodeId) {
        let data = self.node_mut(id);
        data.attributes.clear();
        data.children.clear();
        data.text = None;
        data.tail = None;
    }

    // --- Children ---

    /// Returns the node's children in order.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Returns the number of children.
    #[must_use]
    pub fn len(&self, id: NodeId) -> usize {
        self.node(id).children.len()
    }

    /// Returns the child at `index`; negative indices count from the end.
    #[must_use]
    pub fn child(&self, id: NodeId, index: isize) -> Option<NodeId> {
        let children = &self.node(id).children;
        resolve_index(children.len(), index).map(|i| children[i])
    }

    /// Appends `child` to the end of `parent`'s children.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).children.push(child);
    }

    /// Appends every node of `children` to `parent`.
    pub fn extend(&mut self, parent: NodeId, children: impl IntoIterator<Item = NodeId>) {
        self.node_mut(parent).children.extend(children);
    }

    /// Inserts `child` before position `index`.
    ///
    /// Out-of-range indices are clamped, as for list insertion: a negative
    /// index counts from the end and anything past the end appends.
    pub fn insert(&mut self, parent: NodeId, index: isize, child: NodeId) {
        let children = &mut self.node_mut(parent).children;
        let len = children.len();
        let pos = if index < 0 {
            len.saturating_sub(index.unsigned_abs())
        } else {
            index.unsigned_abs().min(len)
        };
        children.insert(pos, child);
    }

    /// Removes the first occurrence of `child` from `parent`, by identity.
    ///
    /// # Errors
    ///
    /// Returns `UsageError` if `child` is not a child of `parent`.
    pub fn remove(&mut self, parent: NodeId, child: NodeId) -> Result<(), UsageError> {
        let children = &mut self.node_mut(parent).children;
        let pos = children
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| UsageError::new("list.remove(x): x not in list"))?;
        children.remove(pos);
        Ok(())
    }

    /// Replaces the child at `index`, returning the node it displaced.
    ///
    /// # Errors
    ///
    /// Returns `UsageError` if `index` is out of range.
    pub fn set_child(
        &mut self,
        parent: NodeId,
        index: isize,
        child: NodeId,
    ) -> Result<NodeId, UsageError> {
        let children = &mut self.node_mut(parent).children;
        let pos = resolve_index(children.len(), index)
            .ok_or_else(|| UsageError::new("list assignment index out of range"))?;
        Ok(std::mem::replace(&mut children[pos], child))
    }

    /// Detaches and returns the child at `index`.
    ///
    /// # Errors
    ///
    /// Returns `UsageError` if `index` is out of range.
    pub fn delete_child(&mut self, parent: NodeId, index: isize) -> Result<NodeId, UsageError> {
        let children = &mut self.node_mut(parent).children;
        let pos = resolve_index(children.len(), index)
            .ok_or_else(|| UsageError::new("list assignment index out of range"))?;
        Ok(children.remove(pos))
    }

    /// Replaces the children in `range` with `replacement`, returning the
    /// detached nodes. The range is clamped to the child list like a slice
    /// assignment.
    pub fn splice(
        &mut self,
        parent: NodeId,
        range: Range<usize>,
        replacement: impl IntoIterator<Item = NodeId>,
    ) -> Vec<NodeId> {
        let children = &mut self.node_mut(parent).children;
        let end = range.end.min(children.len());
        let start = range.start.min(end);
        children.splice(start..end, replacement).collect()
    }

    /// Detaches the children in `range`, returning them.
    pub fn delete_range(&mut self, parent: NodeId, range: Range<usize>) -> Vec<NodeId> {
        self.splice(parent, range, std::iter::empty())
    }

    // --- Copying ---

    /// Shallow copy: a new node with the same kind, attributes, text and
    /// tail, whose child list refers to the *same* child nodes.
    pub fn copy(&mut self, id: NodeId) -> NodeId {
        let data = self.node(id).clone();
        self.alloc(data)
    }

    /// Deep copy of the subtree at `id`. Aliased children are copied once
    /// per occurrence.
    pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
        let mut data = self.node(id).clone();
        let children = std::mem::take(&mut data.children);
        data.children = children.into_iter().map(|c| self.deep_copy(c)).collect();
        self.alloc(data)
    }

    /// Deep-copies the subtree at `id` of another document into this one.
    pub fn import(&mut self, source: &Document, id: NodeId) -> NodeId {
        let mut data = source.node(id).clone();
        let children = std::mem::take(&mut data.children);
        data.children = children
            .into_iter()
            .map(|c| self.import(source, c))
            .collect();
        self.alloc(data)
    }

    // --- Traversal ---

    /// Pre-order iteration over `id` and its descendants.
    ///
    /// With `tag` of `None` or `"*"` every node is yielded, comments and
    /// processing instructions included; otherwise only elements whose tag
    /// equals `tag`.
    #[must_use]
    pub fn iter<'a>(&'a self, id: NodeId, tag: Option<&'a str>) -> Iter<'a> {
        Iter {
            doc: self,
            stack: vec![id],
            tag: tag.filter(|t| *t != "*"),
        }
    }

    /// Pre-order iteration over the whole tree, starting at the root.
    #[must_use]
    pub fn iter_all<'a>(&'a self, tag: Option<&'a str>) -> Iter<'a> {
        Iter {
            doc: self,
            stack: self.root.into_iter().collect(),
            tag: tag.filter(|t| *t != "*"),
        }
    }

    /// Yields the text of `id` and its descendants in document order:
    /// each node's `text`, then each child's text content followed by that
    /// child's `tail`.
    ///
    /// Comments and processing instructions contribute nothing themselves,
    /// but their tails are yielded. The tail of `id` is not included.
    #[must_use]
    pub fn itertext(&self, id: NodeId) -> Itertext<'_> {
        Itertext {
            doc: self,
            stack: vec![TextStep::Enter(id)],
        }
    }

    /// Concatenation of [`itertext`](Self::itertext).
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        self.itertext(id).collect()
    }

    /// Builds an index from `id` attribute values to elements.
    #[must_use]
    pub fn id_index(&self) -> HashMap<String, NodeId> {
        let mut ids = HashMap::new();
        for node in self.iter_all(None) {
            if let Some(value) = self.get(node, "id") {
                ids.insert(value.to_string(), node);
            }
        }
        ids
    }

    // --- Path queries ---

    /// Returns the first node matching `path` relative to `id`.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn find(
        &self,
        id: NodeId,
        path: &str,
        namespaces: Option<&Namespaces>,
    ) -> Result<Option<NodeId>, PathSyntaxError> {
        self.paths.find(self, id, path, namespaces)
    }

    /// Returns every node matching `path`, in document order.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn findall(
        &self,
        id: NodeId,
        path: &str,
        namespaces: Option<&Namespaces>,
    ) -> Result<Vec<NodeId>, PathSyntaxError> {
        self.paths.findall(self, id, path, namespaces)
    }

    /// Returns a lazy iterator over the nodes matching `path`.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn iterfind<'a>(
        &'a self,
        id: NodeId,
        path: &str,
        namespaces: Option<&Namespaces>,
    ) -> Result<NodeIter<'a>, PathSyntaxError> {
        self.paths.iterfind(self, id, path, namespaces)
    }

    /// Returns the text of the first node matching `path` (`""` if it has
    /// none), or `default` if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` if `path` cannot be compiled.
    pub fn findtext(
        &self,
        id: NodeId,
        path: &str,
        default: Option<&str>,
        namespaces: Option<&Namespaces>,
    ) -> Result<Option<String>, PathSyntaxError> {
        self.paths.findtext(self, id, path, default, namespaces)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a possibly negative index onto `0..len`.
fn resolve_index(len: usize, index: isize) -> Option<usize> {
    let pos = if index < 0 {
        len.checked_sub(index.unsigned_abs())?
    } else {
        index.unsigned_abs()
    };
    (pos < len).then_some(pos)
}

// --- Iterators ---

/// Pre-order iterator returned by [`Document::iter`].
pub struct Iter<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
    tag: Option<&'a str>,
}

impl Iterator for Iter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current) = self.stack.pop() {
            self.stack
                .extend(self.doc.node(current).children.iter().rev().copied());
            match self.tag {
                None => return Some(current),
                Some(tag) if self.doc.tag(current) == Some(tag) => return Some(current),
                Some(_) => {}
            }
        }
        None
    }
}

enum TextStep {
    Enter(NodeId),
    Tail(NodeId),
}

/// Text iterator returned by [`Document::itertext`].
pub struct Itertext<'a> {
    doc: &'a Document,
    stack: Vec<TextStep>,
}

impl<'a> Iterator for Itertext<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let doc = self.doc;
        while let Some(step) = self.stack.pop() {
            match step {
                TextStep::Enter(id) => {
                    let data = doc.node(id);
                    if data.kind.is_leaf() {
                        continue;
                    }
                    for &child in data.children.iter().rev() {
                        self.stack.push(TextStep::Tail(child));
                        self.stack.push(TextStep::Enter(child));
                    }
                    if let Some(text) = data.text.as_deref().filter(|t| !t.is_empty()) {
                        return Some(text);
                    }
                }
                TextStep::Tail(id) => {
                    if let Some(tail) = doc.tail(id).filter(|t| !t.is_empty()) {
                        return Some(tail);
                    }
                }
            }
        }
        None
    }
}
