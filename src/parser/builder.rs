//! Tree construction from parser callbacks.

use crate::error::{Error, UsageError};
use crate::tree::{Document, NodeId};

use super::XmlTarget;

/// Options for [`TreeBuilder`].
///
/// ```
/// use etree_oxide::parser::TreeBuilderOptions;
///
/// let opts = TreeBuilderOptions::default().insert_comments(true);
/// assert!(opts.insert_comments);
/// assert!(!opts.insert_pis);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeBuilderOptions {
    /// Attach comments inside the root element to the tree.
    pub insert_comments: bool,
    /// Attach processing instructions inside the root element to the tree.
    pub insert_pis: bool,
}

impl TreeBuilderOptions {
    /// Sets whether comments are inserted into the tree.
    #[must_use]
    pub fn insert_comments(mut self, yes: bool) -> Self {
        self.insert_comments = yes;
        self
    }

    /// Sets whether processing instructions are inserted into the tree.
    #[must_use]
    pub fn insert_pis(mut self, yes: bool) -> Self {
        self.insert_pis = yes;
        self
    }
}

/// Where buffered character data goes on the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Nothing started yet; data is dropped.
    Idle,
    /// Data becomes the `text` of the node.
    AfterStart(NodeId),
    /// Data becomes the `tail` of the node.
    AfterEnd(NodeId),
}

/// Builds a [`Document`] from a stream of [`XmlTarget`] callbacks.
///
/// Character data is accumulated and flushed as one string on every
/// structural event: into the `text` of the element just started, or into
/// the `tail` of the node just closed.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::{TreeBuilder, XmlTarget};
///
/// let mut builder = TreeBuilder::new();
/// builder.start("a", &[]).unwrap();
/// builder.data("x").unwrap();
/// builder.start("b", &[]).unwrap();
/// builder.data("y").unwrap();
/// builder.end("b").unwrap();
/// builder.data("z").unwrap();
/// builder.end("a").unwrap();
/// let a = builder.close().unwrap();
///
/// let doc = builder.into_document();
/// let b = doc.children(a)[0];
/// assert_eq!(doc.text(a), Some("x"));
/// assert_eq!(doc.text(b), Some("y"));
/// assert_eq!(doc.tail(b), Some("z"));
/// ```
#[derive(Debug)]
pub struct TreeBuilder {
    doc: Document,
    options: TreeBuilderOptions,
    pending: Vec<String>,
    open: Vec<NodeId>,
    cursor: Cursor,
    root: Option<NodeId>,
}

impl TreeBuilder {
    /// Creates a builder that drops comments and processing instructions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(TreeBuilderOptions::default())
    }

    /// Creates a builder with the given options.
    #[must_use]
    pub fn with_options(options: TreeBuilderOptions) -> Self {
        Self {
            doc: Document::new(),
            options,
            pending: Vec::new(),
            open: Vec::new(),
            cursor: Cursor::Idle,
            root: None,
        }
    }

    /// The document under construction.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Consumes the builder, returning the document.
    pub fn into_document(self) -> Document {
        self.doc
    }

    /// The first element started, once there is one.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = self.pending.concat();
        self.pending.clear();
        match self.cursor {
            Cursor::Idle => {}
            Cursor::AfterStart(id) => self.doc.node_mut(id).text = Some(text),
            Cursor::AfterEnd(id) => self.doc.node_mut(id).tail = Some(text),
        }
    }

    /// Opens an element and returns its id.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other handlers.
    pub fn handle_start(
        &mut self,
        tag: &str,
        attrs: &[(String, String)],
    ) -> Result<NodeId, Error> {
        self.flush();
        let id = self
            .doc
            .create_element(tag, attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        match self.open.last() {
            Some(&parent) => self.doc.append(parent, id),
            None => {
                if self.root.is_none() {
                    self.root = Some(id);
                    self.doc.set_root(id);
                }
            }
        }
        self.open.push(id);
        self.cursor = Cursor::AfterStart(id);
        Ok(id)
    }

    /// Closes the innermost element and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError`] if no element is open or `tag` does not match
    /// the innermost open element.
    pub fn handle_end(&mut self, tag: &str) -> Result<NodeId, Error> {
        self.flush();
        let Some(id) = self.open.pop() else {
            return Err(UsageError::new(format!("end tag {tag} without open element")).into());
        };
        let open_tag = self.doc.tag(id).unwrap_or_default();
        if open_tag != tag {
            return Err(UsageError::new(format!(
                "end tag mismatch (expected {open_tag}, got {tag})"
            ))
            .into());
        }
        self.cursor = Cursor::AfterEnd(id);
        Ok(id)
    }

    /// Creates a comment node, attaching it when comments are inserted.
    pub fn handle_comment(&mut self, text: &str) -> NodeId {
        let id = self.doc.create_comment(text);
        self.place_leaf(id, self.options.insert_comments);
        id
    }

    /// Creates a processing-instruction node, attaching it when processing
    /// instructions are inserted.
    pub fn handle_pi(&mut self, target: &str, data: &str) -> NodeId {
        let id = self.doc.create_pi(target, Some(data));
        self.place_leaf(id, self.options.insert_pis);
        id
    }

    /// A dropped leaf leaves pending text buffered, so text on both sides of
    /// it joins up.
    fn place_leaf(&mut self, id: NodeId, insert: bool) {
        if !insert {
            return;
        }
        self.flush();
        if let Some(&parent) = self.open.last() {
            self.doc.append(parent, id);
            self.cursor = Cursor::AfterEnd(id);
        }
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlTarget for TreeBuilder {
    type Output = NodeId;

    fn start(&mut self, tag: &str, attrs: &[(String, String)]) -> Result<(), Error> {
        self.handle_start(tag, attrs).map(drop)
    }

    fn end(&mut self, tag: &str) -> Result<(), Error> {
        self.handle_end(tag).map(drop)
    }

    fn data(&mut self, text: &str) -> Result<(), Error> {
        self.pending.push(text.to_string());
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.handle_comment(text);
        Ok(())
    }

    fn pi(&mut self, target: &str, data: &str) -> Result<(), Error> {
        self.handle_pi(target, data);
        Ok(())
    }

    /// Returns the root element.
    fn close(&mut self) -> Result<NodeId, Error> {
        self.flush();
        if !self.open.is_empty() {
            return Err(UsageError::new("missing end tags").into());
        }
        self.root
            .ok_or_else(|| UsageError::new("missing toplevel element").into())
    }
}
