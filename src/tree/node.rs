//! Node payload types.
//!
//! The `NodeKind` enum tells tagged elements apart from the comment and
//! processing-instruction "sentinel" nodes. `Attributes` is the ordered
//! attribute mapping shared by all element nodes.

use std::fmt;

use crate::util::qname::QName;

/// The kind of a node in the element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A tagged element. The tag is a plain name or Clark notation
    /// (`{uri}local`).
    Element {
        /// The element's tag.
        tag: String,
    },

    /// A comment; its `text` holds the comment body.
    Comment,

    /// A processing instruction; its `text` holds `"target data"`.
    ProcessingInstruction,

    /// A tagless pass-through node. Serializers write its text and
    /// children but no markup of its own.
    Wrapper,
}

impl NodeKind {
    /// Returns the tag of an element node.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Element { tag } => Some(tag),
            _ => None,
        }
    }

    /// Returns `true` for comments and processing instructions, whose
    /// attributes and children are ignored.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Comment | Self::ProcessingInstruction)
    }
}

/// The value of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Ordinary character data.
    Text(String),
    /// A qualified name that is rewritten with a namespace prefix on output.
    QName(QName),
}

impl AttrValue {
    /// The text of the value (Clark notation for a `QName`).
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::QName(name) => name.text(),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for AttrValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for AttrValue {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<QName> for AttrValue {
    fn from(name: QName) -> Self {
        Self::QName(name)
    }
}

/// An insertion-ordered attribute mapping.
///
/// Serializers emit attributes in insertion order; replacing the value of
/// an existing key keeps its position. Equality ignores order.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Sets `key` to `value`, replacing an existing value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all attributes.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for Attributes {}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<String>,
    V: Into<AttrValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Self::new();
        for (k, v) in iter {
            attrs.set(k, v);
        }
        attrs
    }
}
