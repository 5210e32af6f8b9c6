//! Qualified-name handling.
//!
//! Names inside the tree are stored in Clark notation: `{uri}local` for a
//! namespace-qualified name, a bare `local` otherwise. Prefixed names
//! (`prefix:local`) only exist in serialized text and in query strings.
//!
//! See <https://www.w3.org/TR/xml-names/#NT-QName>

use std::fmt;

/// The namespace bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A namespace-qualified name in Clark notation.
///
/// Used where a value must be rewritten with a namespace prefix on output,
/// e.g. an attribute whose value names an element type (`xsi:type`).
/// Compared and ordered by its text form.
///
/// # Examples
///
/// ```
/// use etree_oxide::QName;
///
/// let name = QName::with_namespace(Some("urn:x"), "item");
/// assert_eq!(name.text(), "{urn:x}item");
/// assert_eq!(name.namespace(), Some("urn:x"));
/// assert_eq!(name.local_name(), "item");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName(String);

impl QName {
    /// Wraps a Clark-notation (or plain) name.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Builds a name from an optional namespace URI and a local part.
    #[must_use]
    pub fn with_namespace(uri: Option<&str>, local: &str) -> Self {
        match uri {
            Some(uri) => Self(format!("{{{uri}}}{local}")),
            None => Self(local.to_string()),
        }
    }

    /// The Clark-notation text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.0
    }

    /// The namespace URI, if the name is qualified.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        split_clark(&self.0).0
    }

    /// The local part.
    #[must_use]
    pub fn local_name(&self) -> &str {
        split_clark(&self.0).1
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<QName> for String {
    fn from(name: QName) -> Self {
        name.0
    }
}

impl From<&str> for QName {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Splits a `QName` into its prefix and local name parts.
///
/// Returns `(Some(prefix), localname)` if the name contains a colon,
/// or `(None, localname)` if it does not.
///
/// # Examples
///
/// ```
/// use etree_oxide::util::qname::split_qname;
///
/// assert_eq!(split_qname("svg:rect"), (Some("svg"), "rect"));
/// assert_eq!(split_qname("div"), (None, "div"));
/// ```
#[must_use]
pub fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.find(':') {
        Some(pos) => (Some(&qname[..pos]), &qname[pos + 1..]),
        None => (None, qname),
    }
}

/// Splits a Clark-notation name into `(namespace, local)`.
///
/// The local part starts after the *last* `}` so that a URI containing `}`
/// is kept whole. A name without a leading `{` has no namespace.
///
/// # Examples
///
/// ```
/// use etree_oxide::util::qname::split_clark;
///
/// assert_eq!(split_clark("{urn:a}b"), (Some("urn:a"), "b"));
/// assert_eq!(split_clark("b"), (None, "b"));
/// ```
#[must_use]
pub fn split_clark(name: &str) -> (Option<&str>, &str) {
    match name.strip_prefix('{').and_then(|rest| rest.rsplit_once('}')) {
        Some((uri, local)) => (Some(uri), local),
        None => (None, name),
    }
}

/// Returns `true` if `text` looks like a prefixed name, `word:word`, where
/// both parts consist of word characters only.
#[must_use]
pub fn looks_like_prefixed_name(text: &str) -> bool {
    let Some((prefix, local)) = text.split_once(':') else {
        return false;
    };
    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    is_word(prefix) && is_word(local)
}
