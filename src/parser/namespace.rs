//! Namespace scope tracking for the parser.

use crate::util::qname::{split_qname, XML_NAMESPACE};

/// In-scope `xmlns` declarations, one frame per open element. Lookups scan
/// the innermost frame first.
pub(crate) struct NamespaceScope {
    /// `None` is the default namespace.
    frames: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceScope {
    /// Starts with only the `xml` prefix bound.
    pub fn new() -> Self {
        Self {
            frames: vec![vec![(Some("xml".into()), XML_NAMESPACE.into())]],
        }
    }

    pub fn enter(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn leave(&mut self) {
        self.frames.pop();
    }

    /// Declares `prefix` on the innermost element.
    pub fn declare(&mut self, prefix: Option<&str>, uri: &str) {
        if let Some(innermost) = self.frames.last_mut() {
            innermost.push((prefix.map(str::to_owned), uri.to_string()));
        }
    }

    /// The URI bound to `prefix`. `xmlns=""` unbinds the default namespace.
    pub fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|decls| decls.iter().rev())
            .find(|(declared, _)| declared.as_deref() == prefix)
            .and_then(|(_, uri)| (!uri.is_empty()).then_some(uri.as_str()))
    }

    /// Expands a prefixed name to Clark notation.
    ///
    /// Unprefixed element names take the default namespace; unprefixed
    /// attribute names (`is_attribute`) never do. Returns `Err` with the
    /// prefix when it is unbound.
    pub fn expand<'n>(&self, name: &'n str, is_attribute: bool) -> Result<String, &'n str> {
        match split_qname(name) {
            (Some(prefix), local) => self
                .lookup(Some(prefix))
                .map(|uri| format!("{{{uri}}}{local}"))
                .ok_or(prefix),
            (None, local) if !is_attribute => Ok(match self.lookup(None) {
                Some(uri) => format!("{{{uri}}}{local}"),
                None => local.to_string(),
            }),
            (None, local) => Ok(local.to_string()),
        }
    }
}
