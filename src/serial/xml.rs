//! XML and text output, and the namespace pre-pass shared with HTML.

use std::collections::HashMap;

use crate::error::{Error, NamespaceError, SerializationError};
use crate::tree::{AttrValue, Document, NodeId, NodeKind};

use super::NamespaceRegistry;

/// Output names for every tag, attribute key and `QName` attribute value
/// of a subtree, and the namespace declarations they need.
pub(crate) struct QNameTable {
    /// Clark name -> output name (`prefix:local` or `local`).
    qnames: HashMap<String, String>,
    /// uri -> prefix; `""` is the default namespace.
    namespaces: HashMap<String, String>,
}

impl QNameTable {
    /// Walks the subtree once, assigning a prefix to each namespace URI:
    /// the default namespace gets none, a registered URI its registered
    /// prefix, any other URI `ns<N>` where N is the number of namespaces
    /// seen so far.
    pub(crate) fn build(
        doc: &Document,
        root: NodeId,
        default_namespace: Option<&str>,
        registry: &NamespaceRegistry,
    ) -> Result<Self, Error> {
        let mut table = Self {
            qnames: HashMap::new(),
            namespaces: HashMap::new(),
        };
        let default_namespace = default_namespace.filter(|uri| !uri.is_empty());
        if let Some(uri) = default_namespace {
            table.namespaces.insert(uri.to_string(), String::new());
        }
        for id in doc.iter(root, None) {
            if let NodeKind::Element { tag } = doc.kind(id) {
                table.add(tag, default_namespace.is_some(), registry)?;
            }
            for (key, value) in doc.attributes(id).iter() {
                table.add(key, default_namespace.is_some(), registry)?;
                if let AttrValue::QName(qname) = value {
                    table.add(qname.text(), default_namespace.is_some(), registry)?;
                }
            }
        }
        Ok(table)
    }

    fn add(
        &mut self,
        name: &str,
        has_default: bool,
        registry: &NamespaceRegistry,
    ) -> Result<(), Error> {
        if self.qnames.contains_key(name) {
            return Ok(());
        }
        let Some(rest) = name.strip_prefix('{') else {
            if has_default {
                return Err(NamespaceError::new(
                    "cannot use non-qualified names with default_namespace option",
                )
                .into());
            }
            self.qnames.insert(name.to_string(), name.to_string());
            return Ok(());
        };
        let Some((uri, local)) = rest.rsplit_once('}') else {
            return Err(SerializationError::new(format!("cannot serialize {name:?}")).into());
        };
        let prefix = match self.namespaces.get(uri) {
            Some(prefix) => prefix.clone(),
            None => {
                let prefix = registry
                    .prefix_for(uri)
                    .map_or_else(|| format!("ns{}", self.namespaces.len()), str::to_owned);
                if prefix != "xml" {
                    self.namespaces.insert(uri.to_string(), prefix.clone());
                }
                prefix
            }
        };
        let output = if prefix.is_empty() {
            local.to_string()
        } else {
            format!("{prefix}:{local}")
        };
        self.qnames.insert(name.to_string(), output);
        Ok(())
    }

    /// Output name for a Clark name seen by [`build`](Self::build).
    pub(crate) fn get<'a>(&'a self, name: &'a str) -> &'a str {
        self.qnames.get(name).map_or(name, String::as_str)
    }

    /// Writes the `xmlns` declarations, sorted by prefix.
    pub(crate) fn write_declarations(&self, out: &mut String) {
        let mut decls: Vec<(&str, &str)> = self
            .namespaces
            .iter()
            .map(|(uri, prefix)| (prefix.as_str(), uri.as_str()))
            .collect();
        decls.sort_unstable();
        for (prefix, uri) in decls {
            out.push_str(" xmlns");
            if !prefix.is_empty() {
                out.push(':');
                out.push_str(prefix);
            }
            out.push_str("=\"");
            escape_attr(out, uri);
            out.push('"');
        }
    }

    /// Writes the attributes of `id` in insertion order, passing plain values
    /// through `escape`.
    pub(crate) fn write_attributes(
        &self,
        doc: &Document,
        id: NodeId,
        out: &mut String,
        escape: fn(&mut String, &str),
    ) {
        for (key, value) in doc.attributes(id).iter() {
            out.push(' ');
            out.push_str(self.get(key));
            out.push_str("=\"");
            match value {
                AttrValue::QName(qname) => out.push_str(self.get(qname.text())),
                AttrValue::Text(text) => escape(out, text),
            }
            out.push('"');
        }
    }
}

pub(crate) fn write_xml(
    doc: &Document,
    root: NodeId,
    names: &QNameTable,
    short_empty_elements: bool,
    with_tail: bool,
    out: &mut String,
) {
    write_node(doc, root, names, short_empty_elements, true, out);
    if with_tail {
        write_tail(doc, root, out);
    }
}

fn write_node(
    doc: &Document,
    id: NodeId,
    names: &QNameTable,
    short_empty_elements: bool,
    declare: bool,
    out: &mut String,
) {
    let node = doc.node(id);
    let text = node.text.as_deref();
    match &node.kind {
        NodeKind::Comment => {
            out.push_str("<!--");
            out.push_str(text.unwrap_or_default());
            out.push_str("-->");
        }
        NodeKind::ProcessingInstruction => {
            out.push_str("<?");
            out.push_str(text.unwrap_or_default());
            out.push_str("?>");
        }
        NodeKind::Wrapper => {
            if let Some(text) = text {
                escape_text(out, text);
            }
            for &child in &node.children {
                write_node(doc, child, names, short_empty_elements, false, out);
                write_tail(doc, child, out);
            }
        }
        NodeKind::Element { tag } => {
            let tag = names.get(tag);
            out.push('<');
            out.push_str(tag);
            if declare {
                names.write_declarations(out);
            }
            names.write_attributes(doc, id, out, escape_attr);
            let has_text = text.is_some_and(|t| !t.is_empty());
            if has_text || !node.children.is_empty() || !short_empty_elements {
                out.push('>');
                if let Some(text) = text {
                    escape_text(out, text);
                }
                for &child in &node.children {
                    write_node(doc, child, names, short_empty_elements, false, out);
                    write_tail(doc, child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            } else {
                out.push_str("/>");
            }
        }
    }
}

fn write_tail(doc: &Document, id: NodeId, out: &mut String) {
    if let Some(tail) = doc.tail(id) {
        escape_text(out, tail);
    }
}

/// Writes the character data of the subtree followed by the root's tail.
pub(crate) fn write_text(doc: &Document, root: NodeId, out: &mut String) {
    for part in doc.itertext(root) {
        out.push_str(part);
    }
    if let Some(tail) = doc.tail(root) {
        out.push_str(tail);
    }
}

/// Escapes `&`, `<` and `>`.
pub(crate) fn escape_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

/// Escapes attribute values, including whitespace that attribute-value
/// normalization would otherwise turn into spaces on reparse.
pub(crate) fn escape_attr(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\r' => out.push_str("&#13;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#09;"),
            _ => out.push(ch),
        }
    }
}
