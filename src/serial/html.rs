//! HTML output.
//!
//! Differences from the XML method:
//!
//! - void elements (`br`, `img`, ...) never get an end tag, whatever their
//!   content
//! - other elements are never self-closed
//! - `script` and `style` text is written unescaped
//! - comment and processing-instruction text is escaped
//! - attribute values keep literal TAB, LF and CR

use crate::tree::{Document, NodeId, NodeKind};

use super::xml::{escape_text, QNameTable};

/// Elements without end tag, compared case-insensitively.
const VOID_ELEMENTS: [&str; 17] = [
    "area", "base", "basefont", "br", "col", "embed", "frame", "hr", "img", "input", "isindex",
    "link", "meta", "param", "source", "track", "wbr",
];

fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(tag))
}

fn is_raw_text_element(tag: &str) -> bool {
    tag.eq_ignore_ascii_case("script") || tag.eq_ignore_ascii_case("style")
}

pub(crate) fn write_html(doc: &Document, root: NodeId, names: &QNameTable, out: &mut String) {
    write_node(doc, root, names, true, out);
}

fn write_node(doc: &Document, id: NodeId, names: &QNameTable, declare: bool, out: &mut String) {
    let node = doc.node(id);
    let text = node.text.as_deref();
    match &node.kind {
        NodeKind::Comment => {
            out.push_str("<!--");
            escape_text(out, text.unwrap_or_default());
            out.push_str("-->");
        }
        NodeKind::ProcessingInstruction => {
            out.push_str("<?");
            escape_text(out, text.unwrap_or_default());
            out.push_str("?>");
        }
        NodeKind::Wrapper => {
            if let Some(text) = text {
                escape_text(out, text);
            }
            for &child in &node.children {
                write_node(doc, child, names, false, out);
            }
        }
        NodeKind::Element { tag } => {
            let tag = names.get(tag);
            out.push('<');
            out.push_str(tag);
            if declare {
                names.write_declarations(out);
            }
            names.write_attributes(doc, id, out, escape_attr_html);
            out.push('>');
            if let Some(text) = text {
                if is_raw_text_element(tag) {
                    out.push_str(text);
                } else {
                    escape_text(out, text);
                }
            }
            for &child in &node.children {
                write_node(doc, child, names, false, out);
            }
            if !is_void_element(tag) {
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
    if let Some(tail) = &node.tail {
        escape_text(out, tail);
    }
}

fn escape_attr_html(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}
