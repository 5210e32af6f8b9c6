use crate::error::UsageError;
use crate::tree::{Document, NodeId};

/// Pretty-prints the subtree at `node` in place by rewriting whitespace-only
/// `text` and `tail` values, `space` per nesting level. `level` is the
/// depth of `node` itself, for indenting a subtree of a larger document.
///
/// Text and tails holding anything but whitespace are left alone.
///
/// # Errors
///
/// Returns [`UsageError`] if `level` is negative.
///
/// # Examples
///
/// ```
/// use etree_oxide::parser::fromstring;
/// use etree_oxide::serial::{indent, tostring, WriteOptions};
///
/// let mut doc = fromstring("<a><b><c/></b><d/></a>").unwrap();
/// let root = doc.root().unwrap();
/// indent(&mut doc, root, "  ", 0).unwrap();
/// let xml = tostring(&doc, root, &WriteOptions::default()).unwrap();
/// assert_eq!(xml, "<a>\n  <b>\n    <c/>\n  </b>\n  <d/>\n</a>");
/// ```
pub fn indent(doc: &mut Document, node: NodeId, space: &str, level: i32) -> Result<(), UsageError> {
    let Ok(level) = usize::try_from(level) else {
        return Err(UsageError::new(format!(
            "initial indentation level must be >= 0, got {level}"
        )));
    };
    if doc.len(node) == 0 {
        return Ok(());
    }
    let mut indentations = vec![format!("\n{}", space.repeat(level))];
    indent_children(doc, node, 0, space, &mut indentations);
    Ok(())
}

fn is_blank(text: Option<&str>) -> bool {
    text.map_or(true, |t| t.trim().is_empty())
}

fn indent_children(
    doc: &mut Document,
    elem: NodeId,
    level: usize,
    space: &str,
    indentations: &mut Vec<String>,
) {
    let child_level = level + 1;
    if indentations.len() <= child_level {
        let next = format!("{}{space}", indentations[level]);
        indentations.push(next);
    }
    let child_indentation = indentations[child_level].clone();

    if is_blank(doc.text(elem)) {
        doc.set_text(elem, Some(&child_indentation));
    }
    let children = doc.children(elem).to_vec();
    for &child in &children {
        if doc.len(child) > 0 {
            indent_children(doc, child, child_level, space, indentations);
        }
        if is_blank(doc.tail(child)) {
            doc.set_tail(child, Some(&child_indentation));
        }
    }
    // dedent after the last child
    if let Some(&last) = children.last() {
        if is_blank(doc.tail(last)) {
            doc.set_tail(last, Some(&indentations[level]));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::fromstring;
    use crate::serial::{tostring, WriteOptions};
    use pretty_assertions::assert_eq;

    fn indented(src: &str, space: &str, level: i32) -> String {
        let mut doc = fromstring(src).unwrap();
        let root = doc.root().unwrap();
        indent(&mut doc, root, space, level).unwrap();
        tostring(&doc, root, &WriteOptions::default()).unwrap()
    }

    #[test]
    fn test_reindents_existing_whitespace() {
        assert_eq!(
            indented("<a>\n<b>   </b>\n\n   <c/></a>", "\t", 0),
            "<a>\n\t<b>   </b>\n\t<c/>\n</a>"
        );
    }

    #[test]
    fn test_mixed_content_untouched() {
        assert_eq!(
            indented("<a>text<b/>more</a>", "  ", 0),
            "<a>text<b/>more</a>"
        );
    }

    #[test]
    fn test_initial_level() {
        assert_eq!(indented("<a><b/></a>", " ", 2), "<a>\n   <b/>\n  </a>");
    }

    #[test]
    fn test_leaf_and_negative_level() {
        assert_eq!(indented("<a/>", "  ", 0), "<a/>");
        let mut doc = fromstring("<a/>").unwrap();
        let root = doc.root().unwrap();
        assert!(indent(&mut doc, root, "  ", -1).is_err());
    }
}
