//! Behavioral properties that hold across components: parse/serialize
//! round-trips, canonical-form idempotence, query semantics, include
//! budgets and incremental tree building.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use etree_oxide::error::IncludeError;
use etree_oxide::parser::{fromstring, TreeBuilder, XmlTarget};
use etree_oxide::serial::c14n::{canonicalize_document, canonicalize_str, C14nOptions};
use etree_oxide::serial::{tostring, WriteOptions};
use etree_oxide::xinclude::{include, IncludeOptions, Loaded, ParseMode, XINCLUDE_NS};
use etree_oxide::{Document, NodeId};

// ---------------------------------------------------------------------------
// Tree snapshots
// ---------------------------------------------------------------------------

/// Plain-data view of an element subtree, with absent text as `""`.
#[derive(Debug, Clone, PartialEq)]
struct Elem {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    tail: String,
    children: Vec<Elem>,
}

fn snapshot(doc: &Document, id: NodeId) -> Elem {
    Elem {
        tag: doc.tag(id).unwrap_or_default().to_string(),
        attrs: doc
            .items(id)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        text: doc.text(id).unwrap_or_default().to_string(),
        tail: doc.tail(id).unwrap_or_default().to_string(),
        children: doc.children(id).iter().map(|&c| snapshot(doc, c)).collect(),
    }
}

fn build(doc: &mut Document, elem: &Elem) -> NodeId {
    let id = doc.create_element(
        elem.tag.as_str(),
        elem.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    );
    if !elem.text.is_empty() {
        doc.set_text(id, Some(&elem.text));
    }
    if !elem.tail.is_empty() {
        doc.set_tail(id, Some(&elem.tail));
    }
    for child in &elem.children {
        let child = build(doc, child);
        doc.append(id, child);
    }
    id
}

fn tag_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-c]{1,3}",
        "[a-c]{1,3}".prop_map(|local| format!("{{urn:a}}{local}")),
        "[a-c]{1,3}".prop_map(|local| format!("{{http://example.com/b}}{local}")),
    ]
}

fn text_strategy() -> impl Strategy<Value = String> {
    r#"[a-z &<>"'\n\t]{0,8}"#
}

fn elem_strategy() -> impl Strategy<Value = Elem> {
    let attrs = || prop::collection::btree_map("[a-d]{1,2}", text_strategy(), 0..3);
    let leaf = (tag_strategy(), attrs(), text_strategy(), text_strategy()).prop_map(
        |(tag, attrs, text, tail)| Elem {
            tag,
            attrs,
            text,
            tail,
            children: Vec::new(),
        },
    );
    leaf.prop_recursive(3, 24, 4, move |inner| {
        (
            tag_strategy(),
            attrs(),
            text_strategy(),
            text_strategy(),
            prop::collection::vec(inner, 0..4),
        )
            .prop_map(|(tag, attrs, text, tail, children)| Elem {
                tag,
                attrs,
                text,
                tail,
                children,
            })
    })
}

/// A document whose root has no tail, as any parsed document has.
fn document_from(elem: &Elem) -> (Document, Elem) {
    let mut root = elem.clone();
    root.tail.clear();
    let mut doc = Document::new();
    let id = build(&mut doc, &root);
    doc.set_root(id);
    (doc, root)
}

proptest! {
    #[test]
    fn prop_serialize_then_parse_reproduces_tree(elem in elem_strategy()) {
        let (doc, expected) = document_from(&elem);
        let xml = tostring(&doc, doc.root().unwrap(), &WriteOptions::default()).unwrap();
        let parsed = fromstring(&xml).unwrap();
        prop_assert_eq!(snapshot(&parsed, parsed.root().unwrap()), expected);
    }

    #[test]
    fn prop_canonical_form_is_idempotent(elem in elem_strategy(), rewrite in any::<bool>()) {
        let (doc, _) = document_from(&elem);
        let options = C14nOptions::default().rewrite_prefixes(rewrite);
        let once = canonicalize_document(&doc, doc.root().unwrap(), &options).unwrap();
        let twice = canonicalize_str(&once, &options).unwrap();
        prop_assert_eq!(twice, once);
    }
}

// ---------------------------------------------------------------------------
// Path queries
// ---------------------------------------------------------------------------

#[test]
fn test_find_and_attribute_predicates() {
    let doc = fromstring(r#"<a><b x="1"/><b/></a>"#).unwrap();
    let root = doc.root().unwrap();
    let bs = doc.children(root).to_vec();

    assert_eq!(doc.find(root, "b", None).unwrap(), Some(bs[0]));
    assert_eq!(doc.findall(root, "b", None).unwrap(), bs);
    assert_eq!(doc.findall(root, "b[@x]", None).unwrap(), [bs[0]]);
    assert_eq!(doc.findall(root, "b[@x='1']", None).unwrap(), [bs[0]]);
}

#[test]
fn test_positional_predicates() {
    let doc = fromstring("<a><b/><c/><b/></a>").unwrap();
    let root = doc.root().unwrap();
    let children = doc.children(root).to_vec();

    assert_eq!(doc.findall(root, "b[1]", None).unwrap(), [children[0]]);
    assert_eq!(doc.findall(root, "b[last()]", None).unwrap(), [children[2]]);
}

#[test]
fn test_extreme_positions_are_syntax_errors() {
    let doc = fromstring("<a><b/><b/></a>").unwrap();
    let root = doc.root().unwrap();
    assert!(doc.findall(root, "b[-9223372036854775808]", None).is_err());
    assert!(doc.findall(root, "b[last()-9223372036854775808]", None).is_err());
}

#[test]
fn test_descendants_in_document_order() {
    let doc = fromstring("<b><b><x><b/></x></b><b/></b>").unwrap();
    let root = doc.root().unwrap();
    let found = doc.findall(root, ".//b", None).unwrap();
    let expected: Vec<NodeId> = doc
        .iter(root, Some("b"))
        .filter(|&id| id != root)
        .collect();
    assert_eq!(found.len(), 3);
    assert_eq!(found, expected);
}

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

#[test]
fn test_rewrite_prefixes_ignores_original_prefixes() {
    let options = C14nOptions::default().rewrite_prefixes(true);
    let first = canonicalize_str(
        r#"<p:doc xmlns:p="urn:same" p:k="v"><p:item/></p:doc>"#,
        &options,
    )
    .unwrap();
    let second = canonicalize_str(
        r#"<doc xmlns="urn:same" xmlns:q="urn:same" q:k="v"><item/></doc>"#,
        &options,
    )
    .unwrap();
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// XInclude budgets
// ---------------------------------------------------------------------------

/// Serves `{k}.xml` for `k` in `1..=len`, each including the next.
fn chain_loader(len: usize) -> impl FnMut(&str, ParseMode, Option<&str>) -> Result<Option<Loaded>, IncludeError> {
    move |href: &str, _mode: ParseMode, _encoding: Option<&str>| {
        let Some(k) = href.strip_suffix(".xml").and_then(|n| n.parse::<usize>().ok()) else {
            return Ok(None);
        };
        if k == 0 || k > len {
            return Ok(None);
        }
        let body = if k < len {
            format!(r#"<l xmlns:xi="{XINCLUDE_NS}"><xi:include href="{}.xml"/></l>"#, k + 1)
        } else {
            "<l/>".to_string()
        };
        Ok(Some(Loaded::Tree(fromstring(&body).unwrap())))
    }
}

fn include_chain(len: usize, max_depth: i32) -> Result<(), IncludeError> {
    let mut doc =
        fromstring(&format!(r#"<doc xmlns:xi="{XINCLUDE_NS}"><xi:include href="1.xml"/></doc>"#))
            .unwrap();
    let root = doc.root().unwrap();
    let mut loader = chain_loader(len);
    include(
        &mut doc,
        root,
        &mut loader,
        &IncludeOptions::default().max_depth(Some(max_depth)),
    )
}

#[test]
fn test_include_depth_budget() {
    assert!(include_chain(6, 6).is_ok());
    let err = include_chain(7, 6).unwrap_err();
    assert!(err.is_recursion_limit());
}

#[test]
fn test_self_include_is_fatal() {
    let mut doc = fromstring(&format!(
        r#"<doc xmlns:xi="{XINCLUDE_NS}"><xi:include href="self.xml"/></doc>"#
    ))
    .unwrap();
    let root = doc.root().unwrap();
    let mut loader = |href: &str, _mode: ParseMode, _encoding: Option<&str>| {
        let body = format!(r#"<s xmlns:xi="{XINCLUDE_NS}"><xi:include href="{href}"/></s>"#);
        Ok::<_, IncludeError>(Some(Loaded::Tree(fromstring(&body).unwrap())))
    };
    let err = include(&mut doc, root, &mut loader, &IncludeOptions::default()).unwrap_err();
    assert!(matches!(err, IncludeError::Fatal { .. }));
}

// ---------------------------------------------------------------------------
// Tree building
// ---------------------------------------------------------------------------

#[test]
fn test_tree_builder_text_and_tail() {
    let mut builder = TreeBuilder::new();
    builder.start("a", &[]).unwrap();
    builder.data("x").unwrap();
    builder.start("b", &[]).unwrap();
    builder.data("y").unwrap();
    builder.end("b").unwrap();
    builder.data("z").unwrap();
    builder.end("a").unwrap();
    let a = builder.close().unwrap();

    let doc = builder.into_document();
    let b = doc.children(a)[0];
    assert_eq!(doc.text(a), Some("x"));
    assert_eq!(doc.text(b), Some("y"));
    assert_eq!(doc.tail(b), Some("z"));
}
