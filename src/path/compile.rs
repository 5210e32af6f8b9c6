//! Path compilation and evaluation.
//!
//! A path compiles to a [`CompiledPath`]: an ordered list of [`Selector`]s.
//! Evaluation threads a lazy node iterator through the selectors, starting
//! from the context node. Selectors own their data, so the iterator they
//! produce only borrows the document.

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::PathSyntaxError;
use crate::tree::{Document, NodeId};

use super::lexer::{tokenize, Token};
use super::{Namespaces, NodeIter};

/// Per-evaluation state shared by the selectors of one query.
pub(crate) struct QueryContext<'a> {
    doc: &'a Document,
    root: NodeId,
    parent_map: OnceCell<HashMap<NodeId, NodeId>>,
}

impl<'a> QueryContext<'a> {
    fn new(doc: &'a Document, root: NodeId) -> Self {
        Self {
            doc,
            root,
            parent_map: OnceCell::new(),
        }
    }

    /// Child-to-parent links for the subtree under the context node, built
    /// on first use.
    fn parent_map(&self) -> &HashMap<NodeId, NodeId> {
        self.parent_map.get_or_init(|| {
            let mut map = HashMap::new();
            for parent in self.doc.iter(self.root, None) {
                for &child in self.doc.children(parent) {
                    map.insert(child, parent);
                }
            }
            map
        })
    }
}

/// A tag test, possibly with wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TagTest {
    /// Every node, comments and processing instructions included.
    All,
    /// An exact tag.
    Exact(String),
    /// `{*}*`: any element.
    AnyElement,
    /// `{}*`: any element without a namespace.
    NoNamespace,
    /// `{*}local`: `local` in any namespace or none.
    AnyNamespace {
        local: String,
        /// `}local`
        suffix: String,
    },
    /// `{uri}*`: any element in one namespace. Holds `{uri}`.
    InNamespace(String),
}

impl TagTest {
    fn parse(tag: &str) -> Self {
        if tag == "{*}*" {
            Self::AnyElement
        } else if tag == "{}*" {
            Self::NoNamespace
        } else if let Some(local) = tag.strip_prefix("{*}") {
            Self::AnyNamespace {
                local: local.to_string(),
                suffix: tag[2..].to_string(),
            }
        } else if let Some(ns) = tag.strip_suffix('*').filter(|ns| ns.ends_with('}')) {
            Self::InNamespace(ns.to_string())
        } else {
            // '{}tag' == 'tag'
            Self::Exact(tag.strip_prefix("{}").unwrap_or(tag).to_string())
        }
    }

    fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let tag = doc.tag(id);
        match self {
            Self::All => true,
            Self::Exact(expected) => tag == Some(expected.as_str()),
            Self::AnyElement => tag.is_some(),
            Self::NoNamespace => tag.is_some_and(|t| !t.starts_with('{')),
            Self::AnyNamespace { local, suffix } => {
                tag.is_some_and(|t| t == local || t.ends_with(suffix.as_str()))
            }
            Self::InNamespace(ns) => tag.is_some_and(|t| t.starts_with(ns.as_str())),
        }
    }
}

/// Sibling position selected by an index predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    /// 0-based position from the start.
    Index(usize),
    /// 1-based position from the end: `FromLast(1)` is `last()`.
    FromLast(usize),
}

/// A bracketed filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Predicate {
    /// `[@key]`
    AttrPresent(String),
    /// `[@key='value']`
    AttrEquals { key: String, value: String },
    /// `[tag]`
    ChildTagPresent(TagTest),
    /// `[.='value']` (target `None`) or `[tag='value']`.
    TextEquals {
        target: Option<TagTest>,
        value: String,
    },
    /// `[n]`, `[last()]`, `[last()-n]`, counted among same-tag siblings.
    Position(Position),
}

impl Predicate {
    fn parse(tokens: &[Token]) -> Result<Self, PathSyntaxError> {
        use Token::{Literal, Name, Op};

        let predicate = match tokens {
            [Op("@"), Name(key)] => Self::AttrPresent(key.clone()),
            [Op("@"), Name(key), Op("="), Literal(value)] => Self::AttrEquals {
                key: key.clone(),
                value: value.clone(),
            },
            [Name(tag)] if !is_integer(tag) => Self::ChildTagPresent(TagTest::parse(tag)),
            [Op("."), Op("="), Literal(value)] => Self::TextEquals {
                target: None,
                value: value.clone(),
            },
            [Name(tag), Op("="), Literal(value)] if !is_integer(tag) => Self::TextEquals {
                target: Some(TagTest::parse(tag)),
                value: value.clone(),
            },
            [Name(number)] => {
                let position = number
                    .parse::<i64>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| PathSyntaxError::new("XPath position >= 1 expected"))?;
                Self::Position(Position::Index(position))
            }
            [Name(function), Op("()"), rest @ ..] if rest.len() <= 1 => {
                if function != "last" {
                    return Err(PathSyntaxError::new("unsupported function"));
                }
                let from_last = match rest {
                    [Name(offset)] => {
                        let offset = offset
                            .parse::<i64>()
                            .map_err(|_| PathSyntaxError::new("unsupported expression"))?;
                        if offset > -1 {
                            return Err(PathSyntaxError::new(
                                "XPath offset from last() must be negative",
                            ));
                        }
                        1i64.checked_sub(offset)
                            .and_then(|n| usize::try_from(n).ok())
                            .ok_or_else(|| PathSyntaxError::new("unsupported expression"))?
                    }
                    [] => 1,
                    _ => return Err(PathSyntaxError::new("invalid predicate")),
                };
                Self::Position(Position::FromLast(from_last))
            }
            _ => return Err(PathSyntaxError::new("invalid predicate")),
        };
        Ok(predicate)
    }

    fn matches(&self, ctx: &QueryContext<'_>, id: NodeId) -> bool {
        let doc = ctx.doc;
        match self {
            Self::AttrPresent(key) => doc.get(id, key).is_some(),
            Self::AttrEquals { key, value } => doc.get(id, key) == Some(value.as_str()),
            Self::ChildTagPresent(test) => doc.children(id).iter().any(|&c| test.matches(doc, c)),
            Self::TextEquals {
                target: None,
                value,
            } => doc.text_content(id) == *value,
            Self::TextEquals {
                target: Some(test),
                value,
            } => doc
                .children(id)
                .iter()
                .any(|&c| test.matches(doc, c) && doc.text_content(c) == *value),
            Self::Position(position) => {
                let Some(&parent) = ctx.parent_map().get(&id) else {
                    return false;
                };
                let tag = doc.tag(id);
                let siblings: Vec<NodeId> = doc
                    .children(parent)
                    .iter()
                    .copied()
                    .filter(|&c| doc.tag(c) == tag)
                    .collect();
                let index = match *position {
                    Position::Index(index) => Some(index),
                    Position::FromLast(n) => siblings.len().checked_sub(n),
                };
                index.and_then(|i| siblings.get(i)) == Some(&id)
            }
        }
    }
}

/// True for an optionally signed run of ASCII digits.
fn is_integer(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// One step of a compiled path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selector {
    /// `tag`: children passing the test.
    Child(TagTest),
    /// `*`: all children.
    Star,
    /// `.`
    SelfNode,
    /// `..`: parents, each yielded once.
    Parent,
    /// `//tag`: descendants (not the node itself) passing the test.
    Descendant(TagTest),
    /// `[...]`
    Filter(Predicate),
}

impl Selector {
    fn apply<'a>(&self, ctx: &Rc<QueryContext<'a>>, input: NodeIter<'a>) -> NodeIter<'a> {
        let doc = ctx.doc;
        match self {
            Self::Child(test) => {
                let test = test.clone();
                Box::new(
                    input
                        .flat_map(move |e| doc.children(e).iter().copied())
                        .filter(move |&c| test.matches(doc, c)),
                )
            }
            Self::Star => Box::new(input.flat_map(move |e| doc.children(e).iter().copied())),
            Self::SelfNode => input,
            Self::Parent => {
                let ctx = Rc::clone(ctx);
                let mut seen = HashSet::new();
                Box::new(input.filter_map(move |e| {
                    let parent = *ctx.parent_map().get(&e)?;
                    seen.insert(parent).then_some(parent)
                }))
            }
            Self::Descendant(test) => {
                let test = test.clone();
                Box::new(
                    input
                        .flat_map(move |e| doc.iter(e, None).filter(move |&d| d != e))
                        .filter(move |&d| test.matches(doc, d)),
                )
            }
            Self::Filter(predicate) => {
                let predicate = predicate.clone();
                let ctx = Rc::clone(ctx);
                Box::new(input.filter(move |&e| predicate.matches(&ctx, e)))
            }
        }
    }
}

/// A compiled path: the selector pipeline for one path string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPath {
    steps: Vec<Selector>,
}

impl CompiledPath {
    /// Compiles a relative path.
    ///
    /// # Errors
    ///
    /// Returns `PathSyntaxError` for an unknown prefix, a malformed step or
    /// predicate, or an absolute path.
    pub fn compile(path: &str, namespaces: Option<&Namespaces>) -> Result<Self, PathSyntaxError> {
        if path.starts_with('/') {
            return Err(PathSyntaxError::new("cannot use absolute path on element"));
        }
        let mut tokens = tokenize(path, namespaces)?.into_iter();
        let mut steps = Vec::new();
        let Some(mut token) = tokens.next() else {
            return Ok(Self { steps });
        };
        loop {
            steps.push(selector_for(token, &mut tokens)?);
            token = match tokens.next() {
                Some(Token::Op("/")) => match tokens.next() {
                    Some(token) => token,
                    None => break,
                },
                Some(token) => token,
                None => break,
            };
        }
        Ok(Self { steps })
    }

    /// Number of selectors in the pipeline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` for the empty path, which matches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Lazily evaluates the path against `node`.
    #[must_use]
    pub fn select<'a>(&self, doc: &'a Document, node: NodeId) -> NodeIter<'a> {
        if self.steps.is_empty() {
            return Box::new(std::iter::empty());
        }
        let ctx = Rc::new(QueryContext::new(doc, node));
        let mut result: NodeIter<'a> = Box::new(std::iter::once(node));
        for step in &self.steps {
            result = step.apply(&ctx, result);
        }
        result
    }
}

fn selector_for(
    token: Token,
    tokens: &mut impl Iterator<Item = Token>,
) -> Result<Selector, PathSyntaxError> {
    let selector = match token {
        Token::Name(tag) => Selector::Child(TagTest::parse(&tag)),
        Token::Op("*") => Selector::Star,
        Token::Op(".") => Selector::SelfNode,
        Token::Op("..") => Selector::Parent,
        Token::Op("//") => match tokens.next() {
            Some(Token::Op("*")) => Selector::Descendant(TagTest::All),
            Some(Token::Name(tag)) => Selector::Descendant(TagTest::parse(&tag)),
            _ => return Err(PathSyntaxError::new("invalid descendant")),
        },
        Token::Op("[") => {
            let mut predicate = Vec::new();
            loop {
                match tokens.next() {
                    Some(Token::Op("]")) => break,
                    Some(token) => predicate.push(token),
                    None => return Err(PathSyntaxError::new("invalid predicate")),
                }
            }
            Selector::Filter(Predicate::parse(&predicate)?)
        }
        _ => return Err(PathSyntaxError::new("invalid path")),
    };
    Ok(selector)
}
