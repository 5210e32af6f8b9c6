//! # etree-oxide
//!
//! An in-memory XML element tree in the ElementTree tradition: elements
//! carry a tag, attributes, `text` and `tail`, and children. On top of the
//! tree sit an incremental parser, a path query language, XML/HTML/text
//! serialization, Canonical XML 2.0 and `XInclude`.
//!
//! ## Quick Start
//!
//! ```
//! use etree_oxide::parser::fromstring;
//! use etree_oxide::serial::{tostring, WriteOptions};
//!
//! let mut doc = fromstring(r#"<shop><item price="3">tea</item><item>cake</item></shop>"#).unwrap();
//! let root = doc.root().unwrap();
//!
//! let priced = doc.findall(root, "item[@price]", None).unwrap();
//! assert_eq!(doc.text(priced[0]), Some("tea"));
//!
//! let item = doc.sub_element(root, "item", [("price", "1")]);
//! doc.set_text(item, Some("bun"));
//! assert_eq!(
//!     tostring(&doc, root, &WriteOptions::default()).unwrap(),
//!     r#"<shop><item price="3">tea</item><item>cake</item><item price="1">bun</item></shop>"#
//! );
//! ```
//!
//! ## Modules
//!
//! - [`tree`]: the [`Document`] arena and node accessors
//! - [`parser`]: push, pull and one-shot parsing
//! - [`path`]: the path query engine behind `find`/`findall`
//! - [`serial`]: serialization, pretty-printing and canonicalization
//! - [`xinclude`]: `XInclude` processing

pub mod encoding;
pub mod error;
pub mod parser;
pub mod path;
pub mod serial;
pub mod tree;
pub mod util;
pub mod xinclude;

// Re-export primary types at the crate root for convenience.
pub use error::Error;
pub use tree::{AttrValue, Attributes, Document, NodeId, NodeKind};
pub use util::qname::QName;
