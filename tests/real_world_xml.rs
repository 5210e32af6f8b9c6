//! Integration tests on real-world XML formats.
//!
//! Smoke tests that parse, query and re-serialize the patterns found in
//! Atom feeds, SVG, XHTML, Maven POMs, Android manifests and SOAP.

#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;

use etree_oxide::parser::{fromstring, iterparse, PullEvent};
use etree_oxide::path::Namespaces;
use etree_oxide::serial::c14n::{canonicalize_str, C14nOptions};
use etree_oxide::serial::{tobytes, tostring, Method, NamespaceRegistry, WriteOptions};
use etree_oxide::{Document, NodeId};

fn parse_and_roundtrip(input: &str) -> Document {
    let doc = fromstring(input).unwrap_or_else(|e| panic!("parse failed: {e}"));
    let root = doc.root().unwrap();
    let output = tostring(&doc, root, &WriteOptions::default()).unwrap();
    let doc2 = fromstring(&output).unwrap_or_else(|e| panic!("roundtrip parse failed: {e}"));
    let root2 = doc2.root().unwrap();
    assert_eq!(doc.tag(root), doc2.tag(root2), "root tag mismatch after roundtrip");
    assert_eq!(
        doc.iter(root, None).count(),
        doc2.iter(root2, None).count(),
        "node count mismatch after roundtrip"
    );
    doc
}

fn ns(bindings: &[(&str, &str)]) -> Namespaces {
    bindings
        .iter()
        .map(|(p, u)| (p.to_string(), u.to_string()))
        .collect()
}

fn texts(doc: &Document, nodes: &[NodeId]) -> Vec<String> {
    nodes.iter().map(|&n| doc.text_content(n)).collect()
}

// --- Atom ---

const ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Feed</title>
  <link href="http://example.org/"/>
  <updated>2025-12-13T18:30:02Z</updated>
  <author>
    <name>John Doe</name>
  </author>
  <entry>
    <title>Atom-Powered Robots Run Amok</title>
    <link href="http://example.org/2003/12/13/atom03"/>
    <summary>Some text.</summary>
  </entry>
  <entry>
    <title>Second</title>
    <link rel="alternate" href="http://example.org/2"/>
  </entry>
</feed>"#;

#[test]
fn test_atom_feed() {
    let doc = parse_and_roundtrip(ATOM);
    let root = doc.root().unwrap();
    assert_eq!(doc.tag(root), Some("{http://www.w3.org/2005/Atom}feed"));

    let atom = ns(&[("a", "http://www.w3.org/2005/Atom")]);
    let titles = doc.findall(root, "a:entry/a:title", Some(&atom)).unwrap();
    assert_eq!(texts(&doc, &titles), ["Atom-Powered Robots Run Amok", "Second"]);
    assert_eq!(
        doc.findtext(root, "a:author/a:name", None, Some(&atom)).unwrap(),
        Some("John Doe".to_string())
    );

    let default_ns = ns(&[("", "http://www.w3.org/2005/Atom")]);
    let alternate = doc
        .find(root, ".//link[@rel='alternate']", Some(&default_ns))
        .unwrap()
        .unwrap();
    assert_eq!(doc.get(alternate, "href"), Some("http://example.org/2"));
}

#[test]
fn test_atom_with_default_namespace_output() {
    let doc = fromstring(ATOM).unwrap();
    let root = doc.root().unwrap();
    let out = tostring(
        &doc,
        root,
        &WriteOptions::default().default_namespace("http://www.w3.org/2005/Atom"),
    )
    .unwrap();
    assert!(out.starts_with(r#"<feed xmlns="http://www.w3.org/2005/Atom">"#));
    assert!(out.contains(r#"<link href="http://example.org/"/>"#));
}

#[test]
fn test_atom_streamed() {
    let events = iterparse(ATOM.as_bytes(), Some(&["start", "end"][..])).unwrap();
    let mut starts = 0;
    let mut ends = 0;
    for event in events {
        match event.unwrap() {
            PullEvent::Start(_) => starts += 1,
            PullEvent::End(_) => ends += 1,
            _ => {}
        }
    }
    assert_eq!(starts, 13);
    assert_eq!(ends, 13);
}

// --- SVG ---

#[test]
fn test_svg_document() {
    let xml = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="100" height="100" viewBox="0 0 100 100">
  <defs>
    <linearGradient id="grad1">
      <stop offset="0%" style="stop-color:rgb(255,255,0)"/>
      <stop offset="100%" style="stop-color:rgb(255,0,0)"/>
    </linearGradient>
  </defs>
  <circle cx="50" cy="50" r="40" fill="url(#grad1)"/>
  <use xlink:href="#grad1"/>
</svg>"##;

    let doc = parse_and_roundtrip(xml);
    let root = doc.root().unwrap();
    let svg = ns(&[("svg", "http://www.w3.org/2000/svg")]);
    let stops = doc.findall(root, ".//svg:stop", Some(&svg)).unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(doc.get(stops[1], "offset"), Some("100%"));

    let used = doc.find(root, "svg:use", Some(&svg)).unwrap().unwrap();
    assert_eq!(doc.get(used, "{http://www.w3.org/1999/xlink}href"), Some("#grad1"));

    let out = tostring(
        &doc,
        root,
        &WriteOptions::default().registry(NamespaceRegistry::well_known()),
    )
    .unwrap();
    assert!(out.starts_with("<ns0:svg"));
    assert!(out.contains(r##"<ns0:use ns1:href="#grad1"/>"##));
}

// --- XHTML ---

#[test]
fn test_xhtml_as_html() {
    let xml = r#"<html>
<head><title>Test</title><meta charset="utf-8"/><script>if (a &lt; b) { go(); }</script></head>
<body><p>Hello<br/>world</p><img src="a.png"/></body>
</html>"#;

    let doc = parse_and_roundtrip(xml);
    let root = doc.root().unwrap();
    let out = tostring(&doc, root, &WriteOptions::default().method(Method::Html)).unwrap();
    assert!(out.contains(r#"<meta charset="utf-8">"#));
    assert!(out.contains("<script>if (a < b) { go(); }</script>"));
    assert!(out.contains("<p>Hello<br>world</p><img src=\"a.png\">"));

    let text = tostring(&doc, root, &WriteOptions::default().method(Method::Text)).unwrap();
    assert!(text.contains("Helloworld"));
}

// --- Maven POM ---

#[test]
fn test_maven_pom() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="http://maven.apache.org/POM/4.0.0 http://maven.apache.org/xsd/maven-4.0.0.xsd">
  <modelVersion>4.0.0</modelVersion>
  <groupId>com.example</groupId>
  <artifactId>my-app</artifactId>
  <dependencies>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <scope>test</scope>
    </dependency>
    <dependency>
      <groupId>org.slf4j</groupId>
      <artifactId>slf4j-api</artifactId>
    </dependency>
  </dependencies>
</project>"#;

    let doc = parse_and_roundtrip(xml);
    let root = doc.root().unwrap();
    let pom = ns(&[("", "http://maven.apache.org/POM/4.0.0")]);
    let artifacts = doc
        .findall(root, "dependencies/dependency/artifactId", Some(&pom))
        .unwrap();
    assert_eq!(texts(&doc, &artifacts), ["junit", "slf4j-api"]);

    let test_scoped = doc
        .findall(root, "dependencies/dependency[scope='test']", Some(&pom))
        .unwrap();
    assert_eq!(test_scoped.len(), 1);
    assert_eq!(
        doc.findtext(test_scoped[0], "groupId", None, Some(&pom)).unwrap(),
        Some("junit".to_string())
    );
    assert_eq!(
        doc.findtext(root, "version", Some("none"), Some(&pom)).unwrap(),
        Some("none".to_string())
    );
}

// --- Android manifest ---

#[test]
fn test_android_manifest() {
    let xml = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
  <uses-permission android:name="android.permission.INTERNET"/>
  <application android:label="@string/app_name">
    <activity android:name=".MainActivity" android:exported="true"/>
    <activity android:name=".Settings"/>
  </application>
</manifest>"#;

    let doc = parse_and_roundtrip(xml);
    let root = doc.root().unwrap();
    let exported = doc
        .findall(
            root,
            "application/activity[@android:exported='true']",
            Some(&ns(&[("android", "http://schemas.android.com/apk/res/android")])),
        )
        .unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(
        doc.get(exported[0], "{http://schemas.android.com/apk/res/android}name"),
        Some(".MainActivity")
    );
}

// --- SOAP ---

#[test]
fn test_soap_envelope_canonical() {
    let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:m="http://example.org/stock" xmlns:unused="urn:unused">
  <soap:Body>
    <m:GetStockPrice>
      <m:StockName>IBM</m:StockName>
    </m:GetStockPrice>
  </soap:Body>
</soap:Envelope>"#;

    let canonical = canonicalize_str(xml, &C14nOptions::default().strip_text(true)).unwrap();
    assert_eq!(
        canonical,
        concat!(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<soap:Body><m:GetStockPrice xmlns:m="http://example.org/stock">"#,
            r#"<m:StockName>IBM</m:StockName></m:GetStockPrice></soap:Body></soap:Envelope>"#
        )
    );
}

// --- Character data ---

#[test]
fn test_cdata_and_entities_mixed() {
    let xml = "<doc><![CDATA[<raw> & data]]> &amp; &#x263A; &lt;tag&gt;</doc>";
    let doc = parse_and_roundtrip(xml);
    let root = doc.root().unwrap();
    assert_eq!(doc.text(root), Some("<raw> & data & \u{263A} <tag>"));
}

#[test]
fn test_unicode_content_encoded() {
    let xml = "<greeting lang=\"日本語\">こんにちは 🌍</greeting>";
    let doc = parse_and_roundtrip(xml);
    let root = doc.root().unwrap();
    let ascii = tobytes(&doc, root, &WriteOptions::default()).unwrap();
    assert_eq!(
        String::from_utf8(ascii).unwrap(),
        "<greeting lang=\"&#26085;&#26412;&#35486;\">&#12371;&#12435;&#12395;&#12385;&#12399; &#127757;</greeting>"
    );
}

#[test]
fn test_xml_with_byte_order_mark() {
    let mut doc = etree_oxide::parser::XmlPullParser::new(None).unwrap();
    doc.feed(b"\xEF\xBB\xBF<root>ok</root>").unwrap();
    let root = doc.close().unwrap();
    assert_eq!(doc.document().text(root), Some("ok"));
}

#[test]
fn test_deeply_nested() {
    let depth = 200;
    let xml = format!("{}{}", "<d>".repeat(depth), "</d>".repeat(depth));
    let doc = parse_and_roundtrip(&xml);
    let root = doc.root().unwrap();
    assert_eq!(doc.iter(root, Some("d")).count(), depth);
}
