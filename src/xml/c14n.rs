//! Canonical XML serialization of buffered events.
//!
//! Implements the subset of inclusive Canonical XML 1.0 (without comments)
//! needed for signature digests:
//!
//! - namespace declarations in scope at the apex element are rendered on it
//! - redundant namespace declarations are dropped
//! - namespace declarations come first, sorted by prefix
//! - attributes follow, sorted by namespace URI then local name, unqualified first
//! - empty elements are written as start/end pairs
//! - text and attribute values use canonical escaping

use super::{read_events, SaxEvent};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Canonicalize a balanced event sequence.
///
/// `inherited` lists the `(prefix, uri)` namespace bindings in scope at the
/// parent of the first element, with the empty prefix for the default
/// namespace.
pub fn canonicalize(events: &[SaxEvent], inherited: &[(String, String)]) -> Result<Vec<u8>> {
    let mut out = String::new();
    // Rendered bindings per open element
    let mut rendered: Vec<BTreeMap<String, String>> = Vec::new();

    for event in events {
        match event {
            SaxEvent::StartElement { name, attributes } => {
                let parent = rendered.last().cloned().unwrap_or_default();
                let mut candidates: BTreeMap<String, String> = BTreeMap::new();
                if rendered.is_empty() {
                    for (prefix, uri) in inherited {
                        candidates.insert(prefix.clone(), uri.clone());
                    }
                }
                let mut plain: Vec<(&str, &str)> = Vec::new();
                for (key, value) in attributes.iter() {
                    match namespace_prefix(key) {
                        Some(prefix) => {
                            candidates.insert(prefix.to_string(), value.to_string());
                        },
                        None => plain.push((key, value)),
                    }
                }

                let mut scope = parent.clone();
                let mut declarations = Vec::new();
                for (prefix, uri) in candidates {
                    let current = parent.get(&prefix).map(String::as_str).unwrap_or("");
                    if current == uri {
                        continue;
                    }
                    declarations.push((prefix.clone(), uri.clone()));
                    scope.insert(prefix, uri);
                }
                plain.sort_by_cached_key(|(key, _)| attribute_sort_key(key, &scope));

                out.push('<');
                out.push_str(name);
                for (prefix, uri) in &declarations {
                    if prefix.is_empty() {
                        out.push_str(" xmlns=\"");
                    } else {
                        out.push_str(" xmlns:");
                        out.push_str(prefix);
                        out.push_str("=\"");
                    }
                    escape_attribute(uri, &mut out);
                    out.push('"');
                }
                for (key, value) in plain {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    escape_attribute(value, &mut out);
                    out.push('"');
                }
                out.push('>');
                rendered.push(scope);
            },
            SaxEvent::EndElement { name } => {
                if rendered.pop().is_none() {
                    return Err(Error::Xml(format!("unbalanced end element {}", name)));
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            },
            SaxEvent::Characters(text) => {
                if !rendered.is_empty() {
                    escape_text(text, &mut out);
                }
            },
            SaxEvent::StartDocument | SaxEvent::EndDocument => {},
        }
    }

    if !rendered.is_empty() {
        return Err(Error::Xml(format!(
            "{} element(s) left open in canonicalized range",
            rendered.len()
        )));
    }
    Ok(out.into_bytes())
}

/// Parse and canonicalize a complete document.
pub fn canonicalize_document(xml: &[u8]) -> Result<Vec<u8>> {
    let mut events = Vec::new();
    read_events(xml, |event| {
        events.push(event);
        Ok(())
    })?;
    canonicalize(&events, &[])
}

/// Namespace bindings in scope after the given chain of open start elements.
pub fn in_scope_namespaces<'a, I>(ancestors: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = &'a super::Attributes>,
{
    let mut scope: BTreeMap<String, String> = BTreeMap::new();
    for attributes in ancestors {
        for (key, value) in attributes.iter() {
            if let Some(prefix) = namespace_prefix(key) {
                scope.insert(prefix.to_string(), value.to_string());
            }
        }
    }
    scope.into_iter().filter(|(_, uri)| !uri.is_empty()).collect()
}

/// `(namespace URI, local name)` of an attribute. Unqualified attributes
/// have no namespace and sort first.
fn attribute_sort_key(key: &str, scope: &BTreeMap<String, String>) -> (String, String) {
    match key.split_once(':') {
        Some((prefix, local)) => {
            let uri = match prefix {
                "xml" => XML_NAMESPACE,
                _ => scope.get(prefix).map(String::as_str).unwrap_or(prefix),
            };
            (uri.to_string(), local.to_string())
        },
        None => (String::new(), key.to_string()),
    }
}

/// Prefix declared by an `xmlns` / `xmlns:p` attribute, `""` for the default.
fn namespace_prefix(key: &str) -> Option<&str> {
    if key == "xmlns" {
        Some("")
    } else {
        key.strip_prefix("xmlns:")
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{parse_document, Attributes};

    fn c14n(xml: &str) -> String {
        String::from_utf8(canonicalize_document(xml.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_empty_elements_and_attribute_order() {
        assert_eq!(c14n(r#"<a z="1" b="2"><e/></a>"#), r#"<a b="2" z="1"><e></e></a>"#);
    }

    #[test]
    fn test_qualified_attributes_sorted_by_namespace_uri() {
        assert_eq!(
            c14n(r#"<r xmlns:z="urn:a" xmlns:a="urn:z" z:p="1" a:q="2" b="3"/>"#),
            r#"<r xmlns:a="urn:z" xmlns:z="urn:a" b="3" z:p="1" a:q="2"></r>"#
        );
    }

    #[test]
    fn test_inherited_prefix_and_xml_namespace_order() {
        let inherited = vec![(
            "xlink".to_string(),
            "http://www.w3.org/1999/xlink".to_string(),
        )];
        let events = vec![
            SaxEvent::start(
                "e",
                Attributes::new()
                    .with("xml:lang", "de")
                    .with("xlink:href", "a.png")
                    .with("id", "1"),
            ),
            SaxEvent::end("e"),
        ];
        let out = String::from_utf8(canonicalize(&events, &inherited).unwrap()).unwrap();
        assert_eq!(
            out,
            r#"<e xmlns:xlink="http://www.w3.org/1999/xlink" id="1" xlink:href="a.png" xml:lang="de"></e>"#
        );
    }

    #[test]
    fn test_redundant_namespace_dropped() {
        assert_eq!(
            c14n(r#"<a xmlns="urn:x"><b xmlns="urn:x"/><c xmlns="urn:y"/></a>"#),
            r#"<a xmlns="urn:x"><b></b><c xmlns="urn:y"></c></a>"#
        );
    }

    #[test]
    fn test_namespaces_sorted_before_attributes() {
        assert_eq!(
            c14n(r#"<a Id="i" xmlns:z="urn:z" xmlns="urn:d"/>"#),
            r#"<a xmlns="urn:d" xmlns:z="urn:z" Id="i"></a>"#
        );
    }

    #[test]
    fn test_escaping() {
        assert_eq!(
            c14n("<a t=\"&quot;&#9;\">&lt;&gt;&amp;</a>"),
            "<a t=\"&quot;&#x9;\">&lt;&gt;&amp;</a>"
        );
    }

    #[test]
    fn test_subtree_carries_inherited_namespaces() {
        let doc = parse_document(br#"<r xmlns="urn:r" xmlns:p="urn:p"><s Id="x">v</s></r>"#)
            .unwrap();
        // events[2..5] is the <s> subtree
        let sub = &doc[2..5];
        let inherited = in_scope_namespaces([match &doc[1] {
            SaxEvent::StartElement { attributes, .. } => attributes,
            _ => unreachable!(),
        }]);
        let out = String::from_utf8(canonicalize(sub, &inherited).unwrap()).unwrap();
        assert_eq!(out, r#"<s xmlns="urn:r" xmlns:p="urn:p" Id="x">v</s>"#);

        // Canonicalizing the subtree alone matches canonicalizing it in place
        let standalone = String::from_utf8(
            canonicalize_document(br#"<s xmlns="urn:r" xmlns:p="urn:p" Id="x">v</s>"#).unwrap(),
        )
        .unwrap();
        assert_eq!(out, standalone);
    }

    #[test]
    fn test_unbalanced_range_rejected() {
        let events = vec![SaxEvent::start("a", Attributes::new())];
        assert!(canonicalize(&events, &[]).is_err());
        let events = vec![SaxEvent::end("a")];
        assert!(canonicalize(&events, &[]).is_err());
    }
}
