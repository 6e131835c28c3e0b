//! Generic XML-to-JSON folding used to read the upstream RTMP server's
//! statistics document.
//!
//! Grounded on `original_source/dss/noxml.py`: a single child of a given
//! tag collapses to that child's value directly; repeated siblings with
//! the same tag become an array; attributes are merged into the same
//! object as child elements; a leaf with only text content becomes that
//! text. No RTMP-specific knowledge lives here — callers walk the
//! resulting [`Value`] themselves.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
}

/// Parses an XML document into an opaque nested [`Value`] tree.
///
/// # Errors
///
/// Returns an error if `xml` is not well-formed.
pub fn parse(xml: &str) -> Result<Value, anyhow::Error> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event(&mut buf)? {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name()).into_owned();
                let mut attrs = Vec::new();
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key).into_owned();
                    let value = attr.unescape_and_decode_value(&reader)?;
                    attrs.push((key, value));
                }
                stack.push(Node {
                    tag,
                    attrs,
                    children: Vec::new(),
                    text: String::new(),
                });
            }
            Event::Empty(e) => {
                let tag = String::from_utf8_lossy(e.name()).into_owned();
                let mut attrs = Vec::new();
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key).into_owned();
                    let value = attr.unescape_and_decode_value(&reader)?;
                    attrs.push((key, value));
                }
                let node = Node {
                    tag,
                    attrs,
                    children: Vec::new(),
                    text: String::new(),
                };
                push_finished(&mut stack, node);
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape_and_decode(&reader)?);
                }
            }
            Event::End(_) => {
                let Some(node) = stack.pop() else {
                    continue;
                };
                push_finished(&mut stack, node);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let root = stack
        .pop()
        .ok_or_else(|| anyhow::anyhow!("empty XML document"))?;
    Ok(node_to_value(root, true))
}

fn push_finished(stack: &mut Vec<Node>, node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else {
        stack.push(node);
    }
}

fn node_to_value(node: Node, root_tag: bool) -> Value {
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for child in node.children {
        let tag = child.tag.clone();
        grouped
            .entry(tag)
            .or_default()
            .push(node_to_value(child, false));
    }

    let mut place = Map::new();
    for (key, value) in node.attrs {
        place.insert(key, Value::String(value));
    }
    for (tag, mut values) in grouped {
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        };
        place.insert(tag, value);
    }

    if root_tag {
        place.insert("@tag".to_string(), Value::String(node.tag));
    }

    let text = node.text.trim();
    if !text.is_empty() {
        if place.is_empty() {
            return Value::String(text.to_string());
        }
        place.insert("@text".to_string(), Value::String(text.to_string()));
    }

    if place.is_empty() {
        return Value::Null;
    }
    Value::Object(place)
}

#[cfg(test)]
mod statstree_spec {
    use super::*;

    #[test]
    fn single_child_collapses_to_object() {
        let v = parse("<server><name>origin</name></server>").unwrap();
        assert_eq!(v["name"], Value::String("origin".to_string()));
    }

    #[test]
    fn repeated_siblings_become_an_array() {
        let v = parse(
            "<application><live><stream name=\"A\" nclients=\"2\"/>\
             <stream name=\"B\" nclients=\"1\"/></live></application>",
        )
        .unwrap();
        let streams = v["live"]["stream"].as_array().unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0]["name"], Value::String("A".to_string()));
    }

    #[test]
    fn single_stream_is_not_wrapped_in_an_array() {
        let v = parse(
            "<application><live><stream name=\"A\" nclients=\"2\"/></live></application>",
        )
        .unwrap();
        assert!(v["live"]["stream"].is_object());
    }
}
