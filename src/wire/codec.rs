//! XML request/response encoding, built on `xmltree`.
//!
//! Frame format: a Unix stream socket carries UTF-8 XML documents
//! terminated by a single NUL byte. This module only handles the
//! document shape; NUL framing itself lives in [`crate::server`].

use std::borrow::Cow;
use std::collections::HashMap;

use xmltree::{Element, XMLNode};

use crate::domain::FsObject;
use crate::domain::fs_object::datetime_to_seconds;
use crate::error::{FsalError, FsalResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            ParamValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<String>> {
        match self {
            ParamValue::List(items) => Some(items),
            ParamValue::Text(_) => None,
        }
    }
}

/// Parse a NUL-stripped request document into `(command_type, params)`.
pub fn parse_request(xml: &[u8]) -> FsalResult<(String, HashMap<String, ParamValue>)> {
    let root = Element::parse(xml).map_err(|e| FsalError::Protocol(format!("malformed request xml: {e}")))?;
    if root.name != "request" {
        return Err(FsalError::Protocol(format!("expected <request>, got <{}>", root.name)));
    }
    let command = root
        .get_child("command")
        .ok_or_else(|| FsalError::Protocol("missing <command>".to_string()))?;
    let command_type = command
        .get_child("type")
        .and_then(Element::get_text)
        .ok_or_else(|| FsalError::Protocol("missing <command><type>".to_string()))?
        .into_owned();

    let mut params = HashMap::new();
    if let Some(params_el) = command.get_child("params") {
        for child in &params_el.children {
            let XMLNode::Element(el) = child else { continue };
            let has_nested_elements = el.children.iter().any(|c| matches!(c, XMLNode::Element(_)));
            if has_nested_elements {
                let items: Vec<String> = el
                    .children
                    .iter()
                    .filter_map(|c| match c {
                        XMLNode::Element(inner) => inner.get_text().map(Cow::into_owned),
                        _ => None,
                    })
                    .collect();
                params.insert(el.name.clone(), ParamValue::List(items));
            } else {
                let text = el.get_text().map(Cow::into_owned).unwrap_or_default();
                params.insert(el.name.clone(), ParamValue::Text(text));
            }
        }
    }
    Ok((command_type, params))
}

/// Serialize an XML element tree to a NUL-terminated byte buffer.
pub fn encode(element: &Element) -> FsalResult<Vec<u8>> {
    let mut buf = Vec::new();
    element
        .write(&mut buf)
        .map_err(|e| FsalError::Protocol(format!("failed to serialize response: {e}")))?;
    buf.push(0);
    Ok(buf)
}

pub fn success_response(params: Vec<Element>) -> Element {
    let mut result = Element::new("result");
    result.children.push(XMLNode::Element(text_field("success", "true")));
    let mut params_el = Element::new("params");
    for param in params {
        params_el.children.push(XMLNode::Element(param));
    }
    result.children.push(XMLNode::Element(params_el));

    let mut response = Element::new("response");
    response.children.push(XMLNode::Element(result));
    response
}

pub fn failure_response(error: &str) -> Element {
    let mut result = Element::new("result");
    result.children.push(XMLNode::Element(text_field("success", "false")));
    result.children.push(XMLNode::Element(text_field("error", error)));

    let mut response = Element::new("response");
    response.children.push(XMLNode::Element(result));
    response
}

pub fn text_field(name: &str, value: &str) -> Element {
    let mut el = Element::new(name);
    el.children.push(XMLNode::Text(value.to_string()));
    el
}

pub fn bool_field(name: &str, value: bool) -> Element {
    text_field(name, if value { "true" } else { "false" })
}

/// Build a container field whose children are tagged with the singular
/// form of `container_name` (strips the trailing character, e.g. `dirs`
/// -> `dir`).
pub fn list_field(container_name: &str, items: impl IntoIterator<Item = Element>) -> Element {
    let mut container = Element::new(container_name);
    for item in items {
        container.children.push(XMLNode::Element(item));
    }
    container
}

pub fn singular(tag: &str) -> &str {
    &tag[..tag.len().saturating_sub(1)]
}

/// `<dir>` or `<file>` node: `base-path`, `rel-path`, `size` (files only),
/// `create-timestamp`, `modify-timestamp`.
pub fn fso_field(fso: &FsObject) -> Element {
    let tag = if fso.is_dir() { "dir" } else { "file" };
    let mut el = Element::new(tag);
    el.children.push(XMLNode::Element(text_field("base-path", &fso.base_path.to_string_lossy())));
    el.children.push(XMLNode::Element(text_field("rel-path", &fso.rel_path)));
    if fso.is_file() {
        el.children.push(XMLNode::Element(text_field("size", &fso.size.to_string())));
    }
    el.children.push(XMLNode::Element(text_field(
        "create-timestamp",
        &datetime_to_seconds(fso.create_date).to_string(),
    )));
    el.children.push(XMLNode::Element(text_field(
        "modify-timestamp",
        &datetime_to_seconds(fso.modify_date).to_string(),
    )));
    el
}
