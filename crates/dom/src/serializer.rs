//! DOM Serializer - Convert the live tree back to markup
//!
//! This module handles:
//! - Element/attribute/text serialization with HTML escaping
//! - Void and raw-text elements

use crate::arena::DomArena;
use crate::error::Result;
use crate::types::*;

/// Elements that never carry children or a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text is emitted verbatim
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// DOM Tree Serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct DomSerializer;

impl DomSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Serialize a node including its own tag
    pub fn outer_html(&self, arena: &DomArena, node_id: NodeId) -> Result<String> {
        let mut output = String::with_capacity(256);
        self.serialize_node(arena, node_id, false, &mut output)?;
        Ok(output)
    }

    /// Serialize only the children of a node
    pub fn inner_html(&self, arena: &DomArena, node_id: NodeId) -> Result<String> {
        let node = arena.get(node_id)?;
        let raw = node.tag_name().is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));

        let mut output = String::with_capacity(256);
        for &child_id in &node.children_ids {
            self.serialize_node(arena, child_id, raw, &mut output)?;
        }
        Ok(output)
    }

    fn serialize_node(
        &self,
        arena: &DomArena,
        node_id: NodeId,
        raw_text: bool,
        output: &mut String,
    ) -> Result<()> {
        let node = arena.get(node_id)?;

        match node.node_type {
            NodeType::Element => {
                output.push('<');
                output.push_str(&node.node_name);
                for (name, value) in &node.attributes {
                    output.push(' ');
                    output.push_str(name);
                    output.push_str("=\"");
                    output.push_str(&escape_attribute(value));
                    output.push('"');
                }
                output.push('>');

                if VOID_ELEMENTS.contains(&node.node_name.as_str()) {
                    return Ok(());
                }

                let raw = RAW_TEXT_ELEMENTS.contains(&node.node_name.as_str());
                for &child_id in &node.children_ids {
                    self.serialize_node(arena, child_id, raw, output)?;
                }

                output.push_str("</");
                output.push_str(&node.node_name);
                output.push('>');
            }
            NodeType::Text => {
                if raw_text {
                    output.push_str(&node.node_value);
                } else {
                    output.push_str(&escape_text(&node.node_value));
                }
            }
            NodeType::Comment => {
                output.push_str("<!--");
                output.push_str(&node.node_value);
                output.push_str("-->");
            }
            NodeType::Document | NodeType::DocumentFragment => {
                for &child_id in &node.children_ids {
                    self.serialize_node(arena, child_id, false, output)?;
                }
            }
        }

        Ok(())
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
