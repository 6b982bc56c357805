//! Core type definitions for the live document tree
//!
//! Key design principles:
//! 1. Use u32 for indices (4 bytes vs 8 bytes pointer)
//! 2. Node identity is the index: two handles are the same element iff the ids match
//! 3. Use SmallVec for small arrays (avoid heap allocation)

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Node identifier (index into arena)
/// u32 allows 4 billion nodes, enough for any webpage
pub type NodeId = u32;

/// Attribute tagging an element that may survive a page transition
pub const ATTR_PERSIST_ID: &str = "persist-id";

/// Attribute keeping a persistent element even when the next page lacks it
pub const ATTR_PERSIST_PERMANENT: &str = "persist-permanent";

/// Node type matching DOM specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    Element = 1,
    Text = 3,
    Comment = 8,
    Document = 9,
    DocumentFragment = 11,
}

/// Document loading progress, mirrors `document.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

/// Rectangle with coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DomRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check if rectangle intersects with another
    pub fn intersects(&self, other: &DomRect) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }
}

/// The main DOM tree node structure
///
/// Design philosophy:
/// - Small fixed-size fields first (better packing)
/// - Use indices instead of pointers
/// - Attributes keep source order (scripts are re-created attribute by attribute)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomNode {
    pub node_id: NodeId,
    pub node_type: NodeType,

    // Navigation indices
    pub parent_id: Option<NodeId>,
    pub children_ids: SmallVec<[NodeId; 4]>, // Most nodes have <4 children

    /// Lowercase tag name for elements, `#text` / `#comment` otherwise
    pub node_name: String,
    pub node_value: String,
    pub attributes: SmallVec<[(String, String); 4]>,

    /// Set for `<script>` elements that must not run again: parser-inserted
    /// and cloned scripts. Freshly created scripts start out unset.
    pub already_started: bool,

    /// Layout box in document coordinates, supplied by the host
    pub bounds: Option<DomRect>,
}

impl DomNode {
    /// Create a new node with required fields
    pub fn new(node_id: NodeId, node_type: NodeType, node_name: impl Into<String>) -> Self {
        Self {
            node_id,
            node_type,
            parent_id: None,
            children_ids: SmallVec::new(),
            node_name: node_name.into(),
            node_value: String::new(),
            attributes: SmallVec::new(),
            already_started: false,
            bounds: None,
        }
    }

    pub fn element(tag: &str) -> Self {
        Self::new(0, NodeType::Element, tag.to_ascii_lowercase())
    }

    pub fn text(value: impl Into<String>) -> Self {
        let mut node = Self::new(0, NodeType::Text, "#text");
        node.node_value = value.into();
        node
    }

    /// Get tag name for element nodes
    pub fn tag_name(&self) -> Option<&str> {
        if self.node_type == NodeType::Element {
            Some(&self.node_name)
        } else {
            None
        }
    }

    /// Check if node is an element
    pub fn is_element(&self) -> bool {
        self.node_type == NodeType::Element
    }

    /// Check if node is text
    pub fn is_text(&self) -> bool {
        self.node_type == NodeType::Text
    }

    pub fn is_script(&self) -> bool {
        self.tag_name() == Some("script")
    }

    /// Get attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Set attribute, replacing an existing value in place
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(index).1)
    }

    /// Persistence identifier, if this element is tagged
    pub fn persist_id(&self) -> Option<&str> {
        if self.is_element() {
            self.attr(ATTR_PERSIST_ID)
        } else {
            None
        }
    }

    /// Survives even when the incoming page lacks its identifier
    pub fn is_permanent(&self) -> bool {
        matches!(self.attr(ATTR_PERSIST_PERMANENT), Some(value) if value != "false")
    }

    /// A script that would run if inserted now
    pub fn is_executable_script(&self) -> bool {
        self.is_script() && !self.already_started
    }
}
