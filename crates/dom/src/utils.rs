//! Utility functions for DOM processing

use crate::arena::DomArena;
use crate::error::Result;
use crate::types::{DomRect, NodeId, NodeType};

/// Check if an element box intersects the scrolled viewport
///
/// `bounds` are document coordinates, `viewport` is the visible size and
/// `scroll` the current scroll offset. `margin` grows the viewport on every
/// side, like an intersection observer's root margin.
pub fn intersects_viewport(
    bounds: &DomRect,
    viewport: &DomRect,
    scroll: (f64, f64),
    margin: f64,
) -> bool {
    let visible = DomRect::new(
        scroll.0 - margin,
        scroll.1 - margin,
        viewport.width + 2.0 * margin,
        viewport.height + 2.0 * margin,
    );

    // Zero-sized boxes still count when they sit inside the viewport
    if bounds.width == 0.0 || bounds.height == 0.0 {
        return bounds.x >= visible.x
            && bounds.x <= visible.x + visible.width
            && bounds.y >= visible.y
            && bounds.y <= visible.y + visible.height;
    }

    bounds.intersects(&visible)
}

/// Get all text content from node and its children
pub fn get_text_content(arena: &DomArena, node_id: NodeId) -> Result<String> {
    let mut text = String::new();

    arena.traverse_df(node_id, |node| {
        if node.node_type == NodeType::Text {
            text.push_str(&node.node_value);
        }
        Ok(())
    })?;

    Ok(text.trim().to_string())
}

/// True for text that only separates elements in markup
pub fn is_whitespace_only(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}
