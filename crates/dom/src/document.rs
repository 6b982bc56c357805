//! Document - the live page the router patches
//!
//! Owns the node arena plus the few pieces of browser state the router
//! touches: the `<body>` root, the title, the ready state, the viewport and
//! the scroll offset.
//!
//! Markup is parsed with `scraper` (html5ever underneath) and copied into
//! the arena, so every node the router sees has a stable `NodeId`.

use scraper::{ElementRef, Html, Node};

use crate::arena::DomArena;
use crate::error::{DomError, Result};
use crate::serializer::DomSerializer;
use crate::types::*;
use crate::utils;

/// Default viewport when the host never reports one
const DEFAULT_VIEWPORT: DomRect = DomRect {
    x: 0.0,
    y: 0.0,
    width: 1280.0,
    height: 720.0,
};

#[derive(Debug)]
pub struct Document {
    arena: DomArena,
    document_id: NodeId,
    body_id: NodeId,
    title: String,
    ready_state: ReadyState,
    viewport: DomRect,
    scroll: (f64, f64),
}

impl Document {
    /// Empty, fully loaded document
    pub fn new() -> Self {
        let mut arena = DomArena::new();
        // An empty arena always has room for the first two ids
        let document_id = arena
            .add_node(DomNode::new(0, NodeType::Document, "#document"))
            .unwrap_or(0);
        let body_id = arena.add_node(DomNode::element("body")).unwrap_or(1);

        let mut document = Self {
            arena,
            document_id,
            body_id,
            title: String::new(),
            ready_state: ReadyState::Complete,
            viewport: DEFAULT_VIEWPORT,
            scroll: (0.0, 0.0),
        };
        // Both ids were just allocated
        let _ = document.arena.append_child(document_id, body_id);
        document
    }

    /// Build a document from a full page
    ///
    /// Scripts in the initial markup count as already executed.
    pub fn parse(html: &str) -> Result<Self> {
        let parsed = Html::parse_document(html);
        let mut document = Self::new();

        let root = parsed.root_element();
        for child in root.children().filter_map(ElementRef::wrap) {
            match child.value().name() {
                "head" => {
                    if let Some(title) = child
                        .children()
                        .filter_map(ElementRef::wrap)
                        .find(|el| el.value().name() == "title")
                    {
                        document.title = title.text().collect::<String>().trim().to_string();
                    }
                }
                "body" => {
                    let body = document.body_id;
                    for (name, value) in child.value().attrs() {
                        document.arena.get_mut(body)?.set_attr(name, value);
                    }
                    document.import_children(child, body)?;
                }
                _ => {}
            }
        }

        Ok(document)
    }

    /// Parse markup into a detached fragment, the `innerHTML` of a scratch container
    ///
    /// Scripts inside the fragment are flagged already started: like nodes
    /// produced by `innerHTML`, they never run.
    pub fn parse_fragment(&mut self, markup: &str) -> Result<NodeId> {
        let parsed = Html::parse_fragment(markup);
        let fragment = self
            .arena
            .add_node(DomNode::new(0, NodeType::DocumentFragment, "#document-fragment"))?;
        self.import_children(parsed.root_element(), fragment)?;
        Ok(fragment)
    }

    fn import_children(&mut self, source: ElementRef<'_>, parent: NodeId) -> Result<()> {
        for child in source.children() {
            let node_id = match child.value() {
                Node::Element(_) => match ElementRef::wrap(child) {
                    Some(element) => self.import_element(element)?,
                    None => continue,
                },
                Node::Text(text) => self.arena.add_node(DomNode::text(&**text))?,
                Node::Comment(comment) => {
                    let mut node = DomNode::new(0, NodeType::Comment, "#comment");
                    node.node_value = String::from(&**comment);
                    self.arena.add_node(node)?
                }
                _ => continue,
            };
            self.arena.append_child(parent, node_id)?;
        }
        Ok(())
    }

    fn import_element(&mut self, element: ElementRef<'_>) -> Result<NodeId> {
        let mut node = DomNode::element(element.value().name());
        for (name, value) in element.value().attrs() {
            node.attributes.push((name.to_string(), value.to_string()));
        }
        node.already_started = node.is_script();

        let node_id = self.arena.add_node(node)?;
        self.import_children(element, node_id)?;
        Ok(node_id)
    }

    pub fn arena(&self) -> &DomArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut DomArena {
        &mut self.arena
    }

    pub fn document_id(&self) -> NodeId {
        self.document_id
    }

    /// The live root the reconciler patches
    pub fn body(&self) -> NodeId {
        self.body_id
    }

    pub fn node(&self, node_id: NodeId) -> Result<&DomNode> {
        self.arena.get(node_id)
    }

    pub fn create_element(&mut self, tag: &str) -> Result<NodeId> {
        self.arena.add_node(DomNode::element(tag))
    }

    pub fn create_text(&mut self, value: &str) -> Result<NodeId> {
        self.arena.add_node(DomNode::text(value))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.arena.append_child(parent, child)
    }

    /// `element.remove()`
    pub fn remove(&mut self, node_id: NodeId) -> Result<()> {
        self.arena.detach(node_id)
    }

    /// Free every node that is no longer connected
    ///
    /// Ids of released nodes stop resolving and may be handed out again.
    pub fn release_detached(&mut self) -> Result<usize> {
        self.arena.release_unreachable(self.document_id)
    }

    pub fn children(&self, node_id: NodeId) -> Result<Vec<NodeId>> {
        self.arena.child_ids(node_id)
    }

    /// Element children of `<body>`, the `document.body.children` view
    pub fn body_elements(&self) -> Result<Vec<NodeId>> {
        Ok(self
            .arena
            .children(self.body_id)?
            .into_iter()
            .filter(|node| node.is_element())
            .map(|node| node.node_id)
            .collect())
    }

    /// Attached to this document. A released node is not.
    pub fn is_connected(&self, node_id: NodeId) -> Result<bool> {
        if !self.arena.contains(node_id) {
            return Ok(false);
        }
        self.arena.is_inclusive_ancestor(self.document_id, node_id)
    }

    /// Connected elements with the given tag, in document order
    pub fn query_selector_all(&self, tag: &str) -> Result<Vec<NodeId>> {
        self.arena.find_by_tag(self.document_id, tag)
    }

    /// Connected element carrying `persist-id="id"`
    pub fn find_persistent(&self, persist_id: &str) -> Result<Option<NodeId>> {
        self.arena
            .find_by_attr(self.document_id, ATTR_PERSIST_ID, persist_id)
    }

    pub fn get_attribute(&self, node_id: NodeId, name: &str) -> Result<Option<String>> {
        Ok(self.arena.get(node_id)?.attr(name).map(str::to_string))
    }

    pub fn set_attribute(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let node = self.arena.get_mut(node_id)?;
        if !node.is_element() {
            return Err(DomError::InvalidNodeType {
                expected: "element".to_string(),
                actual: node.node_name.clone(),
            });
        }
        node.set_attr(name, value);
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn set_ready_state(&mut self, state: ReadyState) {
        self.ready_state = state;
    }

    pub fn viewport(&self) -> DomRect {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: DomRect) {
        self.viewport = viewport;
    }

    /// `window.scrollTo(x, y)`
    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.scroll = (x.max(0.0), y.max(0.0));
    }

    pub fn scroll_position(&self) -> (f64, f64) {
        self.scroll
    }

    /// Record the layout box of a node (document coordinates)
    pub fn set_bounds(&mut self, node_id: NodeId, bounds: DomRect) -> Result<()> {
        self.arena.get_mut(node_id)?.bounds = Some(bounds);
        Ok(())
    }

    /// Connected, laid out, and intersecting the scrolled viewport
    pub fn is_in_viewport(&self, node_id: NodeId) -> Result<bool> {
        if !self.is_connected(node_id)? {
            return Ok(false);
        }
        Ok(match self.arena.get(node_id)?.bounds {
            Some(bounds) => utils::intersects_viewport(&bounds, &self.viewport, self.scroll, 0.0),
            None => false,
        })
    }

    /// The host ran this script; it must not run again
    pub fn mark_script_started(&mut self, node_id: NodeId) -> Result<()> {
        self.arena.get_mut(node_id)?.already_started = true;
        Ok(())
    }

    /// Direct text children joined verbatim, the `text` of a script
    pub fn child_text(&self, node_id: NodeId) -> Result<String> {
        Ok(self
            .arena
            .children(node_id)?
            .into_iter()
            .filter(|child| child.is_text())
            .map(|child| child.node_value.as_str())
            .collect())
    }

    pub fn text_content(&self, node_id: NodeId) -> Result<String> {
        utils::get_text_content(&self.arena, node_id)
    }

    pub fn inner_html(&self, node_id: NodeId) -> Result<String> {
        DomSerializer::new().inner_html(&self.arena, node_id)
    }

    pub fn outer_html(&self, node_id: NodeId) -> Result<String> {
        DomSerializer::new().outer_html(&self.arena, node_id)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_page() {
        let doc = Document::parse(
            "<html><head><title> Home &amp; Garden </title></head>\
             <body class=\"home\"><nav persist-id=\"nav\">Menu</nav><main>Hi</main></body></html>",
        )
        .unwrap();

        assert_eq!(doc.title(), "Home & Garden");
        assert_eq!(doc.get_attribute(doc.body(), "class").unwrap().as_deref(), Some("home"));
        assert_eq!(doc.body_elements().unwrap().len(), 2);
        assert!(doc.find_persistent("nav").unwrap().is_some());
        assert_eq!(
            doc.inner_html(doc.body()).unwrap(),
            "<nav persist-id=\"nav\">Menu</nav><main>Hi</main>"
        );
    }

    #[test]
    fn test_fragment_is_detached_and_scripts_inert() {
        let mut doc = Document::new();
        let fragment = doc
            .parse_fragment("<p>one</p><script>boot()</script>")
            .unwrap();

        assert!(!doc.is_connected(fragment).unwrap());
        let children = doc.children(fragment).unwrap();
        assert_eq!(children.len(), 2);

        let script = doc.node(children[1]).unwrap();
        assert!(script.is_script());
        assert!(!script.is_executable_script());
        assert!(doc.query_selector_all("script").unwrap().is_empty());
    }

    #[test]
    fn test_query_selector_all_document_order() {
        let doc = Document::parse(
            "<body><a href=\"/a\">A</a><div><a href=\"/b\">B</a></div><a href=\"/c\">C</a></body>",
        )
        .unwrap();

        let hrefs: Vec<_> = doc
            .query_selector_all("a")
            .unwrap()
            .into_iter()
            .map(|id| doc.get_attribute(id, "href").unwrap().unwrap())
            .collect();
        assert_eq!(hrefs, vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn test_viewport_and_scroll() {
        let mut doc = Document::parse("<body><a href=\"/x\">x</a></body>").unwrap();
        let link = doc.query_selector_all("a").unwrap()[0];

        assert!(!doc.is_in_viewport(link).unwrap(), "no layout yet");

        doc.set_viewport(DomRect::new(0.0, 0.0, 800.0, 600.0));
        doc.set_bounds(link, DomRect::new(0.0, 1000.0, 50.0, 20.0)).unwrap();
        assert!(!doc.is_in_viewport(link).unwrap());

        doc.scroll_to(0.0, 700.0);
        assert!(doc.is_in_viewport(link).unwrap());

        doc.scroll_to(-5.0, -5.0);
        assert_eq!(doc.scroll_position(), (0.0, 0.0));
    }

    #[test]
    fn test_release_detached_keeps_connected_nodes() {
        let mut doc = Document::parse("<body><nav>n</nav><p>old</p></body>").unwrap();
        let nav = doc.query_selector_all("nav").unwrap()[0];
        let old = doc.query_selector_all("p").unwrap()[0];
        doc.remove(old).unwrap();
        doc.parse_fragment("<p>scratch</p>").unwrap();
        let live = doc.arena().len();

        // p, its text, the fragment root, its p and that p's text
        assert_eq!(doc.release_detached().unwrap(), 5);
        assert_eq!(doc.arena().len(), live - 5);
        assert!(doc.is_connected(nav).unwrap());
        assert!(!doc.is_connected(old).unwrap());
        assert_eq!(doc.inner_html(doc.body()).unwrap(), "<nav>n</nav>");
    }

    #[test]
    fn test_child_text_is_verbatim() {
        let mut doc = Document::new();
        let fragment = doc.parse_fragment("<script>\n  boot();\n</script>").unwrap();
        let script = doc.children(fragment).unwrap()[0];
        assert_eq!(doc.child_text(script).unwrap(), "\n  boot();\n");
        assert_eq!(doc.text_content(script).unwrap(), "boot();");
    }

    #[test]
    fn test_set_attribute_rejects_text() {
        let mut doc = Document::new();
        let text = doc.create_text("x").unwrap();
        assert!(doc.set_attribute(text, "id", "y").is_err());
    }
}
