//! Body reconciliation
//!
//! Merges the markup of the next page into the live `<body>`:
//!
//! ```text
//! live body ──► drop untagged children ──► index tagged children by persist-id
//!                                                     │ (read-once)
//! incoming markup ──► fragment ──► for each top-level child:
//!     tagged & indexed  → keep the live element, insert nothing
//!     <script>          → synthesize a fresh script (unless blocked)
//!     anything else     → append
//! leftover index entries ──► remove unless persist-permanent
//! whatever is no longer connected ──► released from the arena
//! ```
//!
//! Persistent elements are kept as the very same nodes, so whatever state
//! hangs off them (focus, playback, running animations) survives.
//!
//! Top-level text counts as page content, not only `body > *`: live text
//! is dropped with the untagged elements and non-blank incoming text is
//! appended, so text from the departing page never lingers.

use ahash::{AHashMap, AHashSet};

use crate::document::Document;
use crate::error::Result;
use crate::types::{NodeId, NodeType};
use crate::utils::is_whitespace_only;

/// Source markers of third-party page-builder runtimes that must not boot twice
pub const DEFAULT_BLOCKED_SCRIPT_MARKERS: &[&str] = &["webflow", "jquery"];

/// Decides which external scripts the reconciler refuses to re-insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPolicy {
    pub blocked_markers: Vec<String>,
}

impl ScriptPolicy {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked_markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// Never block anything
    pub fn allow_all() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Substring match on the script source URL
    pub fn blocks(&self, src: &str) -> bool {
        self.blocked_markers
            .iter()
            .any(|marker| src.contains(marker.as_str()))
    }
}

impl Default for ScriptPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKED_SCRIPT_MARKERS.iter().copied())
    }
}

/// What a reconciliation did to the live body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Persistent live elements matched by the incoming markup
    pub kept: Vec<NodeId>,
    /// Permanent elements kept although the incoming markup lacks them
    pub retained: Vec<NodeId>,
    /// Nodes appended to the body, in order
    pub inserted: Vec<NodeId>,
    /// Freshly created scripts among `inserted`; these still have to run
    pub scripts: Vec<NodeId>,
    /// Nodes detached from the body. Their ids are released on return.
    pub removed: Vec<NodeId>,
    /// `src` of external scripts refused by the block predicate
    pub blocked_scripts: Vec<String>,
    /// Persistence identifiers that appeared more than once in the markup
    pub duplicate_ids: Vec<String>,
    /// Nodes freed once the body was patched
    pub released: usize,
}

/// Replace the body content of `document` with `markup`, preserving persistent elements
///
/// `block_script` receives the `src` of every external script in the
/// incoming markup; returning `true` drops that script.
///
/// Duplicate persistence identifiers in the markup: the first occurrence
/// wins and later ones are skipped, so identifiers stay unique in the
/// document.
pub fn reconcile<P>(document: &mut Document, markup: &str, block_script: P) -> Result<ReconcileReport>
where
    P: Fn(&str) -> bool,
{
    let body = document.body();
    let mut report = ReconcileReport::default();

    // 1. everything without a persistence identifier goes, text included
    let mut persistent: Vec<NodeId> = Vec::new();
    for child in document.children(body)? {
        if document.node(child)?.persist_id().is_some() {
            persistent.push(child);
        } else {
            document.remove(child)?;
            report.removed.push(child);
        }
    }

    // 2. read-once lookup; a repeated live identifier is left unindexed
    let mut lookup: AHashMap<String, NodeId> = AHashMap::with_capacity(persistent.len());
    for &node_id in &persistent {
        if let Some(persist_id) = document.node(node_id)?.persist_id() {
            lookup.entry(persist_id.to_string()).or_insert(node_id);
        }
    }

    // 3. walk the incoming top-level children
    let fragment = document.parse_fragment(markup)?;
    let mut claimed: AHashSet<String> = AHashSet::new();
    let mut kept: AHashSet<NodeId> = AHashSet::new();

    for child in document.children(fragment)? {
        let node = document.node(child)?;
        match node.node_type {
            NodeType::Element => {}
            // Incoming top-level text is kept as content
            NodeType::Text if !is_whitespace_only(&node.node_value) => {
                document.append_child(body, child)?;
                report.inserted.push(child);
                continue;
            }
            _ => continue,
        }

        if let Some(persist_id) = node.persist_id().map(str::to_string) {
            if !claimed.insert(persist_id.clone()) {
                tracing::warn!("Duplicate persist-id in incoming markup: {}", persist_id);
                report.duplicate_ids.push(persist_id);
                continue;
            }
            if let Some(live) = lookup.remove(&persist_id) {
                kept.insert(live);
                report.kept.push(live);
                continue;
            }
        }

        if document.node(child)?.is_script() {
            if let Some(script) = recreate_script(document, child, &block_script, &mut report)? {
                document.append_child(body, script)?;
                report.inserted.push(script);
                report.scripts.push(script);
            }
            continue;
        }

        // The fragment is scratch space: moving its child is the clone
        document.append_child(body, child)?;
        report.inserted.push(child);
    }

    // 4. unclaimed persistent elements leave unless permanent
    for node_id in persistent {
        if kept.contains(&node_id) {
            continue;
        }
        if document.node(node_id)?.is_permanent() {
            report.retained.push(node_id);
        } else {
            document.remove(node_id)?;
            report.removed.push(node_id);
        }
    }

    // 5. the fragment, skipped incoming copies and removed nodes
    report.released = document.release_detached()?;

    tracing::debug!(
        "Reconciled body: kept={} retained={} inserted={} scripts={} removed={} blocked={} released={}",
        report.kept.len(),
        report.retained.len(),
        report.inserted.len(),
        report.scripts.len(),
        report.removed.len(),
        report.blocked_scripts.len(),
        report.released
    );

    Ok(report)
}

/// Build an executable copy of a parsed script
///
/// A cloned script keeps its "already started" flag and would never run,
/// so the copy is created from scratch: same attributes, same inline text.
fn recreate_script<P>(
    document: &mut Document,
    source: NodeId,
    block_script: &P,
    report: &mut ReconcileReport,
) -> Result<Option<NodeId>>
where
    P: Fn(&str) -> bool,
{
    let node = document.node(source)?;
    if let Some(src) = node.attr("src") {
        if block_script(src) {
            tracing::debug!("Blocked script: {}", src);
            report.blocked_scripts.push(src.to_string());
            return Ok(None);
        }
    }

    let attributes = node.attributes.clone();
    let code = document.child_text(source)?;

    let script = document.create_element("script")?;
    document.arena_mut().get_mut(script)?.attributes = attributes;
    if !code.is_empty() {
        let text = document.create_text(&code)?;
        document.append_child(script, text)?;
    }

    Ok(Some(script))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ATTR_PERSIST_ID;

    fn live(body: &str) -> Document {
        Document::parse(&format!("<html><body>{}</body></html>", body)).unwrap()
    }

    fn body_html(doc: &Document) -> String {
        doc.inner_html(doc.body()).unwrap()
    }

    #[test]
    fn test_replaces_untagged_content() {
        let mut doc = live("<main>old</main><footer>f</footer>");
        let report = reconcile(&mut doc, "<main>new</main>", |_| false).unwrap();

        assert_eq!(body_html(&doc), "<main>new</main>");
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.inserted.len(), 1);
    }

    #[test]
    fn test_persistent_element_is_same_instance() {
        let mut doc = live("<div persist-id=\"nav\">old nav</div><main>old</main>");
        let nav = doc.find_persistent("nav").unwrap().unwrap();

        let report = reconcile(
            &mut doc,
            "<div persist-id=\"nav\">new nav</div><main>new</main>",
            |_| false,
        )
        .unwrap();

        assert_eq!(doc.find_persistent("nav").unwrap(), Some(nav));
        assert_eq!(report.kept, vec![nav]);
        // Kept, not replaced: the old content is still there
        assert_eq!(doc.text_content(nav).unwrap(), "old nav");
        assert_eq!(
            body_html(&doc),
            "<div persist-id=\"nav\">old nav</div><main>new</main>"
        );
    }

    #[test]
    fn test_permanent_survives_absence() {
        let mut doc = live("<audio persist-id=\"player\" persist-permanent=\"true\"></audio><p>a</p>");
        let player = doc.find_persistent("player").unwrap().unwrap();

        let report = reconcile(&mut doc, "<p>b</p>", |_| false).unwrap();

        assert!(doc.is_connected(player).unwrap());
        assert_eq!(report.retained, vec![player]);
    }

    #[test]
    fn test_non_permanent_removed_on_absence() {
        let mut doc = live("<aside persist-id=\"side\">s</aside><p>a</p>");
        let side = doc.find_persistent("side").unwrap().unwrap();

        let report = reconcile(&mut doc, "<p>b</p>", |_| false).unwrap();

        assert!(!doc.is_connected(side).unwrap());
        assert!(report.removed.contains(&side));
        assert_eq!(body_html(&doc), "<p>b</p>");
    }

    #[test]
    fn test_new_persistent_element_is_inserted() {
        let mut doc = live("<p>a</p>");
        let report = reconcile(&mut doc, "<nav persist-id=\"nav\">n</nav>", |_| false).unwrap();

        assert!(report.kept.is_empty());
        let nav = doc.find_persistent("nav").unwrap().unwrap();
        assert_eq!(report.inserted, vec![nav]);
    }

    #[test]
    fn test_duplicate_incoming_id_first_wins() {
        let mut doc = live("<div persist-id=\"x\">live</div>");
        let live_x = doc.find_persistent("x").unwrap().unwrap();

        let report = reconcile(
            &mut doc,
            "<div persist-id=\"x\">one</div><div persist-id=\"x\">two</div>",
            |_| false,
        )
        .unwrap();

        assert_eq!(report.kept, vec![live_x]);
        assert_eq!(report.duplicate_ids, vec!["x".to_string()]);
        let tagged = doc
            .arena()
            .find_in(doc.body(), |node| node.attr(ATTR_PERSIST_ID) == Some("x"))
            .unwrap();
        assert_eq!(tagged, vec![live_x]);
    }

    #[test]
    fn test_script_is_recreated_executable() {
        let mut doc = live("<p>a</p>");
        let report = reconcile(
            &mut doc,
            "<script type=\"module\" data-page=\"home\">window.home = 1;</script>",
            |_| false,
        )
        .unwrap();

        assert_eq!(report.scripts.len(), 1);
        let script = doc.node(report.scripts[0]).unwrap();
        assert!(script.is_executable_script());
        assert_eq!(script.attr("type"), Some("module"));
        assert_eq!(script.attr("data-page"), Some("home"));
        assert_eq!(
            doc.inner_html(report.scripts[0]).unwrap(),
            "window.home = 1;"
        );
    }

    #[test]
    fn test_blocked_external_script_never_inserted() {
        let mut doc = live("");
        let policy = ScriptPolicy::default();
        let report = reconcile(
            &mut doc,
            "<script src=\"https://cdn.example.com/jquery-3.5.1.min.js\"></script>\
             <script src=\"/js/webflow.js\"></script>\
             <script src=\"/js/page.js\"></script>",
            |src| policy.blocks(src),
        )
        .unwrap();

        assert_eq!(report.blocked_scripts.len(), 2);
        let scripts = doc.query_selector_all("script").unwrap();
        assert_eq!(scripts, report.scripts);
        assert_eq!(scripts.len(), 1);
        assert_eq!(doc.node(scripts[0]).unwrap().attr("src"), Some("/js/page.js"));
    }

    #[test]
    fn test_inline_script_ignores_block_predicate() {
        let mut doc = live("");
        let report = reconcile(&mut doc, "<script>jquery()</script>", |_| true).unwrap();
        assert_eq!(report.scripts.len(), 1);
    }

    #[test]
    fn test_nested_scripts_stay_inert() {
        let mut doc = live("");
        let report = reconcile(&mut doc, "<div><script>nested()</script></div>", |_| false).unwrap();

        assert!(report.scripts.is_empty());
        let nested = doc.query_selector_all("script").unwrap()[0];
        assert!(!doc.node(nested).unwrap().is_executable_script());
    }

    #[test]
    fn test_top_level_text_and_comments() {
        let mut doc = live("old text<p>a</p>");
        reconcile(&mut doc, "  <!-- note -->hello <b>x</b>\n", |_| false).unwrap();
        assert_eq!(body_html(&doc), "hello <b>x</b>");
    }

    #[test]
    fn test_kept_elements_precede_new_content() {
        let mut doc = live("<header persist-id=\"h\">H</header><p>old</p>");
        reconcile(
            &mut doc,
            "<p>before</p><header persist-id=\"h\">H2</header><p>after</p>",
            |_| false,
        )
        .unwrap();

        assert_eq!(
            body_html(&doc),
            "<header persist-id=\"h\">H</header><p>before</p><p>after</p>"
        );
    }

    #[test]
    fn test_alternating_pages_keep_arena_bounded() {
        let page = |name: &str| {
            let mut body = String::from("<nav persist-id=\"nav\">menu</nav>");
            for i in 0..50 {
                body.push_str(&format!("<p>{name} {i}</p>"));
            }
            body
        };
        let (a, b) = (page("a"), page("b"));

        let mut doc = live(&a);
        let nav = doc.find_persistent("nav").unwrap().unwrap();
        reconcile(&mut doc, &b, |_| false).unwrap();
        reconcile(&mut doc, &a, |_| false).unwrap();
        let (live_after_warmup, slots_after_warmup) = (doc.arena().len(), doc.arena().slots());

        for round in 0..200 {
            let next = if round % 2 == 0 { &b } else { &a };
            let report = reconcile(&mut doc, next, |_| false).unwrap();
            assert!(report.released > 0);
        }

        assert_eq!(doc.arena().len(), live_after_warmup);
        assert_eq!(doc.arena().slots(), slots_after_warmup);
        assert_eq!(doc.find_persistent("nav").unwrap(), Some(nav));
    }

    #[test]
    fn test_removed_nodes_are_released() {
        let mut doc = live("<aside persist-id=\"side\">s</aside><p>a</p>");
        let side = doc.find_persistent("side").unwrap().unwrap();

        let report = reconcile(
            &mut doc,
            "<div persist-id=\"x\">1</div><div persist-id=\"x\">2</div>",
            |_| false,
        )
        .unwrap();

        assert!(report.removed.contains(&side));
        assert!(doc.node(side).is_err());
        assert_eq!(doc.arena().len(), 4);
    }

    #[test]
    fn test_policy_markers() {
        let policy = ScriptPolicy::new(["analytics"]);
        assert!(policy.blocks("https://x.com/analytics.js"));
        assert!(!policy.blocks("https://x.com/jquery.js"));
        assert!(!ScriptPolicy::allow_all().blocks("jquery"));
        assert!(ScriptPolicy::default().blocks("jquery.min.js"));
    }
}
