//! Link interception and intersection prefetch
//!
//! Responsibilities:
//! - Track the anchors of the presented page (an observable link set)
//! - Decide whether a click on an anchor becomes a soft navigation
//! - Pick anchors that scrolled into view for prefetching, once each

use dom::{Document, NodeId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::error::{Result, RouterError};
use crate::observable::Observable;

/// Marks an anchor whose target has been handed to the page cache
pub const ATTR_PREFETCHED: &str = "prefetched";

#[derive(Debug, Default)]
struct Attached {
    /// Anchors whose clicks are intercepted
    intercepted: HashSet<NodeId>,
    /// Anchors under intersection observation, in document order
    observed: Vec<NodeId>,
}

/// Link interception state for one router
#[derive(Clone)]
pub struct LinkInterceptor {
    links: Observable<Vec<NodeId>>,
    attached: Arc<Mutex<Attached>>,
    intercept_cross_origin: bool,
}

impl LinkInterceptor {
    pub fn new(intercept_cross_origin: bool) -> Self {
        let links = Observable::new(Vec::new());
        let attached = Arc::new(Mutex::new(Attached::default()));

        // Swap intercepts from the previous anchors to the new ones
        {
            let attached = Arc::clone(&attached);
            links.subscribe(move |current: &Vec<NodeId>, previous: &Vec<NodeId>| {
                let mut attached = attached.lock();
                for anchor in previous {
                    attached.intercepted.remove(anchor);
                }
                attached.intercepted.extend(current.iter().copied());
                attached.observed = current.clone();
                tracing::debug!(
                    "Intercepting {} link(s), {} released",
                    current.len(),
                    previous.len()
                );
            });
        }

        Self {
            links,
            attached,
            intercept_cross_origin,
        }
    }

    /// Re-read the anchors of `document`. Returns how many are intercepted.
    pub fn refresh(&self, document: &Document) -> Result<usize> {
        let anchors = document.query_selector_all("a")?;
        Ok(self.replace(anchors))
    }

    /// Swap in a new link set. Link set subscribers run here, so callers
    /// must not hold the document lock.
    pub fn replace(&self, anchors: Vec<NodeId>) -> usize {
        let count = anchors.len();
        self.links.set(anchors);
        count
    }

    /// The current link set
    pub fn links(&self) -> &Observable<Vec<NodeId>> {
        &self.links
    }

    pub fn is_intercepted(&self, anchor: NodeId) -> bool {
        self.attached.lock().intercepted.contains(&anchor)
    }

    /// URL to soft-navigate to when `anchor` is clicked, `None` to let the
    /// click through
    pub fn resolve_click(&self, document: &Document, anchor: NodeId, base: &str) -> Option<String> {
        if !self.is_intercepted(anchor) {
            return None;
        }
        self.eligible_target(document, anchor, base)
    }

    fn eligible_target(&self, document: &Document, anchor: NodeId, base: &str) -> Option<String> {
        let node = document.node(anchor).ok()?;
        if node.has_attr("download") {
            return None;
        }
        if let Some(target) = node.attr("target") {
            if !target.is_empty() && !target.eq_ignore_ascii_case("_self") {
                return None;
            }
        }

        let href = node.attr("href").filter(|href| !href.is_empty()).unwrap_or("/");
        let base = match parse_url(base) {
            Ok(base) => base,
            Err(err) => {
                tracing::warn!("Cannot resolve link {}: {}", href, err);
                return None;
            }
        };
        let resolved = match base.join(href) {
            Ok(resolved) => resolved,
            Err(source) => {
                tracing::warn!("Ignoring link with bad href {}: {}", href, source);
                return None;
            }
        };

        if !self.intercept_cross_origin && resolved.origin() != base.origin() {
            tracing::debug!("Not intercepting cross-origin link {}", resolved);
            return None;
        }
        Some(resolved.to_string())
    }

    /// Observed anchors now in the viewport that were never prefetched
    ///
    /// Each returned anchor is marked `prefetched="true"` so it is only
    /// picked once.
    pub fn take_visible(&self, document: &mut Document, base: &str) -> Vec<String> {
        let observed = self.attached.lock().observed.clone();
        let mut urls = Vec::new();

        for anchor in observed {
            let visible = document.is_in_viewport(anchor).unwrap_or(false);
            let prefetched = document
                .node(anchor)
                .map(|node| node.has_attr(ATTR_PREFETCHED))
                .unwrap_or(true);
            if !visible || prefetched {
                continue;
            }

            if let Some(url) = self.eligible_target(document, anchor, base) {
                if document.set_attribute(anchor, ATTR_PREFETCHED, "true").is_ok() {
                    urls.push(url);
                }
            }
        }
        urls
    }
}

impl std::fmt::Debug for LinkInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let attached = self.attached.lock();
        f.debug_struct("LinkInterceptor")
            .field("intercepted", &attached.intercepted.len())
            .field("observed", &attached.observed.len())
            .field("intercept_cross_origin", &self.intercept_cross_origin)
            .finish()
    }
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|source| RouterError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

/// Resolve `href` against `base`, falling back to `href` unchanged
pub(crate) fn resolve_url(base: &str, href: &str) -> String {
    match parse_url(base).and_then(|base| {
        base.join(href).map_err(|source| RouterError::InvalidUrl {
            url: href.to_string(),
            source,
        })
    }) {
        Ok(resolved) => resolved.to_string(),
        Err(err) => {
            tracing::debug!("Using {} unresolved: {}", href, err);
            href.to_string()
        }
    }
}
