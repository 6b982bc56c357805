//! Router configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// Callback taking a route URL
pub type RouteHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Router configuration
///
/// The serializable part can be loaded from JSON; the route hooks are set
/// in code.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub id: String,

    /// Script `src` substrings that are never re-executed after a swap
    pub blocked_script_markers: Vec<String>,

    /// Scroll to (0, 0) once a new page is presented
    pub scroll_to_top_on_load: bool,

    /// Prefetch intercepted links as they enter the viewport
    pub prefetch_visible_links: bool,

    /// Intercept links pointing at other origins
    pub intercept_cross_origin: bool,

    /// Capacity of the router event channel
    pub event_capacity: usize,

    /// Called with the new route after its page is presented
    #[serde(skip)]
    pub on_load_route: Option<RouteHook>,

    /// Called with the departing route after its page is unloaded
    #[serde(skip)]
    pub on_unload_route: Option<RouteHook>,
}

impl RouterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_on_load_route<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_load_route = Some(Arc::new(hook));
        self
    }

    pub fn with_on_unload_route<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_unload_route = Some(Arc::new(hook));
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            blocked_script_markers: dom::reconcile::DEFAULT_BLOCKED_SCRIPT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
            scroll_to_top_on_load: true,
            prefetch_visible_links: true,
            intercept_cross_origin: false,
            event_capacity: 1024,
            on_load_route: None,
            on_unload_route: None,
        }
    }
}

impl fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterConfig")
            .field("id", &self.id)
            .field("blocked_script_markers", &self.blocked_script_markers)
            .field("scroll_to_top_on_load", &self.scroll_to_top_on_load)
            .field("prefetch_visible_links", &self.prefetch_visible_links)
            .field("intercept_cross_origin", &self.intercept_cross_origin)
            .field("event_capacity", &self.event_capacity)
            .field("on_load_route", &self.on_load_route.is_some())
            .field("on_unload_route", &self.on_unload_route.is_some())
            .finish()
    }
}
