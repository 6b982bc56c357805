//! Route Transition Orchestrator
//!
//! This is the API page code interacts with. One `Router` owns the live
//! document, the page cache, the script executor and the link interceptor,
//! and sequences every navigation through them:
//!
//! ```text
//!   Idle(P) ──navigate(N)──► abort pending exit transitions
//!                               │
//!                     N == P? ──┴──► AlreadyPresented
//!                               │
//!                       await exit handlers ──aborted──► Idle(P)
//!                               │
//!                       unload(P), fetch N ──failed──► Idle(P), document untouched
//!                               │
//!                    still the latest request? ──no──► Superseded
//!                               │
//!                       reconcile body, set title, run new scripts
//!                               │
//!                            Idle(N), load(N)
//! ```
//!
//! Design decisions:
//! 1. Each navigation takes a generation number; a run that finds a newer
//!    one before committing drops its result
//! 2. Nothing fails across this surface: every run ends in a
//!    `NavigationOutcome`
//! 3. Load side effects (links, scroll, notifications) hang off the
//!    `loaded` observable, not the navigation future

use dom::{extract_page, reconcile, Document, NodeId, PageMarkup, ReadyState, ScriptPolicy};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{RouteHook, RouterConfig};
use crate::error::Result;
use crate::events::{EventBus, RouterEvent};
use crate::executor::{ExitHandler, ScriptExecutor};
use crate::history::BrowserHistory;
use crate::links::{resolve_url, LinkInterceptor};
use crate::network::{FetchError, PageCache, PageFetcher};
use crate::observable::{Notifier, Observable, SubscriptionId};

/// A script inserted by the last reconciliation, ready to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptElement {
    pub node_id: NodeId,
    pub src: Option<String>,
    /// Inline source, empty for external scripts
    pub code: String,
}

/// Runs the scripts a navigation brings in
///
/// Called with no document lock held, so a host may register page scripts
/// through `Router::use_script` or read `Router::document`.
pub trait ScriptHost: Send + Sync {
    fn run_script(&self, router: &Router, script: &ScriptElement);
}

/// Host that only records the script
#[derive(Debug, Default)]
pub struct LoggingScriptHost;

impl ScriptHost for LoggingScriptHost {
    fn run_script(&self, _router: &Router, script: &ScriptElement) {
        tracing::debug!(
            "Script {} ready: {}",
            script.node_id,
            script.src.as_deref().unwrap_or("<inline>")
        );
    }
}

/// How a navigation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Target is already on screen; only the abort step ran
    AlreadyPresented,
    /// A newer navigation aborted an exit transition
    CleanupAborted,
    /// A newer navigation was requested before this one committed
    Superseded,
    FetchFailed(FetchError),
    /// The fetched page has no `<body>`
    MissingContent,
    ReconcileFailed(String),
    Loaded { url: String },
}

impl NavigationOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, NavigationOutcome::Loaded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// The click is left to the browser
    NotIntercepted,
    Navigated(NavigationOutcome),
}

/// Everything the `loaded` observable needs to present or retire a page
#[derive(Clone)]
struct PageLifecycle {
    document: Arc<Mutex<Document>>,
    cache: PageCache,
    links: LinkInterceptor,
    presented: Arc<Mutex<String>>,
    page_load: Notifier<String>,
    page_unload: Notifier<String>,
    events: EventBus,
    on_load_route: Option<RouteHook>,
    on_unload_route: Option<RouteHook>,
    scroll_to_top: bool,
    prefetch_visible: bool,
}

impl PageLifecycle {
    fn presented(&self) -> String {
        self.presented.lock().clone()
    }

    fn loaded(&self) {
        let url = self.presented();
        if self.scroll_to_top {
            self.document.lock().scroll_to(0.0, 0.0);
        }
        self.attach_links();

        if let Some(hook) = &self.on_load_route {
            hook(&url);
        }
        self.page_load.notify(&url);
        self.events.publish(RouterEvent::PageLoaded { url });
    }

    fn unloaded(&self) {
        let url = self.presented();
        tracing::debug!("Unloading {}", url);

        if let Some(hook) = &self.on_unload_route {
            hook(&url);
        }
        self.page_unload.notify(&url);
        self.events.publish(RouterEvent::PageUnloaded { url });
    }

    /// Intercept the current anchors and prefetch the visible ones
    fn attach_links(&self) {
        let base = self.presented();
        let anchors = self.document.lock().query_selector_all("a");
        match anchors {
            Ok(anchors) => {
                self.links.replace(anchors);
            }
            Err(err) => tracing::warn!("Failed to refresh link intercepts: {}", err),
        }

        if self.prefetch_visible {
            let visible = self.links.take_visible(&mut self.document.lock(), &base);
            self.spawn_prefetch(visible);
        }
    }

    fn spawn_prefetch(&self, urls: Vec<String>) {
        if urls.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let cache = self.cache.clone();
                let events = self.events.clone();
                handle.spawn(async move {
                    prefetch_all(&cache, &events, urls).await;
                });
            }
            Err(_) => {
                tracing::debug!("No runtime, skipping prefetch of {} link(s)", urls.len());
            }
        }
    }
}

/// Warm the cache for `urls`. Returns the ones that loaded.
async fn prefetch_all(cache: &PageCache, events: &EventBus, urls: Vec<String>) -> Vec<String> {
    let results = join_all(urls.iter().map(|url| cache.load(url))).await;

    urls.into_iter()
        .zip(results)
        .filter_map(|(url, result)| match result {
            Ok(_) => {
                events.publish(RouterEvent::Prefetched { url: url.clone() });
                Some(url)
            }
            Err(err) => {
                tracing::debug!("Prefetch failed: {}", err);
                None
            }
        })
        .collect()
}

struct RouterInner {
    id: String,
    route: Observable<String>,
    loaded: Observable<bool>,
    lifecycle: PageLifecycle,
    executor: ScriptExecutor,
    history: Arc<dyn BrowserHistory>,
    host: Arc<dyn ScriptHost>,
    policy: ScriptPolicy,
    /// Bumped by every navigation request
    generation: AtomicU64,
    /// popstate listener attached
    listening: AtomicBool,
}

/// Soft-navigation router
///
/// Clones share the same state.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        document: Document,
        fetcher: Arc<dyn PageFetcher>,
        history: Arc<dyn BrowserHistory>,
    ) -> Self {
        Self::with_script_host(config, document, fetcher, history, Arc::new(LoggingScriptHost))
    }

    pub fn with_script_host(
        config: RouterConfig,
        document: Document,
        fetcher: Arc<dyn PageFetcher>,
        history: Arc<dyn BrowserHistory>,
        host: Arc<dyn ScriptHost>,
    ) -> Self {
        let initial = normalize(&history.current_location());
        let ready = document.ready_state() != ReadyState::Loading;

        let lifecycle = PageLifecycle {
            document: Arc::new(Mutex::new(document)),
            cache: PageCache::new(fetcher),
            links: LinkInterceptor::new(config.intercept_cross_origin),
            presented: Arc::new(Mutex::new(initial.clone())),
            page_load: Notifier::new(),
            page_unload: Notifier::new(),
            events: EventBus::with_capacity(config.event_capacity),
            on_load_route: config.on_load_route.clone(),
            on_unload_route: config.on_unload_route.clone(),
            scroll_to_top: config.scroll_to_top_on_load,
            prefetch_visible: config.prefetch_visible_links,
        };

        let loaded = Observable::new(true);
        {
            let lifecycle = lifecycle.clone();
            loaded.subscribe(move |now_loaded: &bool, _| {
                if *now_loaded {
                    lifecycle.loaded();
                } else {
                    lifecycle.unloaded();
                }
            });
        }

        if ready {
            lifecycle.attach_links();
        }

        tracing::info!("Router {} started at {}", config.id, initial);

        Self {
            inner: Arc::new(RouterInner {
                id: config.id.clone(),
                route: Observable::new(initial),
                loaded,
                lifecycle,
                executor: ScriptExecutor::new(ready),
                history,
                host,
                policy: ScriptPolicy::new(config.blocked_script_markers.iter()),
                generation: AtomicU64::new(0),
                listening: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Navigate to `url`, resolved against the current route
    pub async fn navigate_to(&self, url: &str) -> NavigationOutcome {
        let target = resolve_url(&self.current_route(), url);
        tracing::debug!("Navigate to {}", target);
        self.inner
            .lifecycle
            .events
            .publish(RouterEvent::NavigationRequested { url: target.clone() });

        if target != self.inner.route.get() {
            self.inner.history.push_state(&target);
        }
        self.inner.route.set(target.clone());
        self.run_transition(target).await
    }

    /// Back/forward: re-read the route from the browser location
    ///
    /// `None` once `cleanup` detached the listener.
    pub async fn handle_popstate(&self) -> Option<NavigationOutcome> {
        if !self.inner.listening.load(Ordering::SeqCst) {
            return None;
        }
        let target = normalize(&self.inner.history.current_location());
        tracing::debug!("popstate to {}", target);
        self.inner.route.set(target.clone());
        Some(self.run_transition(target).await)
    }

    /// Click on an anchor of the live document
    pub async fn click_link(&self, anchor: NodeId) -> ClickOutcome {
        let target = {
            let document = self.inner.lifecycle.document.lock();
            self.inner
                .lifecycle
                .links
                .resolve_click(&document, anchor, &self.current_route())
        };
        match target {
            Some(url) => ClickOutcome::Navigated(self.navigate_to(&url).await),
            None => ClickOutcome::NotIntercepted,
        }
    }

    async fn run_transition(&self, target: String) -> NavigationOutcome {
        let inner = &self.inner;
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // A redundant request must still cancel whatever is pending
        inner.executor.abort_cleanup();

        if target == inner.lifecycle.presented() {
            tracing::debug!("Already presenting {}", target);
            return NavigationOutcome::AlreadyPresented;
        }

        if !inner.executor.cleanup_executed_scripts(&target).await {
            tracing::debug!("Navigation to {} aborted during cleanup", target);
            inner
                .lifecycle
                .events
                .publish(RouterEvent::CleanupAborted { url: target });
            return NavigationOutcome::CleanupAborted;
        }
        if self.is_superseded(generation) {
            return self.superseded(target);
        }

        tracing::debug!("Change route to {}", target);
        inner.loaded.set(false);

        let text = match inner.lifecycle.cache.load(&target).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("Navigation to {} failed: {}", target, err);
                self.failed(&target, err.to_string());
                return NavigationOutcome::FetchFailed(err);
            }
        };

        let Some(page) = extract_page(&text) else {
            tracing::warn!("No <body> in {}", target);
            self.failed(&target, "page has no body".to_string());
            return NavigationOutcome::MissingContent;
        };

        if self.is_superseded(generation) {
            return self.superseded(target);
        }

        let scripts = match self.commit(&target, &page) {
            Ok(scripts) => scripts,
            Err(err) => {
                tracing::error!("Failed to patch document for {}: {}", target, err);
                self.failed(&target, err.to_string());
                return NavigationOutcome::ReconcileFailed(err.to_string());
            }
        };

        for script in &scripts {
            inner.host.run_script(self, script);
        }

        inner.loaded.set(true);
        tracing::info!("Loaded {}", target);
        NavigationOutcome::Loaded { url: target }
    }

    /// Patch the live document and advance the presented route
    fn commit(&self, target: &str, page: &PageMarkup) -> Result<Vec<ScriptElement>> {
        let mut document = self.inner.lifecycle.document.lock();
        let policy = &self.inner.policy;

        let report = reconcile(&mut document, &page.body, |src| policy.blocks(src))?;
        if let Some(title) = &page.title {
            document.set_title(title.clone());
        }

        let mut scripts = Vec::with_capacity(report.scripts.len());
        for node_id in report.scripts {
            document.mark_script_started(node_id)?;
            scripts.push(ScriptElement {
                node_id,
                src: document.get_attribute(node_id, "src")?,
                code: document.child_text(node_id)?,
            });
        }

        *self.inner.lifecycle.presented.lock() = target.to_string();
        Ok(scripts)
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) != generation
    }

    fn superseded(&self, target: String) -> NavigationOutcome {
        tracing::debug!("Navigation to {} superseded", target);
        self.inner
            .lifecycle
            .events
            .publish(RouterEvent::Superseded { url: target });
        NavigationOutcome::Superseded
    }

    fn failed(&self, target: &str, reason: String) {
        self.inner
            .lifecycle
            .events
            .publish(RouterEvent::NavigationFailed {
                url: target.to_string(),
                reason,
            });
    }

    /// Register a page script for the current page
    pub fn use_script<F>(&self, script: F)
    where
        F: FnOnce() -> Option<ExitHandler> + Send + 'static,
    {
        self.inner.executor.execute_script(script);
    }

    /// Re-read the document's anchors
    pub fn refresh_link_intercepts(&self) {
        self.inner.lifecycle.attach_links();
    }

    /// Scroll the viewport and prefetch links that came into view
    pub async fn handle_scroll(&self, x: f64, y: f64) -> Vec<String> {
        self.inner.lifecycle.document.lock().scroll_to(x, y);
        self.prefetch_visible_links().await
    }

    /// Prefetch intercepted links now in the viewport. Returns the URLs loaded.
    pub async fn prefetch_visible_links(&self) -> Vec<String> {
        let lifecycle = &self.inner.lifecycle;
        let base = lifecycle.presented();
        let urls = lifecycle
            .links
            .take_visible(&mut lifecycle.document.lock(), &base);
        prefetch_all(&lifecycle.cache, &lifecycle.events, urls).await
    }

    /// Warm the page cache for `url`
    pub async fn prefetch(&self, url: &str) -> std::result::Result<(), FetchError> {
        let target = resolve_url(&self.current_route(), url);
        let lifecycle = &self.inner.lifecycle;
        lifecycle.cache.load(&target).await?;
        lifecycle
            .events
            .publish(RouterEvent::Prefetched { url: target });
        Ok(())
    }

    /// The document finished parsing: run deferred page scripts, intercept links
    pub fn document_loaded(&self) {
        {
            let mut document = self.inner.lifecycle.document.lock();
            if document.ready_state() == ReadyState::Loading {
                document.set_ready_state(ReadyState::Interactive);
            }
        }
        self.inner.lifecycle.attach_links();

        let flushed = self.inner.executor.mark_document_ready();
        if flushed > 0 {
            tracing::debug!("Ran {} deferred page script(s)", flushed);
        }
    }

    pub fn observe_route_change<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.inner
            .route
            .subscribe(move |current: &String, previous: &String| handler(current, previous))
    }

    pub fn unobserve_route_change(&self, id: SubscriptionId) -> bool {
        self.inner.route.unsubscribe(id)
    }

    pub fn observe_page_load<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner
            .lifecycle
            .page_load
            .subscribe(move |url: &String| handler(url))
    }

    pub fn unobserve_page_load(&self, id: SubscriptionId) -> bool {
        self.inner.lifecycle.page_load.unsubscribe(id)
    }

    pub fn observe_page_unload<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner
            .lifecycle
            .page_unload
            .subscribe(move |url: &String| handler(url))
    }

    pub fn unobserve_page_unload(&self, id: SubscriptionId) -> bool {
        self.inner.lifecycle.page_unload.unsubscribe(id)
    }

    /// Detach the popstate listener
    pub fn cleanup(&self) {
        if self.inner.listening.swap(false, Ordering::SeqCst) {
            tracing::info!("Router {} stopped listening", self.inner.id);
        }
    }

    /// Most recently requested route
    pub fn current_route(&self) -> String {
        self.inner.route.get()
    }

    /// Route whose content is on screen
    pub fn presented_route(&self) -> String {
        self.inner.lifecycle.presented()
    }

    pub fn is_route_loaded(&self) -> bool {
        self.inner.loaded.get()
    }

    /// Shared handle to the live document
    pub fn document(&self) -> Arc<Mutex<Document>> {
        Arc::clone(&self.inner.lifecycle.document)
    }

    pub fn executor(&self) -> &ScriptExecutor {
        &self.inner.executor
    }

    pub fn links(&self) -> &LinkInterceptor {
        &self.inner.lifecycle.links
    }

    /// URLs with cached markup
    pub fn is_cached(&self, url: &str) -> bool {
        self.inner.lifecycle.cache.contains(url)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RouterEvent> {
        self.inner.lifecycle.events.subscribe()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.inner.id)
            .field("route", &self.current_route())
            .field("presented", &self.presented_route())
            .field("loaded", &self.is_route_loaded())
            .field("executor", &self.inner.executor)
            .finish()
    }
}

/// Canonical form of an absolute URL; anything else passes through
fn normalize(url: &str) -> String {
    url::Url::parse(url)
        .map(|parsed| parsed.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    struct StaticFetcher {
        pages: HashMap<String, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch_text(&self, url: &str) -> std::result::Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn router() -> (Router, Arc<StaticFetcher>) {
        let mut pages = HashMap::new();
        pages.insert(
            "https://site.test/about".to_string(),
            "<html><head><title>About</title></head><body><main>about</main></body></html>"
                .to_string(),
        );
        pages.insert("https://site.test/broken".to_string(), "no markup".to_string());
        let fetcher = Arc::new(StaticFetcher {
            pages,
            calls: AtomicUsize::new(0),
        });
        let document =
            Document::parse("<html><head><title>Home</title></head><body><main>home</main></body></html>")
                .unwrap();
        let history = Arc::new(MemoryHistory::new("https://site.test/"));
        let router = Router::new(RouterConfig::default(), document, fetcher.clone(), history);
        (router, fetcher)
    }

    #[tokio::test]
    async fn test_navigate_loads_page() {
        let (router, fetcher) = router();

        let outcome = router.navigate_to("/about").await;
        assert_eq!(
            outcome,
            NavigationOutcome::Loaded {
                url: "https://site.test/about".to_string()
            }
        );
        assert_eq!(router.presented_route(), "https://site.test/about");
        assert!(router.is_route_loaded());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let document = router.document();
        let document = document.lock();
        assert_eq!(document.title(), "About");
        assert_eq!(document.inner_html(document.body()).unwrap(), "<main>about</main>");
    }

    #[tokio::test]
    async fn test_navigate_to_presented_route_is_noop() {
        let (router, fetcher) = router();

        assert_eq!(router.navigate_to("/").await, NavigationOutcome::AlreadyPresented);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_body_leaves_document() {
        let (router, _) = router();

        assert_eq!(router.navigate_to("/broken").await, NavigationOutcome::MissingContent);
        assert_eq!(router.presented_route(), "https://site.test/");

        let document = router.document();
        let document = document.lock();
        assert_eq!(document.title(), "Home");
        assert_eq!(document.inner_html(document.body()).unwrap(), "<main>home</main>");
    }

    #[tokio::test]
    async fn test_popstate_after_cleanup_is_ignored() {
        let (router, _) = router();
        router.cleanup();
        assert_eq!(router.handle_popstate().await, None);
    }

    #[test]
    fn test_navigate_from_blocking_context() {
        let (router, _) = router();
        let outcome = tokio_test::block_on(router.navigate_to("https://site.test/about"));
        assert!(outcome.is_loaded());
        assert_eq!(router.current_route(), "https://site.test/about");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("https://site.test"), "https://site.test/");
        assert_eq!(normalize("/relative"), "/relative");
    }
}
