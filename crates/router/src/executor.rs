//! Script Lifecycle Executor - page scripts and their exit transitions
//!
//! A page script runs once when its page is entered and may hand back an
//! `ExitHandler`. Before the router leaves the page, every exit handler is
//! invoked with an `ExitTransition`. A handler that never calls
//! `begin_transition` is done as soon as it returns; one that does holds the
//! navigation until it calls `finish`, or until a newer navigation aborts it.
//!
//! Each invocation is a small state machine driven by messages, not by
//! flags captured in closures:
//!
//! ```text
//!   NotStarted ──handler returns──► Finished   (send true)
//!       │
//!   begin_transition
//!       ▼
//!   Deferred ──finish()──► Finished            (send true)
//!       │
//!   abort_cleanup()
//!       ▼
//!   Aborted                                    (send false, run on_abort)
//! ```
//!
//! Deferred invocations sit in the abort registry until they settle.

use futures_util::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

type AbortCallback = Box<dyn FnOnce() + Send>;
type DoneCallback = Box<dyn FnOnce(bool) + Send>;
type PageScript = Box<dyn FnOnce() -> Option<ExitHandler> + Send>;

/// Exit handler returned by a page script
#[derive(Clone)]
pub struct ExitHandler(Arc<dyn Fn(ExitTransition) + Send + Sync>);

impl ExitHandler {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(ExitTransition) + Send + Sync + 'static,
    {
        Self(Arc::new(handler))
    }

    fn call(&self, transition: ExitTransition) {
        (self.0)(transition)
    }

    fn same_as(&self, other: &ExitHandler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ExitHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExitHandler")
    }
}

/// Where one exit-handler invocation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    NotStarted,
    Deferred,
    Finished,
    Aborted,
}

struct SlotState {
    phase: TransitionPhase,
    completion: Option<oneshot::Sender<bool>>,
    on_abort: Vec<AbortCallback>,
    on_done: Vec<DoneCallback>,
}

/// One exit-handler invocation
struct TransitionSlot {
    id: u64,
    state: Mutex<SlotState>,
}

impl TransitionSlot {
    fn new(id: u64, completion: oneshot::Sender<bool>) -> Self {
        Self {
            id,
            state: Mutex::new(SlotState {
                phase: TransitionPhase::NotStarted,
                completion: Some(completion),
                on_abort: Vec::new(),
                on_done: Vec::new(),
            }),
        }
    }

    fn phase(&self) -> TransitionPhase {
        self.state.lock().phase
    }

    /// NotStarted → Deferred. True only for the call that made the move.
    fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != TransitionPhase::NotStarted {
            return false;
        }
        state.phase = TransitionPhase::Deferred;
        true
    }

    /// The handler returned without asking for a delay
    fn settle_untouched(&self) {
        let mut state = self.state.lock();
        if state.phase == TransitionPhase::NotStarted {
            state.phase = TransitionPhase::Finished;
            if let Some(completion) = state.completion.take() {
                let _ = completion.send(true);
            }
        }
    }

    /// Deferred → Finished
    fn finish(&self) -> bool {
        let done = {
            let mut state = self.state.lock();
            if state.phase != TransitionPhase::Deferred {
                return false;
            }
            state.phase = TransitionPhase::Finished;
            if let Some(completion) = state.completion.take() {
                let _ = completion.send(true); // Receiver gone: cleanup already gave up
            }
            state.on_abort.clear();
            std::mem::take(&mut state.on_done)
        };

        for callback in done {
            callback(false);
        }
        true
    }

    /// Deferred → Aborted. Callbacks run outside the lock.
    fn abort(&self) -> bool {
        let (aborts, done) = {
            let mut state = self.state.lock();
            if state.phase != TransitionPhase::Deferred {
                return false;
            }
            state.phase = TransitionPhase::Aborted;
            if let Some(completion) = state.completion.take() {
                let _ = completion.send(false);
            }
            (
                std::mem::take(&mut state.on_abort),
                std::mem::take(&mut state.on_done),
            )
        };

        for callback in aborts {
            callback();
        }
        for callback in done {
            callback(true);
        }
        true
    }

    fn on_abort(&self, callback: AbortCallback) {
        let mut state = self.state.lock();
        let phase = state.phase;
        match phase {
            TransitionPhase::Aborted => {
                drop(state);
                callback();
            }
            TransitionPhase::Finished => {}
            _ => state.on_abort.push(callback),
        }
    }

    fn on_done(&self, callback: DoneCallback) {
        let mut state = self.state.lock();
        let phase = state.phase;
        match phase {
            TransitionPhase::Aborted => {
                drop(state);
                callback(true);
            }
            TransitionPhase::Finished => {
                drop(state);
                callback(false);
            }
            _ => state.on_done.push(callback),
        }
    }
}

/// Pending abort callbacks, one per exit handler mid-transition
#[derive(Clone, Default)]
pub struct AbortRegistry {
    pending: Arc<Mutex<Vec<Arc<TransitionSlot>>>>,
}

impl AbortRegistry {
    fn register(&self, slot: Arc<TransitionSlot>) {
        self.pending.lock().push(slot);
    }

    fn remove(&self, id: u64) {
        self.pending.lock().retain(|slot| slot.id != id);
    }

    /// Abort every pending transition in registration order.
    /// Each entry leaves the registry before its callbacks run.
    pub fn abort_all(&self) -> usize {
        let mut aborted = 0;
        loop {
            let next = {
                let mut pending = self.pending.lock();
                if pending.is_empty() {
                    break;
                }
                pending.remove(0)
            };
            if next.abort() {
                aborted += 1;
            }
        }
        aborted
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability handed to an exit handler
pub struct ExitTransition {
    next_path: String,
    slot: Arc<TransitionSlot>,
    registry: AbortRegistry,
}

impl ExitTransition {
    /// The route being navigated to
    pub fn next_path(&self) -> &str {
        &self.next_path
    }

    /// Hold the navigation until `finish` is called on the returned control
    pub fn begin_transition(&self) -> TransitionControl {
        if self.slot.begin() {
            self.registry.register(Arc::clone(&self.slot));
        }
        TransitionControl {
            slot: Arc::clone(&self.slot),
            registry: self.registry.clone(),
        }
    }
}

/// Completion side of a deferred exit transition
#[derive(Clone)]
pub struct TransitionControl {
    slot: Arc<TransitionSlot>,
    registry: AbortRegistry,
}

impl TransitionControl {
    /// Release the navigation. No effect once aborted.
    pub fn finish(&self) {
        if self.slot.finish() {
            self.registry.remove(self.slot.id);
        }
    }

    /// Run `callback` once if a newer navigation aborts this transition
    pub fn on_abort<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.slot.on_abort(Box::new(callback));
    }

    /// Run `callback(aborted)` once the transition settles either way
    pub fn on_done<F>(&self, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.slot.on_done(Box::new(callback));
    }

    pub fn is_aborted(&self) -> bool {
        self.slot.phase() == TransitionPhase::Aborted
    }

    pub fn phase(&self) -> TransitionPhase {
        self.slot.phase()
    }
}

/// One cleanup in flight, counted until dropped, even mid-await
struct CleanupGuard<'a>(&'a AtomicUsize);

impl<'a> CleanupGuard<'a> {
    fn enter(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ExecutorInner {
    handlers: Mutex<Vec<ExitHandler>>,
    deferred: Mutex<Vec<PageScript>>,
    document_ready: AtomicBool,
    /// Cleanups in flight; a superseding navigation starts one before the old one returns
    active_cleanups: AtomicUsize,
    registry: AbortRegistry,
    next_slot: AtomicU64,
}

/// Runs page scripts and drives their exit transitions
#[derive(Clone)]
pub struct ScriptExecutor {
    inner: Arc<ExecutorInner>,
}

impl ScriptExecutor {
    /// `document_ready`: whether scripts may run immediately
    pub fn new(document_ready: bool) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                handlers: Mutex::new(Vec::new()),
                deferred: Mutex::new(Vec::new()),
                document_ready: AtomicBool::new(document_ready),
                active_cleanups: AtomicUsize::new(0),
                registry: AbortRegistry::default(),
                next_slot: AtomicU64::new(1),
            }),
        }
    }

    /// Run a page script now, or once the document has loaded
    pub fn execute_script<F>(&self, script: F)
    where
        F: FnOnce() -> Option<ExitHandler> + Send + 'static,
    {
        {
            let mut deferred = self.inner.deferred.lock();
            if !self.inner.document_ready.load(Ordering::SeqCst) {
                tracing::debug!("Deferring page script until the document has loaded");
                deferred.push(Box::new(script));
                return;
            }
        }
        self.run(Box::new(script));
    }

    fn run(&self, script: PageScript) {
        if let Some(handler) = script() {
            self.inner.handlers.lock().push(handler);
        }
    }

    /// Document finished loading: flush deferred scripts in registration order
    pub fn mark_document_ready(&self) -> usize {
        let queued = {
            let mut deferred = self.inner.deferred.lock();
            self.inner.document_ready.store(true, Ordering::SeqCst);
            std::mem::take(&mut *deferred)
        };

        let count = queued.len();
        for script in queued {
            self.run(script);
        }
        count
    }

    /// Invoke every exit handler and wait until all of them settle
    ///
    /// True when every handler finished; the handlers are then discarded.
    /// False when any was aborted; the handlers stay registered and run
    /// again on the next cleanup.
    pub async fn cleanup_executed_scripts(&self, next_path: &str) -> bool {
        let handlers: Vec<ExitHandler> = self.inner.handlers.lock().clone();
        let guard = CleanupGuard::enter(&self.inner.active_cleanups);
        tracing::debug!("Cleaning up {} page script(s)", handlers.len());

        let waits: Vec<_> = handlers
            .iter()
            .map(|handler| {
                let (tx, rx) = oneshot::channel();
                let id = self.inner.next_slot.fetch_add(1, Ordering::Relaxed);
                let slot = Arc::new(TransitionSlot::new(id, tx));

                handler.call(ExitTransition {
                    next_path: next_path.to_string(),
                    slot: Arc::clone(&slot),
                    registry: self.inner.registry.clone(),
                });
                slot.settle_untouched();

                async move { rx.await.unwrap_or(false) }
            })
            .collect();

        let results = join_all(waits).await;
        drop(guard);

        if results.iter().any(|proceed| !proceed) {
            tracing::debug!("Cleanup aborted");
            return false;
        }

        self.inner
            .handlers
            .lock()
            .retain(|kept| !handlers.iter().any(|done| done.same_as(kept)));
        true
    }

    /// Abort every exit transition still waiting for `finish`
    pub fn abort_cleanup(&self) -> usize {
        let aborted = self.inner.registry.abort_all();
        if aborted > 0 {
            tracing::debug!("Aborted {} exit transition(s)", aborted);
        }
        aborted
    }

    pub fn is_performing_cleanup(&self) -> bool {
        self.inner.active_cleanups.load(Ordering::SeqCst) > 0
    }

    /// Exit handlers registered for the current page
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }

    pub fn pending_aborts(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn deferred_count(&self) -> usize {
        self.inner.deferred.lock().len()
    }
}

impl fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("handlers", &self.handler_count())
            .field("deferred", &self.deferred_count())
            .field("pending_aborts", &self.pending_aborts())
            .finish()
    }
}
