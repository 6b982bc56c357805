//! Soft-navigation router
//!
//! Intercepts in-page link clicks, fetches the target page out of band and
//! patches the live document in place, running and retiring page scripts
//! across the swap.
//!
//! # Architecture
//!
//! 1. **Explicit instances**: the page cache, executor and observers belong
//!    to one `Router`; two routers share nothing
//! 2. **Observables for signalling**: route, loaded flag and link set are
//!    `Observable` values with synchronous, ordered notification
//! 3. **Collaborators behind traits**: network (`PageFetcher`), history
//!    (`BrowserHistory`) and script execution (`ScriptHost`)
//! 4. **No errors across the navigation surface**: a navigation always ends
//!    in a `NavigationOutcome`

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod history;
pub mod links;
pub mod network;
pub mod observable;
pub mod router;

pub use config::RouterConfig;
pub use error::{Result, RouterError};
pub use events::{EventBus, RouterEvent};
pub use executor::{ExitHandler, ExitTransition, ScriptExecutor, TransitionControl, TransitionPhase};
pub use history::{BrowserHistory, MemoryHistory};
pub use links::LinkInterceptor;
pub use network::{FetchError, PageCache, PageFetcher};
pub use observable::{Notifier, Observable, SubscriptionId};
pub use router::{
    ClickOutcome, LoggingScriptHost, NavigationOutcome, Router, ScriptElement, ScriptHost,
};
