//! Live document model and body reconciliation
//!
//! The document side of soft navigation: an arena-backed DOM the router
//! can patch in place, and the reconciler that swaps one page body for the
//! next while keeping `persist-id` elements alive.
//!
//! ## Core Design
//!
//! ```text
//! fetched page ─► markup::extract_page ─► body markup ─► reconcile ─► Document (DomArena)
//!                                                             ↓
//!                                                     NodeId (u32), stable while connected
//! ```

pub mod arena;
pub mod document;
pub mod error;
pub mod markup;
pub mod reconcile;
pub mod serializer;
pub mod types;
pub mod utils;

pub use arena::DomArena;
pub use document::Document;
pub use error::{DomError, Result};
pub use markup::{extract_page, PageMarkup};
pub use reconcile::{reconcile, ReconcileReport, ScriptPolicy};
pub use serializer::DomSerializer;
pub use types::*;
