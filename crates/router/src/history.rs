//! Browser history collaborator
//!
//! The router only needs two things from the history API: the current
//! location and `pushState`. Back/forward come in through
//! `Router::handle_popstate` after the host moved the location.

use parking_lot::Mutex;

pub trait BrowserHistory: Send + Sync {
    /// `window.location.href`
    fn current_location(&self) -> String;

    /// `history.pushState({}, "", url)`
    fn push_state(&self, url: &str);
}

#[derive(Debug)]
struct Entries {
    stack: Vec<String>,
    index: usize,
}

/// In-memory session history with back/forward
#[derive(Debug)]
pub struct MemoryHistory {
    entries: Mutex<Entries>,
}

impl MemoryHistory {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(Entries {
                stack: vec![initial.into()],
                index: 0,
            }),
        }
    }

    /// Step back one entry, like the browser back button. Returns the new location.
    pub fn back(&self) -> Option<String> {
        let mut entries = self.entries.lock();
        if entries.index == 0 {
            return None;
        }
        entries.index -= 1;
        Some(entries.stack[entries.index].clone())
    }

    pub fn forward(&self) -> Option<String> {
        let mut entries = self.entries.lock();
        if entries.index + 1 >= entries.stack.len() {
            return None;
        }
        entries.index += 1;
        Some(entries.stack[entries.index].clone())
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().stack.clone()
    }
}

impl BrowserHistory for MemoryHistory {
    fn current_location(&self) -> String {
        let entries = self.entries.lock();
        entries.stack[entries.index].clone()
    }

    /// Drops forward entries, like a real push after going back
    fn push_state(&self, url: &str) {
        let mut entries = self.entries.lock();
        let keep = entries.index + 1;
        entries.stack.truncate(keep);
        entries.stack.push(url.to_string());
        entries.index = keep;
    }
}
