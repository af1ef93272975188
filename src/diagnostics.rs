//! Non-fatal diagnostics accumulated by a store.
//!
//! Problems that must not interrupt callers (unreadable or corrupt
//! documents, missing home directory, writes skipped) are recorded here,
//! logged, and handed to an optional observer as they happen.

use std::fmt;

/// Callback invoked with each diagnostic as it is recorded.
pub type Observer = Box<dyn Fn(&str) + Send + Sync>;

/// Append-only diagnostic log owned by one store.
#[derive(Default)]
pub struct Diagnostics {
    messages: Vec<String>,
    observer: Option<Observer>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Observer) -> Self {
        Self {
            messages: Vec::new(),
            observer: Some(observer),
        }
    }

    /// Record a diagnostic, log it and notify the observer.
    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        if let Some(observer) = &self.observer {
            observer(&message);
        }
        self.messages.push(message);
    }

    /// Every message recorded so far, oldest first.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("messages", &self.messages)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
