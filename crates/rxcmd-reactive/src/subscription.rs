#![forbid(unsafe_code)]

//! RAII subscription guards.

use std::fmt;

type Cancel = Box<dyn FnOnce() + Send + Sync>;

/// RAII guard for a registered callback.
///
/// Dropping the guard unregisters the callback. Use [`detach`](Self::detach)
/// to keep the callback registered for the lifetime of its source instead.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<Cancel>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` exactly once when dropped.
    ///
    /// This is the hook for custom [`Observable`](crate::Observable) sources.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Leave the callback registered for as long as its source lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    /// Whether dropping this guard would unregister anything.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
