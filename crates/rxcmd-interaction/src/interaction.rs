#![forbid(unsafe_code)]

//! Request/response handshakes.
//!
//! An [`Interaction`] lets a producer (typically a command's unit of work)
//! ask an outside party for an answer without knowing who that party is. A
//! handler registers itself; `invoke` passes it an [`InteractionContext`]
//! that must be handled exactly once.
//!
//! # Invariants
//!
//! 1. The most recently registered live handler receives each invocation.
//! 2. `on_handled` runs at most once per invocation, on the thread that
//!    handled it.
//! 3. Handling an already-handled context fails with
//!    [`InteractionError::AlreadyHandled`] and has no other effect.
//!
//! A context dropped without being handled is logged; its `on_handled` never
//! runs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rxcmd_reactive::{Property, ReadOnlyProperty, Subscription};

use crate::error::InteractionError;

type Handler<I, O> = Arc<dyn Fn(InteractionContext<I, O>) + Send + Sync>;
type OnHandled<O> = Box<dyn FnOnce(O) + Send>;

struct Registry<I, O> {
    label: &'static str,
    handlers: Mutex<Vec<(u64, Handler<I, O>)>>,
    next_id: AtomicU64,
    has_handler: Property<bool>,
}

impl<I, O> Registry<I, O> {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Handler<I, O>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring `has_handler` in line with the handler stack. The stack is read
    /// under the property lock, so the last writer always sees the final
    /// state.
    fn sync_has_handler(&self) {
        self.has_handler.update_if(|current| {
            let now = !self.lock().is_empty();
            (*current != now).then_some(now)
        });
    }
}

/// A one-shot handshake between a producer and a registered handler.
///
/// Cloning creates another handle to the same interaction.
///
/// # Example
///
/// ```
/// use rxcmd_interaction::Interaction;
/// use std::sync::{Arc, Mutex};
///
/// let confirm = Interaction::<String, bool>::new();
/// let _handler = confirm.register_handler(|ctx| {
///     let answer = ctx.input().starts_with("keep");
///     ctx.handle(answer).unwrap();
/// });
///
/// let answer = Arc::new(Mutex::new(None));
/// let slot = Arc::clone(&answer);
/// confirm
///     .invoke("keep changes?".to_string(), move |ok| *slot.lock().unwrap() = Some(ok))
///     .unwrap();
/// assert_eq!(*answer.lock().unwrap(), Some(true));
/// ```
pub struct Interaction<I, O> {
    registry: Arc<Registry<I, O>>,
}

impl<I, O> Clone for Interaction<I, O> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<I, O> Default for Interaction<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Interaction<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::with_label("interaction")
    }

    /// Interaction whose log events and errors carry `label`.
    #[must_use]
    pub fn with_label(label: &'static str) -> Self {
        Self {
            registry: Arc::new(Registry {
                label,
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                has_handler: Property::new(false),
            }),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.registry.label
    }

    /// Register `handler`. It receives every invocation until the returned
    /// subscription is dropped or a later handler registers.
    pub fn register_handler(
        &self,
        handler: impl Fn(InteractionContext<I, O>) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut handlers = self.registry.lock();
            handlers.push((id, Arc::new(handler)));
            handlers.len()
        };
        tracing::debug!(message = "interaction.handler_registered", label = self.registry.label, handlers = count);
        self.registry.sync_has_handler();

        let weak: Weak<Registry<I, O>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            let Some(registry) = weak.upgrade() else {
                return;
            };
            let remaining = {
                let mut handlers = registry.lock();
                handlers.retain(|(other, _)| *other != id);
                handlers.len()
            };
            tracing::debug!(message = "interaction.handler_removed", label = registry.label, handlers = remaining);
            registry.sync_has_handler();
        })
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        !self.registry.lock().is_empty()
    }

    /// Observable view of [`has_handler`](Self::has_handler).
    #[must_use]
    pub fn has_handler_property(&self) -> ReadOnlyProperty<bool> {
        self.registry.has_handler.read_only()
    }

    /// Ask the current handler to respond to `input`. `on_handled` receives
    /// the response once the handler (or anyone it passed the context to)
    /// handles it.
    ///
    /// # Errors
    ///
    /// [`InteractionError::NoHandler`] if no handler is registered; nothing
    /// is delivered in that case.
    pub fn invoke(
        &self,
        input: I,
        on_handled: impl FnOnce(O) + Send + 'static,
    ) -> Result<(), InteractionError> {
        let handler = self.registry.lock().last().map(|(_, h)| Arc::clone(h));
        let Some(handler) = handler else {
            tracing::warn!(message = "interaction.no_handler", label = self.registry.label);
            return Err(InteractionError::NoHandler {
                label: self.registry.label,
            });
        };
        tracing::debug!(message = "interaction.invoke", label = self.registry.label);
        handler(InteractionContext {
            shared: Arc::new(Pending {
                label: self.registry.label,
                input,
                on_handled: Mutex::new(Some(Box::new(on_handled))),
            }),
        });
        Ok(())
    }
}

impl<I, O> fmt::Debug for Interaction<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interaction")
            .field("label", &self.registry.label)
            .field("handlers", &self.registry.lock().len())
            .finish()
    }
}

struct Pending<I, O> {
    label: &'static str,
    input: I,
    on_handled: Mutex<Option<OnHandled<O>>>,
}

impl<I, O> Pending<I, O> {
    fn take(&self) -> Option<OnHandled<O>> {
        self.on_handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn is_handled(&self) -> bool {
        self.on_handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<I, O> Drop for Pending<I, O> {
    fn drop(&mut self) {
        if !self.is_handled() {
            tracing::warn!(message = "interaction.dropped_unhandled", label = self.label);
        }
    }
}

/// One invocation, as seen by a handler.
///
/// Clones share the invocation, so a handler may answer from another thread
/// or later.
pub struct InteractionContext<I, O> {
    shared: Arc<Pending<I, O>>,
}

impl<I, O> Clone for InteractionContext<I, O> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<I, O> InteractionContext<I, O> {
    #[must_use]
    pub fn input(&self) -> &I {
        &self.shared.input
    }

    /// Answer the invocation.
    ///
    /// # Errors
    ///
    /// [`InteractionError::AlreadyHandled`] if this invocation was answered
    /// before.
    pub fn handle(&self, output: O) -> Result<(), InteractionError> {
        let Some(on_handled) = self.shared.take() else {
            tracing::warn!(message = "interaction.already_handled", label = self.shared.label);
            return Err(InteractionError::AlreadyHandled);
        };
        tracing::debug!(message = "interaction.handled", label = self.shared.label);
        on_handled(output);
        Ok(())
    }

    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.shared.is_handled()
    }
}

impl<I> InteractionContext<I, ()> {
    /// Answer an invocation that expects no output.
    ///
    /// # Errors
    ///
    /// As for [`handle`](Self::handle).
    pub fn acknowledge(&self) -> Result<(), InteractionError> {
        self.handle(())
    }
}

impl<I: fmt::Debug, O> fmt::Debug for InteractionContext<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionContext")
            .field("input", &self.shared.input)
            .field("handled", &self.is_handled())
            .finish()
    }
}
