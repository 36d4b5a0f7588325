#![forbid(unsafe_code)]

//! Thread-safe observable value cells.
//!
//! # Design
//!
//! [`Property<T>`] stores its current value, a write counter, and a list of
//! subscriber callbacks behind one mutex. A write replaces the value and
//! enqueues a delivery addressed to the subscribers registered at that
//! moment. Deliveries are drained outside the lock by whichever thread finds
//! the queue idle; writes made while a drain is running (from a callback, or
//! from another thread) are appended and delivered by the draining thread
//! once the current delivery finishes.
//!
//! This gives every subscriber a strictly write-ordered view without holding
//! a lock across user code, so callbacks may re-enter the property.
//!
//! # Invariants
//!
//! 1. `version()` increments exactly once per successful write.
//! 2. A write is delivered once to each subscriber registered when it was
//!    made, in write order relative to every other write and replay.
//! 3. `subscribe` replays the current value (if any) before any later write.
//! 4. `update`/`update_if` compute and store under the lock: no lost updates.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: Remaining subscribers still receive the value.
//!   The first panic of a drain pass is resumed on the draining thread once
//!   the queue is empty, so failures surface instead of vanishing.
//! - **Write during another thread's drain**: the write is stored and
//!   queued, and the call returns before any subscriber has seen it; the
//!   draining thread delivers it. Order per property is preserved, but a
//!   thread that writes property A and then property B can have B's
//!   delivery finish first while A's is still queued behind a drain running
//!   elsewhere.
//! - **Update closure touches the same property**: deadlock. The closures
//!   given to `update`/`update_if` run under the property lock and must not
//!   call back into the same property.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::observable::{Observable, Observer};
use crate::subscription::Subscription;

pub(crate) type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type PanicPayload = Box<dyn Any + Send>;

/// A queued notification.
enum Delivery<T> {
    /// A write, addressed to the subscribers registered when it was made.
    Broadcast { value: T, targets: Vec<Callback<T>> },
    /// The current value, addressed to a subscriber that just registered.
    Replay { value: T, target: Callback<T> },
}

struct State<T> {
    value: Option<T>,
    version: u64,
    subscribers: Vec<(u64, Callback<T>)>,
    next_id: u64,
    pending: VecDeque<Delivery<T>>,
    draining: bool,
}

impl<T: Clone> State<T> {
    fn store(&mut self, value: T) {
        self.version += 1;
        if !self.subscribers.is_empty() {
            let targets = self
                .subscribers
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();
            self.pending.push_back(Delivery::Broadcast {
                value: value.clone(),
                targets,
            });
        }
        self.value = Some(value);
    }

    /// Become the draining thread if nobody else is.
    fn claim_drain(&mut self) -> bool {
        if self.draining || self.pending.is_empty() {
            return false;
        }
        self.draining = true;
        true
    }
}

/// Shared interior of a [`Property`].
pub(crate) struct Shared<T> {
    state: Mutex<State<T>>,
    /// Subscriptions to upstream sources for derived properties.
    upstream: Mutex<Vec<Subscription>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Every critical section leaves `State` consistent, so a poisoned
        // lock only means a caller's update closure panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn drain(&self) {
        let mut first_panic: Option<PanicPayload> = None;
        loop {
            let next = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        state.draining = false;
                        break;
                    }
                }
            };
            match next {
                Delivery::Broadcast { value, targets } => {
                    for target in &targets {
                        deliver(target, &value, &mut first_panic);
                    }
                }
                Delivery::Replay { value, target } => {
                    deliver(&target, &value, &mut first_panic);
                }
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }
}

fn deliver<T>(target: &Callback<T>, value: &T, first_panic: &mut Option<PanicPayload>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| target(value))) {
        tracing::error!(message = "property.subscriber_panicked");
        first_panic.get_or_insert(payload);
    }
}

/// A mutable, observable value cell with replay-latest semantics.
///
/// Cloning a `Property` creates a new handle to the **same** cell.
///
/// # Example
///
/// ```
/// use rxcmd_reactive::Property;
/// use std::sync::{Arc, Mutex};
///
/// let count = Property::new(1);
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let log = Arc::clone(&seen);
/// let _sub = count.subscribe(move |v| log.lock().unwrap().push(*v));
///
/// count.set(2);
/// count.update(|v| v * 10);
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2, 20]);
/// ```
pub struct Property<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Property")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl<T: Clone + Send + Default + 'static> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + 'static> Property<T> {
    /// Create a property seeded with `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_value(Some(value))
    }

    /// Create a property with no value. Subscribers receive nothing until
    /// the first write.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_value(None)
    }

    fn from_value(value: Option<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    value,
                    version: 0,
                    subscribers: Vec::new(),
                    next_id: 0,
                    pending: VecDeque::new(),
                    draining: false,
                }),
                upstream: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current value, or `None` if the property was never written.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.shared.lock().value.clone()
    }

    /// Number of writes since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.lock().version
    }

    /// Write `value` and notify every current subscriber.
    pub fn set(&self, value: T) {
        self.write_with(|_| Some(value));
    }

    /// Atomically replace the value with `f(current)`.
    ///
    /// Returns the new value, or `None` (and writes nothing) if the property
    /// is empty. `f` runs under the property lock and must not access this
    /// property.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Option<T> {
        self.write_with(|current| current.map(f))
    }

    /// Atomically write `f(current)` if it returns `Some`.
    ///
    /// Returns whether a write happened. `f` runs under the property lock and
    /// must not access this property.
    pub fn update_if(&self, f: impl FnOnce(&T) -> Option<T>) -> bool {
        self.write_with(|current| current.and_then(f)).is_some()
    }

    /// Register `f`, first replaying the current value (if any) to it.
    pub fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.register(Arc::new(f), true)
    }

    /// Register `f` for future writes only.
    pub fn subscribe_changes(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.register(Arc::new(f), false)
    }

    /// Whether any subscriber is currently registered.
    #[must_use]
    pub fn has_observers(&self) -> bool {
        !self.shared.lock().subscribers.is_empty()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Core write primitive: compute the next value from the current one
    /// under the lock, store it, then drain outside the lock.
    pub(crate) fn write_with(&self, f: impl FnOnce(Option<&T>) -> Option<T>) -> Option<T> {
        let (written, drain) = {
            let mut state = self.shared.lock();
            let next = f(state.value.as_ref())?;
            state.store(next.clone());
            (next, state.claim_drain())
        };
        if drain {
            self.shared.drain();
        }
        Some(written)
    }

    fn register(&self, callback: Callback<T>, replay: bool) -> Subscription {
        let (id, drain) = {
            let mut state = self.shared.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, Arc::clone(&callback)));
            if replay && let Some(value) = state.value.clone() {
                state.pending.push_back(Delivery::Replay {
                    value,
                    target: callback,
                });
            }
            (id, state.claim_drain())
        };
        if drain {
            self.shared.drain();
        }

        let weak = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.lock().subscribers.retain(|(sid, _)| *sid != id);
            }
        })
    }

    pub(crate) fn downgrade(&self) -> WeakProperty<T> {
        WeakProperty {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Keep `subscription` to `source`, and `source` itself, alive for as
    /// long as this cell lives. Intermediate derivations stay reachable even
    /// when nobody else holds them.
    pub(crate) fn adopt_from<S: Clone + Send + 'static>(
        &self,
        source: &Property<S>,
        subscription: Subscription,
    ) {
        let source = source.clone();
        self.adopt(Subscription::new(move || {
            drop(subscription);
            drop(source);
        }));
    }

    fn adopt(&self, subscription: Subscription) {
        self.shared
            .upstream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);
    }
}

impl<T: Clone + Send + PartialEq + 'static> Property<T> {
    /// Write `value` only if it differs from the current value.
    ///
    /// Returns whether a write happened.
    pub fn set_if_changed(&self, value: T) -> bool {
        self.write_with(|current| (current != Some(&value)).then_some(value))
            .is_some()
    }
}

impl<T: Clone + Send + 'static> Observable<T> for Property<T> {
    fn observe(&self, observer: Observer<T>) -> Subscription {
        self.register(Arc::from(observer), true)
    }
}

/// Non-owning handle used by derived properties to avoid reference cycles.
pub(crate) struct WeakProperty<T> {
    shared: Weak<Shared<T>>,
}

impl<T> Clone for WeakProperty<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T> WeakProperty<T> {
    pub(crate) fn upgrade(&self) -> Option<Property<T>> {
        self.shared.upgrade().map(|shared| Property { shared })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
