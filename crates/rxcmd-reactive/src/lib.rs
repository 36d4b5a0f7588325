#![forbid(unsafe_code)]

//! Observable value cells for rxcmd.
//!
//! This crate provides the state primitives every command is built on:
//!
//! - [`Property`]: A shared, thread-safe value cell that is also a push-based
//!   observable. Late subscribers receive the latest value first, then every
//!   subsequent write.
//! - [`ReadOnlyProperty`]: A projection or combination of other properties.
//!   It is driven by its upstream sources and cannot be written from outside.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Observable`]: The push-based source abstraction consumed by commands
//!   (for example an externally controlled "can execute" signal).
//!
//! # Architecture
//!
//! `Property<T>` uses `Arc<Mutex<..>>` for shared ownership across threads.
//! Writes update the stored value under the lock, then queue a delivery.
//! Whichever thread finds the queue idle drains it outside the lock, so
//! subscriber callbacks may freely read or write properties (including the
//! one that is notifying them).
//!
//! # Invariants
//!
//! 1. Every write is delivered exactly once to every subscriber registered at
//!    the time of the write, in write order.
//! 2. A new subscriber first receives the current value (if any), ordered
//!    consistently with concurrent writes.
//! 3. `update` and `update_if` are atomic with respect to other writers.
//! 4. Dropping a [`Subscription`] removes the callback before the next write.
//! 5. A panicking subscriber never prevents delivery to the others.

pub mod derive;
pub mod observable;
pub mod property;
pub mod subscription;

pub use derive::{ReadOnlyProperty, combine_all, combine2, constant};
pub use observable::Observable;
pub use property::Property;
pub use subscription::Subscription;
