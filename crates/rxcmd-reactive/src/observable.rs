#![forbid(unsafe_code)]

//! The push-based source abstraction.

use crate::subscription::Subscription;

/// Boxed subscriber callback accepted by [`Observable::observe`].
pub type Observer<T> = Box<dyn Fn(&T) + Send + Sync>;

/// A push-based source of values.
///
/// Implementors must deliver values to a given observer in the order they
/// were produced. Stateful sources (such as [`Property`](crate::Property))
/// deliver their current value immediately on subscription.
///
/// The trait is object safe so that commands can hold an externally supplied
/// source as `Box<dyn Observable<bool>>`.
pub trait Observable<T>: Send + Sync {
    /// Register `observer`; it stays registered until the returned guard drops.
    fn observe(&self, observer: Observer<T>) -> Subscription;
}

impl<T, O: Observable<T> + ?Sized> Observable<T> for std::sync::Arc<O> {
    fn observe(&self, observer: Observer<T>) -> Subscription {
        (**self).observe(observer)
    }
}

impl<T, O: Observable<T> + ?Sized> Observable<T> for Box<O> {
    fn observe(&self, observer: Observer<T>) -> Subscription {
        (**self).observe(observer)
    }
}
