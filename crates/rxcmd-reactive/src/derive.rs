#![forbid(unsafe_code)]

//! Read-only properties derived from other properties.
//!
//! # Design
//!
//! A derived property is an ordinary [`Property`] cell that only its upstream
//! subscriptions write to. The cell owns those subscriptions and its sources;
//! upstream callbacks hold it weakly. Dropping the last handle to a derived
//! property therefore unsubscribes it from every source, and a source never
//! keeps a derivation alive.
//!
//! Unlike lazily computed values, derivations here are eager: they recompute
//! and notify as soon as a source is written, so subscribers of a derived
//! property observe every intermediate state.
//!
//! # Invariants
//!
//! 1. A derivation has a value as soon as all of its sources have one.
//! 2. Combinations recompute under the derived cell's lock, reading the
//!    latest value of every source, so concurrent source writes can never
//!    leave a stale combination as the final value.
//! 3. [`ReadOnlyProperty::distinct`] never emits two equal values in a row.

use std::fmt;
use std::sync::Arc;

use crate::observable::{Observable, Observer};
use crate::property::{Property, WeakProperty};
use crate::subscription::Subscription;

/// A property that can be observed but not written from outside.
///
/// Obtained from [`Property::read_only`], from a derivation such as
/// [`Property::map`], or from [`combine2`]/[`combine_all`]/[`constant`].
/// Cloning creates a new handle to the same cell.
pub struct ReadOnlyProperty<T> {
    inner: Property<T>,
}

impl<T> Clone for ReadOnlyProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnlyProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnlyProperty").field(&self.inner).finish()
    }
}

impl<T: Clone + Send + 'static> From<Property<T>> for ReadOnlyProperty<T> {
    fn from(inner: Property<T>) -> Self {
        Self { inner }
    }
}

impl<T: Clone + Send + 'static> ReadOnlyProperty<T> {
    /// Current value, or `None` until every source has produced one.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.get()
    }

    /// Number of writes the cell has seen.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version()
    }

    /// Register `f`, first replaying the current value (if any) to it.
    pub fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.inner.subscribe(f)
    }

    /// Register `f` for future values only.
    pub fn subscribe_changes(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.inner.subscribe_changes(f)
    }

    /// Whether any subscriber is currently registered.
    #[must_use]
    pub fn has_observers(&self) -> bool {
        self.inner.has_observers()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    /// Derive a property holding `f` applied to every value of this one.
    pub fn map<U, F>(&self, f: F) -> ReadOnlyProperty<U>
    where
        U: Clone + Send + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.inner.map(f)
    }

    /// Derive a property that skips values equal to the previous one.
    pub fn distinct(&self) -> ReadOnlyProperty<T>
    where
        T: PartialEq,
    {
        self.inner.distinct()
    }
}

impl<T: Clone + Send + 'static> Observable<T> for ReadOnlyProperty<T> {
    fn observe(&self, observer: Observer<T>) -> Subscription {
        self.inner.observe(observer)
    }
}

impl<T: Clone + Send + 'static> Property<T> {
    /// A read-only view of this same cell.
    #[must_use]
    pub fn read_only(&self) -> ReadOnlyProperty<T> {
        ReadOnlyProperty {
            inner: self.clone(),
        }
    }

    /// Derive a property holding `f` applied to every value of this one.
    pub fn map<U, F>(&self, f: F) -> ReadOnlyProperty<U>
    where
        U: Clone + Send + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let target = Property::<U>::empty();
        let weak = target.downgrade();
        let sub = self.subscribe(move |value| {
            if let Some(target) = weak.upgrade() {
                target.set(f(value));
            }
        });
        target.adopt_from(self, sub);
        target.read_only()
    }

    /// Derive a property that skips values equal to the previous one.
    pub fn distinct(&self) -> ReadOnlyProperty<T>
    where
        T: PartialEq,
    {
        let target = Property::<T>::empty();
        let weak = target.downgrade();
        let sub = self.subscribe(move |value| {
            if let Some(target) = weak.upgrade() {
                target.set_if_changed(value.clone());
            }
        });
        target.adopt_from(self, sub);
        target.read_only()
    }
}

/// A property that always holds `value`.
#[must_use]
pub fn constant<T: Clone + Send + 'static>(value: T) -> ReadOnlyProperty<T> {
    Property::new(value).read_only()
}

/// Combine the latest values of two properties.
///
/// The result has a value once both sources do, and recomputes whenever
/// either source is written.
pub fn combine2<A, B, U, F>(a: &ReadOnlyProperty<A>, b: &ReadOnlyProperty<B>, f: F) -> ReadOnlyProperty<U>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(&A, &B) -> U + Send + Sync + 'static,
{
    let target = Property::<U>::empty();
    let wa = a.inner.downgrade();
    let wb = b.inner.downgrade();
    let recompute: Arc<dyn Fn(&Property<U>) + Send + Sync> = Arc::new(move |target: &Property<U>| {
        target.write_with(|_| {
            let a = wa.upgrade()?.get()?;
            let b = wb.upgrade()?.get()?;
            Some(f(&a, &b))
        });
    });

    recompute(&target);
    target.adopt_from(&a.inner, a.subscribe_changes(on_source_change::<A, U>(&target, &recompute)));
    target.adopt_from(&b.inner, b.subscribe_changes(on_source_change::<B, U>(&target, &recompute)));
    target.read_only()
}

/// Combine the latest values of any number of same-typed properties.
///
/// `f` receives the source values in source order. The result has a value
/// once every source does.
pub fn combine_all<A, U, F>(sources: &[ReadOnlyProperty<A>], f: F) -> ReadOnlyProperty<U>
where
    A: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(&[A]) -> U + Send + Sync + 'static,
{
    let target = Property::<U>::empty();
    let weak_sources: Vec<WeakProperty<A>> = sources.iter().map(|s| s.inner.downgrade()).collect();
    let recompute: Arc<dyn Fn(&Property<U>) + Send + Sync> = Arc::new(move |target: &Property<U>| {
        target.write_with(|_| {
            let values = weak_sources
                .iter()
                .map(|w| w.upgrade().and_then(|p| p.get()))
                .collect::<Option<Vec<A>>>()?;
            Some(f(&values))
        });
    });

    recompute(&target);
    for source in sources {
        let sub = source.subscribe_changes(on_source_change::<A, U>(&target, &recompute));
        target.adopt_from(&source.inner, sub);
    }
    target.read_only()
}

fn on_source_change<S, U>(
    target: &Property<U>,
    recompute: &Arc<dyn Fn(&Property<U>) + Send + Sync>,
) -> impl Fn(&S) + Send + Sync + 'static
where
    S: 'static,
    U: Clone + Send + 'static,
{
    let weak = target.downgrade();
    let recompute = Arc::clone(recompute);
    move |_: &S| {
        if let Some(target) = weak.upgrade() {
            recompute(&target);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn map_follows_source() {
        let source = Property::new(10);
        let doubled = source.map(|v| v * 2);
        assert_eq!(doubled.get(), Some(20));

        source.set(5);
        assert_eq!(doubled.get(), Some(10));
    }

    #[test]
    fn map_of_empty_source_is_empty() {
        let source = Property::<i32>::empty();
        let mapped = source.map(|v| v + 1);
        assert_eq!(mapped.get(), None);
        source.set(1);
        assert_eq!(mapped.get(), Some(2));
    }

    #[test]
    fn chained_maps() {
        let source = Property::new(1u64);
        let flag = source.map(|c| *c > 0).map(|b| if *b { "yes" } else { "no" });
        assert_eq!(flag.get(), Some("yes"));
        source.set(0);
        assert_eq!(flag.get(), Some("no"));
    }

    #[test]
    fn distinct_skips_repeats() {
        let source = Property::new(false);
        let d = source.distinct();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let _sub = d.subscribe(move |v| log.lock().unwrap().push(*v));

        source.set(false);
        source.set(true);
        source.set(true);
        source.set(false);
        assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
    }

    #[test]
    fn combine2_recomputes_on_either_source() {
        let width = Property::new(10);
        let height = Property::new(20);
        let area = combine2(&width.read_only(), &height.read_only(), |w, h| w * h);
        assert_eq!(area.get(), Some(200));

        width.set(5);
        assert_eq!(area.get(), Some(100));
        height.set(30);
        assert_eq!(area.get(), Some(150));
    }

    #[test]
    fn combine2_waits_for_both_sources() {
        let a = Property::new(1);
        let b = Property::<i32>::empty();
        let sum = combine2(&a.read_only(), &b.read_only(), |x, y| x + y);
        assert_eq!(sum.get(), None);
        b.set(2);
        assert_eq!(sum.get(), Some(3));
    }

    #[test]
    fn combine2_initial_value_emitted_once() {
        let a = Property::new(1);
        let b = Property::new(2);
        let sum = combine2(&a.read_only(), &b.read_only(), |x, y| x + y);
        assert_eq!(sum.version(), 1);
    }

    #[test]
    fn combine_all_and_or_mean() {
        let flags: Vec<Property<bool>> = (0..3).map(|_| Property::new(true)).collect();
        let views: Vec<_> = flags.iter().map(Property::read_only).collect();
        let all = combine_all(&views, |v| v.iter().all(|b| *b));
        let any = combine_all(&views, |v| v.iter().any(|b| *b));
        assert_eq!(all.get(), Some(true));

        flags[1].set(false);
        assert_eq!(all.get(), Some(false));
        assert_eq!(any.get(), Some(true));

        let levels: Vec<Property<f64>> = vec![Property::new(0.0), Property::new(1.0)];
        let views: Vec<_> = levels.iter().map(Property::read_only).collect();
        let mean = combine_all(&views, |v| v.iter().sum::<f64>() / v.len() as f64);
        assert_eq!(mean.get(), Some(0.5));
        levels[0].set(0.5);
        assert_eq!(mean.get(), Some(0.75));
    }

    #[test]
    fn dropping_derived_unsubscribes_upstream() {
        let source = Property::new(1);
        let mapped = source.map(|v| v + 1);
        assert_eq!(source.subscriber_count(), 1);
        drop(mapped);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn intermediate_derivation_stays_wired() {
        let count = Property::new(0u64);
        // The `map` cell has no handle of its own once `distinct` wraps it.
        let executed = count.map(|c| *c > 0).distinct();
        assert_eq!(executed.get(), Some(false));
        count.set(1);
        count.set(2);
        assert_eq!(executed.get(), Some(true));
        assert_eq!(executed.version(), 2);
    }

    #[test]
    fn derived_survives_source_drop() {
        let mapped;
        {
            let source = Property::new(42);
            mapped = source.map(|v| *v);
        }
        assert_eq!(mapped.get(), Some(42));
    }

    #[test]
    fn constant_holds_value() {
        let c = constant(true);
        assert_eq!(c.get(), Some(true));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let _sub = c.subscribe(move |v| log.lock().unwrap().push(*v));
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn read_only_view_shares_cell() {
        let p = Property::new(1);
        let view = p.read_only();
        p.set(2);
        assert_eq!(view.get(), Some(2));
    }
}
