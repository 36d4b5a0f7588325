#![forbid(unsafe_code)]

//! Monotonic progress in `[0.0, 1.0]`.
//!
//! # Invariants
//!
//! 1. Inputs are clamped into `[0.0, 1.0]` before comparison.
//! 2. A write applies only if it is strictly greater than the current value,
//!    so the observed sequence is non-decreasing and never repeats a value.
//! 3. `add(d)` is `set(current + d)` evaluated atomically.
//! 4. `NaN` inputs are ignored.
//!
//! Out-of-range, stale, or decreasing writes are silently dropped: executing
//! code may report redundantly or out of order without corrupting the
//! published sequence.
//!
//! Only the owning command moves progress backwards, via `reset` between
//! executions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rxcmd_reactive::{Property, ReadOnlyProperty};

/// Progress accumulator backed by an observable `f64` property.
///
/// Cloning creates another handle to the same accumulator.
#[derive(Clone)]
pub struct Progress {
    value: Property<f64>,
}

impl Progress {
    /// Accumulator starting at `0.0`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: Property::new(0.0),
        }
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> f64 {
        self.value.get().unwrap_or(0.0)
    }

    /// Advance to `value` (clamped). Returns whether the value changed.
    pub fn set(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        let target = value.clamp(0.0, 1.0);
        self.value
            .update_if(|current| (target > *current).then_some(target))
    }

    /// Advance by `delta` (clamped). Returns whether the value changed.
    pub fn add(&self, delta: f64) -> bool {
        if delta.is_nan() {
            return false;
        }
        self.value.update_if(|current| {
            let target = (current + delta).clamp(0.0, 1.0);
            (target > *current).then_some(target)
        })
    }

    /// Observable view of the value.
    #[must_use]
    pub fn property(&self) -> ReadOnlyProperty<f64> {
        self.value.read_only()
    }

    /// Return to `0.0`, emitting only if the value was not already zero.
    pub(crate) fn reset(&self) {
        self.value.set_if_changed(0.0);
    }

    /// A handle for one execution's unit of work.
    pub(crate) fn context(&self) -> ProgressContext {
        ProgressContext {
            progress: self.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Progress").field(&self.get()).finish()
    }
}

/// Write handle given to progress-aware units of work.
///
/// Valid only while its execution is running: once the command records the
/// outcome, writes through this context (or its clones) are ignored, so a
/// straggling thread cannot disturb the next execution.
#[derive(Clone)]
pub struct ProgressContext {
    progress: Progress,
    open: Arc<AtomicBool>,
}

impl ProgressContext {
    /// Advance to `value`. See [`Progress::set`].
    pub fn set(&self, value: f64) -> bool {
        self.is_open() && self.progress.set(value)
    }

    /// Advance by `delta`. See [`Progress::add`].
    pub fn add(&self, delta: f64) -> bool {
        self.is_open() && self.progress.add(delta)
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> f64 {
        self.progress.get()
    }

    /// Whether writes through this context still apply.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ProgressContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressContext")
            .field("value", &self.get())
            .field("open", &self.is_open())
            .finish()
    }
}
