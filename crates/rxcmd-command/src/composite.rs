#![forbid(unsafe_code)]

//! Fan-out commands.
//!
//! A [`CompositeCommand`] forwards each execution to all of its children
//! and derives its own state from theirs:
//!
//! | Property      | Derivation                                     |
//! |---------------|------------------------------------------------|
//! | `can_execute` | own source AND every child's `can_execute`     |
//! | `is_executing`| any child executing                            |
//! | `progress`    | mean of the children's progress                |
//! | `result`      | one value per child, once all of them produced |
//! | `error`       | every child error, as it arrives               |
//!
//! # Rounds
//!
//! Each accepted execution opens a round with one empty slot per child. A
//! child result fills its slot; the aggregated result is published when the
//! last slot fills, and the round closes. A child failure, or a child that
//! refuses to start, closes the round at once: it never publishes, and later
//! results of that child (run on its own) fill nothing. A failing child never
//! cancels its siblings.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rxcmd_reactive::{Observable, Property, ReadOnlyProperty, Subscription, combine_all};

use crate::command::{Command, InputShape};
use crate::completion::{Completion, Panics};
use crate::error::{CommandError, ExecutionError};

struct Round<R> {
    open: bool,
    slots: Vec<Option<R>>,
}

impl<R> Round<R> {
    /// Fill `index`; returns the aggregated values once every slot is set.
    fn fill(&mut self, index: usize, value: R) -> Option<Vec<R>> {
        if !self.open {
            return None;
        }
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(value);
        }
        if self.slots.iter().all(Option::is_some) {
            self.open = false;
            Some(self.slots.iter_mut().filter_map(Option::take).collect())
        } else {
            None
        }
    }

    /// Abandon the round; nothing fills it afterwards.
    fn close(&mut self) {
        self.open = false;
        self.slots.clear();
    }
}

fn lock<R>(round: &Mutex<Round<R>>) -> MutexGuard<'_, Round<R>> {
    round.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<I, R> {
    children: Vec<Command<I, R>>,
    shape: InputShape,
    can_execute: ReadOnlyProperty<bool>,
    is_executing: ReadOnlyProperty<bool>,
    progress: ReadOnlyProperty<f64>,
    result: Property<Vec<R>>,
    error: Property<ExecutionError>,
    round: Arc<Mutex<Round<R>>>,
    forwarding: AtomicBool,
    _source: Option<Box<dyn Observable<bool>>>,
    _subscriptions: Vec<Subscription>,
}

/// A command that executes all of its children with the same input.
///
/// Cloning creates another handle to the same composite.
pub struct CompositeCommand<I, R> {
    inner: Arc<Inner<I, R>>,
}

impl<I, R> Clone for CompositeCommand<I, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, R> CompositeCommand<I, R>
where
    I: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Composite over `children`, always enabled on its own account.
    ///
    /// # Errors
    ///
    /// [`CommandError::EmptyComposite`] without children,
    /// [`CommandError::MixedInputShape`] if some children take an input and
    /// others do not.
    pub fn new(children: Vec<Command<I, R>>) -> Result<Self, CommandError> {
        Self::build(children, None)
    }

    /// Composite whose own executability also follows `source`.
    ///
    /// # Errors
    ///
    /// As for [`new`](Self::new).
    pub fn with_can_execute(
        children: Vec<Command<I, R>>,
        source: impl Observable<bool> + 'static,
    ) -> Result<Self, CommandError> {
        Self::build(children, Some(Box::new(source)))
    }

    fn build(
        children: Vec<Command<I, R>>,
        source: Option<Box<dyn Observable<bool>>>,
    ) -> Result<Self, CommandError> {
        let shape = children
            .first()
            .map(Command::input_shape)
            .ok_or(CommandError::EmptyComposite)?;
        if children.iter().any(|child| child.input_shape() != shape) {
            return Err(CommandError::MixedInputShape);
        }

        let mut subscriptions = Vec::new();
        let own = match &source {
            None => Property::new(true),
            Some(source) => {
                let own = Property::empty();
                let sink = own.clone();
                subscriptions.push(source.observe(Box::new(move |allowed: &bool| {
                    sink.set_if_changed(*allowed);
                })));
                own
            }
        };

        let mut gates = vec![own.read_only()];
        gates.extend(children.iter().map(Command::can_execute_property));
        let can_execute = combine_all(&gates, |gates: &[bool]| gates.iter().all(|g| *g)).distinct();

        let executing: Vec<_> = children.iter().map(Command::is_executing_property).collect();
        let is_executing =
            combine_all(&executing, |flags: &[bool]| flags.iter().any(|f| *f)).distinct();

        let progresses: Vec<_> = children.iter().map(Command::progress_property).collect();
        let progress = combine_all(&progresses, |values: &[f64]| {
            values.iter().sum::<f64>() / values.len() as f64
        });

        let result = Property::empty();
        let error = Property::empty();
        let round = Arc::new(Mutex::new(Round {
            open: false,
            slots: Vec::new(),
        }));

        for (index, child) in children.iter().enumerate() {
            let result_round = Arc::clone(&round);
            let sink = result.clone();
            subscriptions.push(child.result_property().subscribe_changes(move |value: &R| {
                let values = lock(&result_round).fill(index, value.clone());
                if let Some(values) = values {
                    tracing::debug!(message = "composite.round_complete", children = values.len());
                    sink.set(values);
                }
            }));

            let error_round = Arc::clone(&round);
            let sink = error.clone();
            subscriptions.push(child.error_property().subscribe_changes(
                move |failure: &ExecutionError| {
                    tracing::debug!(message = "composite.child_failed", child = index, error = %failure);
                    lock(&error_round).close();
                    sink.set(failure.clone());
                },
            ));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                children,
                shape,
                can_execute,
                is_executing,
                progress,
                result,
                error,
                round,
                forwarding: AtomicBool::new(false),
                _source: source,
                _subscriptions: subscriptions,
            }),
        })
    }

    /// Execute every child with a clone of `input`.
    ///
    /// The returned [`Completion`] finishes once every child execution has.
    ///
    /// # Errors
    ///
    /// [`CommandError::UnexpectedInput`] if the children take no input.
    pub fn execute(&self, input: I) -> Result<Completion, CommandError>
    where
        I: Clone,
    {
        if self.inner.shape == InputShape::NoInput {
            return Err(CommandError::UnexpectedInput);
        }
        self.forward(|child| child.execute(input.clone()))
    }

    /// Execute every child of a composite built from no-input commands.
    ///
    /// # Errors
    ///
    /// [`CommandError::InputRequired`] if the children need an input.
    pub fn execute_empty(&self) -> Result<Completion, CommandError> {
        if self.inner.shape == InputShape::Input {
            return Err(CommandError::InputRequired);
        }
        self.forward(Command::execute_empty)
    }

    fn forward(
        &self,
        start: impl Fn(&Command<I, R>) -> Result<Completion, CommandError>,
    ) -> Result<Completion, CommandError> {
        let inner = &self.inner;
        if !self.can_execute()
            || inner
                .forwarding
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            tracing::trace!(message = "composite.rejected");
            return Ok(Completion::ready());
        }

        {
            let mut round = lock(&inner.round);
            round.open = true;
            round.slots = inner.children.iter().map(|_| None).collect();
        }
        tracing::debug!(message = "composite.execute", children = inner.children.len());

        let mut completions = Vec::with_capacity(inner.children.len());
        let mut panics = Panics::default();
        for child in &inner.children {
            panics.run(|| match start(child) {
                Ok(completion) if completion.is_rejected() => {
                    tracing::debug!(message = "composite.child_rejected", label = child.label());
                    lock(&inner.round).close();
                }
                Ok(completion) => completions.push(completion),
                Err(CommandError::Execution(failure)) => {
                    lock(&inner.round).close();
                    inner.error.set(failure);
                }
                Err(other) => {
                    lock(&inner.round).close();
                    tracing::warn!(message = "composite.child_refused", label = child.label(), error = %other);
                }
            });
        }
        inner.forwarding.store(false, Ordering::Release);
        panics.resume();
        Ok(Completion::all(completions))
    }
}

impl<I, R> CompositeCommand<I, R>
where
    R: Clone + Send + 'static,
{
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.inner.can_execute.get().unwrap_or(false)
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.inner.is_executing.get().unwrap_or(false)
    }

    /// Results of the most recent round in which every child succeeded, in
    /// child order.
    #[must_use]
    pub fn result(&self) -> Option<Vec<R>> {
        self.inner.result.get()
    }

    /// Most recent child failure.
    #[must_use]
    pub fn error(&self) -> Option<ExecutionError> {
        self.inner.error.get()
    }

    /// Mean progress of the children.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.inner.progress.get().unwrap_or(0.0)
    }

    #[must_use]
    pub fn can_execute_property(&self) -> ReadOnlyProperty<bool> {
        self.inner.can_execute.clone()
    }

    #[must_use]
    pub fn is_executing_property(&self) -> ReadOnlyProperty<bool> {
        self.inner.is_executing.clone()
    }

    #[must_use]
    pub fn result_property(&self) -> ReadOnlyProperty<Vec<R>> {
        self.inner.result.read_only()
    }

    #[must_use]
    pub fn error_property(&self) -> ReadOnlyProperty<ExecutionError> {
        self.inner.error.read_only()
    }

    #[must_use]
    pub fn progress_property(&self) -> ReadOnlyProperty<f64> {
        self.inner.progress.clone()
    }

    #[must_use]
    pub fn children(&self) -> &[Command<I, R>] {
        &self.inner.children
    }

    #[must_use]
    pub fn input_shape(&self) -> InputShape {
        self.inner.shape
    }
}

impl<I, R> fmt::Debug for CompositeCommand<I, R>
where
    R: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeCommand")
            .field("children", &self.inner.children.len())
            .field("input_shape", &self.inner.shape)
            .field("can_execute", &self.can_execute())
            .field("is_executing", &self.is_executing())
            .finish()
    }
}
