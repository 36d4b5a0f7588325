#![forbid(unsafe_code)]

//! Command construction.
//!
//! Every `build_*` method is a thin adapter: it normalizes the caller's
//! closure into the state machine's single work shape (input plus
//! [`Completer`]) and picks the progress bracket. With no executor the work
//! runs inline inside `execute`; with one, `execute` only dispatches it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rxcmd_reactive::Observable;

use crate::command::{Command, NoInput, Parts, WithInput, Work};
use crate::completion::{Completer, Latch};
use crate::config::{CommandConfig, UnobservedErrors};
use crate::error::{BoxError, ExecutionError};
use crate::executor::Executor;
use crate::progress::ProgressContext;

/// Builder for [`Command`].
///
/// # Example
///
/// ```
/// use rxcmd_command::{CommandBuilder, ManualExecutor};
/// use rxcmd_reactive::Property;
///
/// let enabled = Property::new(true);
/// let executor = ManualExecutor::new();
/// let load = CommandBuilder::new()
///     .label("load")
///     .can_execute(enabled.clone())
///     .executor(executor.clone())
///     .build_fn_with_progress(|n: u32, progress| {
///         progress.set(0.5);
///         Ok::<_, std::io::Error>(n * 2)
///     });
///
/// load.execute(21).unwrap();
/// assert!(load.is_executing());
/// executor.run_all();
/// assert_eq!(load.result(), Some(42));
/// ```
#[derive(Default)]
pub struct CommandBuilder {
    config: CommandConfig,
    can_execute: Option<Box<dyn Observable<bool>>>,
    executor: Option<Arc<dyn Executor>>,
}

impl CommandBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: CommandConfig) -> Self {
        self.config = config;
        self
    }

    /// Label used in log events.
    #[must_use]
    pub fn label(mut self, label: impl Into<std::borrow::Cow<'static, str>>) -> Self {
        self.config = self.config.with_label(label);
        self
    }

    #[must_use]
    pub fn unobserved_errors(mut self, policy: UnobservedErrors) -> Self {
        self.config = self.config.with_unobserved_errors(policy);
        self
    }

    /// External executability signal. The command stays disabled until the
    /// source produces its first value.
    #[must_use]
    pub fn can_execute(mut self, source: impl Observable<bool> + 'static) -> Self {
        self.can_execute = Some(Box::new(source));
        self
    }

    /// Run work on `executor` instead of inside `execute`.
    #[must_use]
    pub fn executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Command mapping each input through `f`.
    pub fn build_fn<I, R, E, F>(self, f: F) -> Command<I, R>
    where
        I: Send + 'static,
        R: Clone + Send + 'static,
        E: Into<BoxError>,
        F: Fn(I) -> Result<R, E> + Send + Sync + 'static,
    {
        self.with_input(move |input, _| f(input).map_err(ExecutionError::new), true)
    }

    /// Like [`build_fn`](Self::build_fn), with a progress handle. Progress
    /// ends wherever the work leaves it.
    pub fn build_fn_with_progress<I, R, E, F>(self, f: F) -> Command<I, R>
    where
        I: Send + 'static,
        R: Clone + Send + 'static,
        E: Into<BoxError>,
        F: Fn(I, &ProgressContext) -> Result<R, E> + Send + Sync + 'static,
    {
        self.with_input(
            move |input, progress| f(input, progress).map_err(ExecutionError::new),
            false,
        )
    }

    /// Command producing a value from `f` without input.
    pub fn build_supplier<R, E, F>(self, f: F) -> Command<(), R>
    where
        R: Clone + Send + 'static,
        E: Into<BoxError>,
        F: Fn() -> Result<R, E> + Send + Sync + 'static,
    {
        self.without_input(move |_| f().map_err(ExecutionError::new), true)
    }

    /// Like [`build_supplier`](Self::build_supplier), with a progress handle.
    pub fn build_supplier_with_progress<R, E, F>(self, f: F) -> Command<(), R>
    where
        R: Clone + Send + 'static,
        E: Into<BoxError>,
        F: Fn(&ProgressContext) -> Result<R, E> + Send + Sync + 'static,
    {
        self.without_input(move |progress| f(progress).map_err(ExecutionError::new), false)
    }

    /// Command whose work reports through a [`Completer`], possibly from
    /// another thread and after `f` returns.
    pub fn build_deferred<I, R, F>(self, f: F) -> Command<I, R>
    where
        I: Send + 'static,
        R: Clone + Send + 'static,
        F: Fn(I, Completer<R>) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let executor = self.executor.clone();
        let work: WithInput<I, R> = Box::new(move |input: I, completer: Completer<R>| {
            let f = Arc::clone(&f);
            let latch = completer.latch();
            dispatch(executor.as_deref(), move || {
                start_deferred(&latch, move || f(input, completer));
            });
        });
        self.assemble(Work::WithInput(work), false, true)
    }

    /// Deferred command without input.
    pub fn build_deferred_supplier<R, F>(self, f: F) -> Command<(), R>
    where
        R: Clone + Send + 'static,
        F: Fn(Completer<R>) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let executor = self.executor.clone();
        let work: NoInput<R> = Box::new(move |completer: Completer<R>| {
            let f = Arc::clone(&f);
            let latch = completer.latch();
            dispatch(executor.as_deref(), move || {
                start_deferred(&latch, move || f(completer));
            });
        });
        self.assemble(Work::NoInput(work), false, true)
    }

    fn with_input<I, R, B>(self, body: B, bracket: bool) -> Command<I, R>
    where
        I: Send + 'static,
        R: Clone + Send + 'static,
        B: Fn(I, &ProgressContext) -> Result<R, ExecutionError> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let executor = self.executor.clone();
        let synchronous = executor.is_none();
        let work: WithInput<I, R> = Box::new(move |input: I, completer: Completer<R>| {
            let body = Arc::clone(&body);
            dispatch(executor.as_deref(), move || {
                run_body(completer, move |progress| body(input, progress));
            });
        });
        self.assemble(Work::WithInput(work), synchronous, bracket)
    }

    fn without_input<R, B>(self, body: B, bracket: bool) -> Command<(), R>
    where
        R: Clone + Send + 'static,
        B: Fn(&ProgressContext) -> Result<R, ExecutionError> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let executor = self.executor.clone();
        let synchronous = executor.is_none();
        let work: NoInput<R> = Box::new(move |completer: Completer<R>| {
            let body = Arc::clone(&body);
            dispatch(executor.as_deref(), move || {
                run_body(completer, move |progress| body(progress));
            });
        });
        self.assemble(Work::NoInput(work), synchronous, bracket)
    }

    fn assemble<I, R>(self, work: Work<I, R>, synchronous: bool, bracket_progress: bool) -> Command<I, R>
    where
        I: Send + 'static,
        R: Clone + Send + 'static,
    {
        tracing::trace!(
            message = "command.build",
            label = %self.config.label,
            synchronous,
            external_source = self.can_execute.is_some()
        );
        Command::from_parts(Parts {
            config: self.config,
            work,
            source: self.can_execute,
            synchronous,
            bracket_progress,
        })
    }
}

impl fmt::Debug for CommandBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuilder")
            .field("config", &self.config)
            .field("can_execute", &self.can_execute.is_some())
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

fn dispatch(executor: Option<&dyn Executor>, job: impl FnOnce() + Send + 'static) {
    match executor {
        Some(executor) => executor.spawn(Box::new(job)),
        None => job(),
    }
}

/// Run a result-returning body and report its outcome. A panic in the body
/// becomes an [`ExecutionError`].
fn run_body<R>(
    completer: Completer<R>,
    body: impl FnOnce(&ProgressContext) -> Result<R, ExecutionError>,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(completer.progress())))
        .unwrap_or_else(|payload| Err(ExecutionError::from_panic(payload)));
    completer.complete_with(outcome);
}

/// Start deferred work. If it panics before reporting, the completer it
/// owned is dropped during unwinding and reports the panic. A panic raised
/// after the outcome was reported (by a subscriber) is resumed.
fn start_deferred(latch: &Latch, start: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(start)) {
        if latch.is_reported() {
            panic::resume_unwind(payload);
        }
        tracing::warn!(message = "command.deferred_start_panicked");
    }
}
