#![forbid(unsafe_code)]

//! The command state machine.
//!
//! Every command variant shares one [`Core`]: an `Idle -> Executing -> Idle`
//! machine guarded by an atomic flag, plus the observable properties that
//! expose it. Variants differ only in the unit of work the builder installs:
//! a closure that receives the input (if any) and a [`Completer`] and
//! eventually reports one outcome through it.
//!
//! # Invariants
//!
//! 1. At most one execution is in flight. The guard is taken with a
//!    compare-and-swap, so of two racing `execute` calls exactly one wins.
//! 2. A rejected call has no observable effect.
//! 3. Terminal transitions run in a fixed order: progress to `1.0` (plain
//!    variants), `result` xor `error`, `execution_count + 1`,
//!    `is_executing = false`, progress reset, guard release, `can_execute`
//!    recompute.
//! 4. `can_execute` is `source && !executing`. A source `true` arriving
//!    mid-flight only takes effect at the recompute of invariant 3.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: every remaining transition still runs; the first
//!   panic resumes on the thread that drove the transition afterwards.
//! - **Completer dropped**: the execution fails with
//!   [`CommandError::Abandoned`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rxcmd_reactive::{Observable, Property, ReadOnlyProperty, Subscription};

use crate::builder::CommandBuilder;
use crate::completion::{Completer, Completion, Finish, Latch, PanicPayload, Panics, Ticket};
use crate::config::{CommandConfig, UnobservedErrors};
use crate::error::{BoxError, CommandError, ExecutionError};
use crate::progress::Progress;

pub(crate) type WithInput<I, R> = Box<dyn Fn(I, Completer<R>) + Send + Sync>;
pub(crate) type NoInput<R> = Box<dyn Fn(Completer<R>) + Send + Sync>;

/// A normalized unit of work: start the execution and report through the
/// completer, now or later.
pub(crate) enum Work<I, R> {
    WithInput(WithInput<I, R>),
    NoInput(NoInput<R>),
}

/// Whether a command's unit of work consumes an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputShape {
    /// Call [`Command::execute`] with a value.
    Input,
    /// Call [`Command::execute_empty`].
    NoInput,
}

/// Everything the builder decided.
pub(crate) struct Parts<I, R> {
    pub(crate) config: CommandConfig,
    pub(crate) work: Work<I, R>,
    pub(crate) source: Option<Box<dyn Observable<bool>>>,
    /// The outcome is always known before `execute` returns.
    pub(crate) synchronous: bool,
    /// Force progress to `1.0` before the outcome is published.
    pub(crate) bracket_progress: bool,
}

struct Core<I, R> {
    config: CommandConfig,
    work: Work<I, R>,
    synchronous: bool,
    bracket_progress: bool,

    running: AtomicBool,
    source_allows: AtomicBool,
    executions: AtomicU64,

    can_execute: Property<bool>,
    is_executing: Property<bool>,
    execution_count: Property<u64>,
    has_been_executed: ReadOnlyProperty<bool>,
    result: Property<R>,
    error: Property<ExecutionError>,
    progress: Progress,

    source: Mutex<Option<(Box<dyn Observable<bool>>, Subscription)>>,
}

impl<I, R> Core<I, R>
where
    I: Send + 'static,
    R: Clone + Send + 'static,
{
    fn start(self: &Arc<Self>, input: Option<I>) -> Result<Completion, CommandError> {
        let invoke: Box<dyn FnOnce(Completer<R>) + '_> = match (&self.work, input) {
            (Work::WithInput(work), Some(input)) => Box::new(move |c: Completer<R>| work(input, c)),
            (Work::NoInput(work), None) => Box::new(move |c: Completer<R>| work(c)),
            (Work::WithInput(_), None) => return Err(CommandError::InputRequired),
            (Work::NoInput(_), Some(_)) => return Err(CommandError::UnexpectedInput),
        };

        if !self.source_allows.load(Ordering::Acquire)
            || self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            tracing::trace!(
                message = "command.rejected",
                label = %self.config.label,
                executing = self.running.load(Ordering::Acquire)
            );
            return Ok(Completion::ready());
        }

        let execution = self.executions.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(message = "command.execute", label = %self.config.label, execution);

        let mut panics = Panics::default();
        panics.run(|| self.is_executing.set(true));
        panics.run(|| self.refresh_can_execute());

        let latch = Latch::new();
        let ticket = Ticket {
            execution,
            latch: Arc::clone(&latch),
            progress: self.progress.context(),
        };
        let target: Arc<dyn Finish<R>> = Arc::clone(self) as Arc<dyn Finish<R>>;
        let completer = Completer::new(target, ticket);
        panics.run(|| invoke(completer));

        let returned = latch.leave_call();
        panics.resume();
        match returned {
            Some(error) => Err(CommandError::Execution(error)),
            None => Ok(Completion::pending(latch)),
        }
    }

    fn on_source(&self, allowed: bool) {
        let previous = self.source_allows.swap(allowed, Ordering::AcqRel);
        if previous != allowed {
            tracing::trace!(message = "command.source_changed", label = %self.config.label, allowed);
        }
        self.refresh_can_execute();
    }

    fn refresh_can_execute(&self) {
        self.can_execute.update_if(|current| {
            let next =
                self.source_allows.load(Ordering::Acquire) && !self.running.load(Ordering::Acquire);
            (next != *current).then_some(next)
        });
    }

    fn publish_error(&self, ticket: &Ticket, error: ExecutionError, panics: &mut Panics) {
        let hand_back = !self.error.has_observers()
            && match self.config.unobserved_errors {
                UnobservedErrors::Auto => self.synchronous,
                UnobservedErrors::Return => true,
                UnobservedErrors::Publish => false,
            };
        let error = if hand_back {
            match ticket.latch.hold_for_caller(error) {
                Ok(()) => {
                    tracing::warn!(message = "command.failure_returned", label = %self.config.label);
                    return;
                }
                Err(error) => error,
            }
        } else {
            error
        };
        tracing::debug!(message = "command.failed", label = %self.config.label, %error);
        panics.run(|| self.error.set(error));
    }
}

impl<I, R> Finish<R> for Core<I, R>
where
    I: Send + 'static,
    R: Clone + Send + 'static,
{
    fn finish(&self, ticket: &Ticket, outcome: Result<R, ExecutionError>) -> Option<PanicPayload> {
        let span = tracing::debug_span!(
            "command.execution",
            label = %self.config.label,
            execution = ticket.execution
        );
        let _entered = span.enter();
        ticket.progress.close();

        let mut panics = Panics::default();
        if self.bracket_progress {
            panics.run(|| {
                self.progress.set(1.0);
            });
        }
        match outcome {
            Ok(value) => {
                tracing::debug!(message = "command.succeeded", label = %self.config.label);
                panics.run(|| self.result.set(value));
            }
            Err(error) => self.publish_error(ticket, error, &mut panics),
        }
        panics.run(|| {
            self.execution_count.update(|count| count + 1);
        });
        panics.run(|| self.is_executing.set(false));
        panics.run(|| self.progress.reset());
        self.running.store(false, Ordering::Release);
        panics.run(|| self.refresh_can_execute());

        ticket.latch.complete();
        panics.into_payload()
    }
}

/// An encapsulated, re-invocable unit of work with observable state.
///
/// Cloning creates another handle to the same command. Build one with
/// [`CommandBuilder`], or the [`from_fn`](Command::from_fn) and
/// [`from_supplier`](Command::from_supplier) shortcuts.
///
/// # Example
///
/// ```
/// use rxcmd_command::Command;
///
/// let add_two = Command::from_fn(|x: i32| Ok::<_, std::convert::Infallible>(x + 2));
/// add_two.execute(5).unwrap();
/// assert_eq!(add_two.result(), Some(7));
/// assert_eq!(add_two.execution_count(), 1);
/// ```
pub struct Command<I, R> {
    core: Arc<Core<I, R>>,
}

impl<I, R> Clone for Command<I, R> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<I, R> Command<I, R>
where
    I: Send + 'static,
    R: Clone + Send + 'static,
{
    pub(crate) fn from_parts(parts: Parts<I, R>) -> Self {
        let Parts {
            config,
            work,
            source,
            synchronous,
            bracket_progress,
        } = parts;
        let allowed = source.is_none();
        let execution_count = Property::new(0u64);
        let has_been_executed = execution_count.map(|count| *count > 0).distinct();

        let core = Arc::new(Core {
            config,
            work,
            synchronous,
            bracket_progress,
            running: AtomicBool::new(false),
            source_allows: AtomicBool::new(allowed),
            executions: AtomicU64::new(0),
            can_execute: Property::new(allowed),
            is_executing: Property::new(false),
            execution_count,
            has_been_executed,
            result: Property::empty(),
            error: Property::empty(),
            progress: Progress::new(),
            source: Mutex::new(None),
        });

        if let Some(source) = source {
            let weak = Arc::downgrade(&core);
            let subscription = source.observe(Box::new(move |allowed: &bool| {
                if let Some(core) = weak.upgrade() {
                    core.on_source(*allowed);
                }
            }));
            *core.source.lock().unwrap_or_else(PoisonError::into_inner) =
                Some((source, subscription));
        }

        Self { core }
    }

    /// Command running `f` inline on each input.
    pub fn from_fn<E, F>(f: F) -> Self
    where
        E: Into<BoxError>,
        F: Fn(I) -> Result<R, E> + Send + Sync + 'static,
    {
        CommandBuilder::new().build_fn(f)
    }

    /// Start an execution with `input`.
    ///
    /// Returns an already-complete [`Completion`] if the command cannot
    /// execute right now; nothing else happens in that case.
    ///
    /// # Errors
    ///
    /// - [`CommandError::UnexpectedInput`] if the command takes no input.
    /// - [`CommandError::Execution`] if the work failed before this call
    ///   returned and nobody observes [`error_property`](Self::error_property)
    ///   (see [`UnobservedErrors`]).
    pub fn execute(&self, input: I) -> Result<Completion, CommandError> {
        self.core.start(Some(input))
    }

    /// Start an execution of a command built without an input.
    ///
    /// # Errors
    ///
    /// - [`CommandError::InputRequired`] if the command needs an input.
    /// - [`CommandError::Execution`] as for [`execute`](Self::execute).
    pub fn execute_empty(&self) -> Result<Completion, CommandError> {
        self.core.start(None)
    }
}

impl<R> Command<(), R>
where
    R: Clone + Send + 'static,
{
    /// Command running `f` inline, without input.
    pub fn from_supplier<E, F>(f: F) -> Self
    where
        E: Into<BoxError>,
        F: Fn() -> Result<R, E> + Send + Sync + 'static,
    {
        CommandBuilder::new().build_supplier(f)
    }
}

impl<I, R> Command<I, R>
where
    R: Clone + Send + 'static,
{
    /// Whether `execute` would currently start work.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.core.can_execute.get().unwrap_or(false)
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.core.is_executing.get().unwrap_or(false)
    }

    /// Completed executions, successful or not.
    #[must_use]
    pub fn execution_count(&self) -> u64 {
        self.core.execution_count.get().unwrap_or(0)
    }

    #[must_use]
    pub fn has_been_executed(&self) -> bool {
        self.core.has_been_executed.get().unwrap_or(false)
    }

    /// Most recent successful result.
    #[must_use]
    pub fn result(&self) -> Option<R> {
        self.core.result.get()
    }

    /// Most recent published failure.
    #[must_use]
    pub fn error(&self) -> Option<ExecutionError> {
        self.core.error.get()
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        self.core.progress.get()
    }

    #[must_use]
    pub fn can_execute_property(&self) -> ReadOnlyProperty<bool> {
        self.core.can_execute.read_only()
    }

    #[must_use]
    pub fn is_executing_property(&self) -> ReadOnlyProperty<bool> {
        self.core.is_executing.read_only()
    }

    #[must_use]
    pub fn execution_count_property(&self) -> ReadOnlyProperty<u64> {
        self.core.execution_count.read_only()
    }

    #[must_use]
    pub fn has_been_executed_property(&self) -> ReadOnlyProperty<bool> {
        self.core.has_been_executed.clone()
    }

    /// Stream of successful results. Replays the latest one to new
    /// subscribers.
    #[must_use]
    pub fn result_property(&self) -> ReadOnlyProperty<R> {
        self.core.result.read_only()
    }

    /// Stream of failures. Subscribing (even with `subscribe_changes`)
    /// counts as observing errors for [`UnobservedErrors::Auto`].
    #[must_use]
    pub fn error_property(&self) -> ReadOnlyProperty<ExecutionError> {
        self.core.error.read_only()
    }

    #[must_use]
    pub fn progress_property(&self) -> ReadOnlyProperty<f64> {
        self.core.progress.property()
    }

    #[must_use]
    pub fn input_shape(&self) -> InputShape {
        match self.core.work {
            Work::WithInput(_) => InputShape::Input,
            Work::NoInput(_) => InputShape::NoInput,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.core.config.label
    }
}

impl<I, R> fmt::Debug for Command<I, R>
where
    R: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("label", &self.label())
            .field("input_shape", &self.input_shape())
            .field("can_execute", &self.can_execute())
            .field("is_executing", &self.is_executing())
            .field("execution_count", &self.execution_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ManualExecutor;
    use std::sync::Mutex;

    fn record<T: Clone + Send + 'static>(
        property: &ReadOnlyProperty<T>,
    ) -> (Arc<Mutex<Vec<T>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let sub = property.subscribe(move |v: &T| log.lock().unwrap().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn sync_execution_publishes_result() {
        let cmd = Command::from_fn(|x: i32| Ok::<_, BoxError>(x + 2));
        let (executing, _sub) = record(&cmd.is_executing_property());

        let completion = cmd.execute(5).unwrap();
        assert!(completion.is_complete());
        assert_eq!(cmd.result(), Some(7));
        assert_eq!(cmd.execution_count(), 1);
        assert!(cmd.has_been_executed());
        assert!(cmd.can_execute());
        assert_eq!(*executing.lock().unwrap(), vec![false, true, false]);
    }

    #[test]
    fn input_shape_is_validated() {
        let with_input = Command::from_fn(|x: i32| Ok::<_, BoxError>(x));
        assert!(matches!(with_input.execute_empty(), Err(CommandError::InputRequired)));
        assert_eq!(with_input.input_shape(), InputShape::Input);

        let without = Command::from_supplier(|| Ok::<_, BoxError>(1));
        assert!(matches!(without.execute(()), Err(CommandError::UnexpectedInput)));
        assert_eq!(without.input_shape(), InputShape::NoInput);
        assert_eq!(without.execution_count(), 0);
    }

    #[test]
    fn unobserved_sync_failure_is_returned() {
        let cmd = Command::from_fn(|_: i32| Err::<i32, _>("bad input"));
        let err = cmd.execute(1).unwrap_err();
        assert_eq!(err.execution().map(ToString::to_string), Some("bad input".to_string()));
        assert!(cmd.error().is_none());
        assert_eq!(cmd.execution_count(), 1);
        assert!(!cmd.is_executing());
    }

    #[test]
    fn observed_sync_failure_is_published() {
        let cmd = Command::from_fn(|_: i32| Err::<i32, _>("bad input"));
        let (errors, _sub) = record(&cmd.error_property());
        assert!(cmd.execute(1).is_ok());
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "bad input");
        assert!(cmd.result().is_none());
    }

    #[test]
    fn pending_execution_rejects_reentry() {
        let exec = ManualExecutor::new();
        let cmd = CommandBuilder::new()
            .executor(exec.clone())
            .build_fn(|x: i32| Ok::<_, BoxError>(x + 2));

        let first = cmd.execute(5).unwrap();
        assert!(!first.is_complete());
        assert!(cmd.is_executing());
        assert!(!cmd.can_execute());

        let second = cmd.execute(10).unwrap();
        assert!(second.is_complete());
        assert_eq!(exec.pending(), 1);

        exec.run_all();
        assert!(first.is_complete());
        assert_eq!(cmd.result(), Some(7));
        assert_eq!(cmd.execution_count(), 1);
        assert!(cmd.can_execute());
    }

    #[test]
    fn terminal_transitions_follow_fixed_order() {
        let cmd = Command::from_fn(|x: i32| Ok::<_, BoxError>(x));
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut subs = Vec::new();
        {
            let l = Arc::clone(&log);
            subs.push(cmd.progress_property().subscribe_changes(move |p| {
                l.lock().unwrap().push(format!("progress={p}"));
            }));
            let l = Arc::clone(&log);
            subs.push(cmd.result_property().subscribe_changes(move |r| {
                l.lock().unwrap().push(format!("result={r}"));
            }));
            let l = Arc::clone(&log);
            subs.push(cmd.execution_count_property().subscribe_changes(move |c| {
                l.lock().unwrap().push(format!("count={c}"));
            }));
            let l = Arc::clone(&log);
            subs.push(cmd.is_executing_property().subscribe_changes(move |e| {
                l.lock().unwrap().push(format!("executing={e}"));
            }));
            let l = Arc::clone(&log);
            subs.push(cmd.can_execute_property().subscribe_changes(move |c| {
                l.lock().unwrap().push(format!("can_execute={c}"));
            }));
        }

        cmd.execute(3).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "executing=true",
                "can_execute=false",
                "progress=1",
                "result=3",
                "count=1",
                "executing=false",
                "progress=0",
                "can_execute=true",
            ]
        );
    }

    #[test]
    fn execute_from_terminal_subscriber_is_rejected() {
        let cmd = Command::from_fn(|x: i32| Ok::<_, BoxError>(x));
        let inner = cmd.clone();
        let nested = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&nested);
        let _sub = cmd.result_property().subscribe_changes(move |_| {
            let completion = inner.execute(99).unwrap();
            *slot.lock().unwrap() = Some(completion.is_complete());
        });
        cmd.execute(1).unwrap();
        assert_eq!(*nested.lock().unwrap(), Some(true));
        assert_eq!(cmd.execution_count(), 1);
        assert_eq!(cmd.result(), Some(1));
    }

    #[test]
    fn source_false_mid_flight_holds_until_completion() {
        let source = Property::new(true);
        let exec = ManualExecutor::new();
        let cmd = CommandBuilder::new()
            .can_execute(source.clone())
            .executor(exec.clone())
            .build_supplier(|| Ok::<_, BoxError>(()));
        let (seen, _sub) = record(&cmd.can_execute_property());

        cmd.execute_empty().unwrap();
        source.set(false);
        source.set(true);
        assert!(!cmd.can_execute());
        exec.run_all();
        assert!(cmd.can_execute());
        assert_eq!(*seen.lock().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn disallowed_source_rejects_without_side_effects() {
        let source = Property::new(false);
        let cmd = CommandBuilder::new()
            .can_execute(source.clone())
            .build_fn(|x: i32| Ok::<_, BoxError>(x));
        assert!(!cmd.can_execute());
        assert!(cmd.execute(1).unwrap().is_complete());
        assert_eq!(cmd.execution_count(), 0);
        assert!(cmd.result().is_none());

        source.set(true);
        assert!(cmd.can_execute());
        cmd.execute(1).unwrap();
        assert_eq!(cmd.result(), Some(1));
    }

    #[test]
    fn empty_source_keeps_command_disabled() {
        let source = Property::<bool>::empty();
        let cmd = CommandBuilder::new()
            .can_execute(source.clone())
            .build_fn(|x: i32| Ok::<_, BoxError>(x));
        assert!(!cmd.can_execute());
        source.set(true);
        assert!(cmd.can_execute());
    }

    #[test]
    fn panicking_work_becomes_error() {
        let cmd = Command::from_fn(|_: i32| -> Result<i32, BoxError> { panic!("exploded") });
        let (errors, _sub) = record(&cmd.error_property());
        cmd.execute(1).unwrap();
        let errors = errors.lock().unwrap();
        assert!(matches!(
            errors[0].downcast_ref::<CommandError>(),
            Some(CommandError::Panicked { message }) if message == "exploded"
        ));
        assert!(!cmd.is_executing());
        assert!(cmd.can_execute());
    }

    #[test]
    fn subscriber_panic_resumes_after_transitions() {
        let cmd = Command::from_fn(|x: i32| Ok::<_, BoxError>(x));
        let _sub = cmd.result_property().subscribe_changes(|_| panic!("subscriber"));
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cmd.execute(1)));
        assert!(outcome.is_err());
        assert_eq!(cmd.execution_count(), 1);
        assert!(!cmd.is_executing());
        assert!(cmd.can_execute());
    }

    #[test]
    fn debug_shows_state() {
        let cmd = CommandBuilder::new()
            .label("save")
            .build_fn(|x: i32| Ok::<_, BoxError>(x));
        let text = format!("{cmd:?}");
        assert!(text.contains("save"));
        assert!(text.contains("execution_count: 0"));
    }
}
