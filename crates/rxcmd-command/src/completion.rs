#![forbid(unsafe_code)]

//! Execution handles.
//!
//! [`Completion`] is what `execute` hands back: a waitable view of the
//! accepted execution (or an already-finished one for rejected calls).
//! [`Completer`] is what a unit of work receives: the one-shot channel it
//! reports its outcome through.
//!
//! # Invariants
//!
//! 1. A completer reports exactly once. Dropping it unreported reports an
//!    abandoned execution (or a panicked one, while unwinding).
//! 2. A completion is complete only after every state transition of its
//!    execution has been applied. Each transition has also been notified,
//!    except for a write that landed while another thread was draining that
//!    property; that thread delivers it (see `rxcmd_reactive::Property`).

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{BoxError, CommandError, ExecutionError};
use crate::progress::ProgressContext;

pub(crate) type PanicPayload = Box<dyn Any + Send>;

/// Runs a sequence of notifying steps, holding on to the first panic so the
/// remaining steps still execute.
#[derive(Default)]
pub(crate) struct Panics {
    first: Option<PanicPayload>,
}

impl Panics {
    pub(crate) fn run(&mut self, step: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(step)) {
            self.first.get_or_insert(payload);
        }
    }

    pub(crate) fn into_payload(self) -> Option<PanicPayload> {
        self.first
    }

    pub(crate) fn resume(self) {
        if let Some(payload) = self.first {
            panic::resume_unwind(payload);
        }
    }
}

// ============================================================================
// Latch
// ============================================================================

struct LatchState {
    /// The `execute` call that started this execution has not returned yet.
    in_call: bool,
    /// The completer handed over an outcome (as opposed to being dropped).
    reported: bool,
    complete: bool,
    /// A failure reserved for the `execute` caller instead of the error stream.
    returned: Option<ExecutionError>,
}

/// Completion signal for one execution.
pub(crate) struct Latch {
    state: Mutex<LatchState>,
    done: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LatchState {
                in_call: true,
                reported: false,
                complete: false,
                returned: None,
            }),
            done: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `error` for the `execute` caller. Fails (giving the error
    /// back) once that call has returned.
    pub(crate) fn hold_for_caller(&self, error: ExecutionError) -> Result<(), ExecutionError> {
        let mut state = self.lock();
        if state.in_call {
            state.returned = Some(error);
            Ok(())
        } else {
            Err(error)
        }
    }

    /// Mark the `execute` call as returning; yields any reserved failure.
    pub(crate) fn leave_call(&self) -> Option<ExecutionError> {
        let mut state = self.lock();
        state.in_call = false;
        state.returned.take()
    }

    pub(crate) fn mark_reported(&self) {
        self.lock().reported = true;
    }

    pub(crate) fn is_reported(&self) -> bool {
        self.lock().reported
    }

    pub(crate) fn complete(&self) {
        self.lock().complete = true;
        self.done.notify_all();
    }

    fn is_complete(&self) -> bool {
        self.lock().complete
    }

    fn wait(&self) {
        let mut state = self.lock();
        while !state.complete {
            state = self.done.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .done
            .wait_timeout_while(state, timeout, |s| !s.complete)
            .unwrap_or_else(PoisonError::into_inner);
        state.complete
    }
}

// ============================================================================
// Completion
// ============================================================================

enum Kind {
    Ready,
    Pending(Arc<Latch>),
    All(Vec<Completion>),
}

/// Waitable handle to an execution started by `execute`.
///
/// Rejected calls return an already-complete handle. Handles from composite
/// commands complete once every forwarded child execution has.
pub struct Completion {
    kind: Kind,
}

impl Completion {
    pub(crate) fn ready() -> Self {
        Self { kind: Kind::Ready }
    }

    pub(crate) fn pending(latch: Arc<Latch>) -> Self {
        Self {
            kind: Kind::Pending(latch),
        }
    }

    pub(crate) fn all(parts: Vec<Completion>) -> Self {
        Self {
            kind: Kind::All(parts),
        }
    }

    /// Whether this handle stands for a call that was turned away.
    pub(crate) fn is_rejected(&self) -> bool {
        matches!(self.kind, Kind::Ready)
    }

    /// Whether the execution has finished all of its state transitions.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match &self.kind {
            Kind::Ready => true,
            Kind::Pending(latch) => latch.is_complete(),
            Kind::All(parts) => parts.iter().all(Completion::is_complete),
        }
    }

    /// Block until the execution finishes.
    ///
    /// Waiting on the thread that must run the work (an inline executor
    /// caller, or a [`ManualExecutor`](crate::ManualExecutor) owner) never
    /// returns.
    pub fn wait(&self) {
        match &self.kind {
            Kind::Ready => {}
            Kind::Pending(latch) => latch.wait(),
            Kind::All(parts) => parts.iter().for_each(Completion::wait),
        }
    }

    /// Block until the execution finishes or `timeout` elapses. Returns
    /// whether it finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.wait_until(deadline)
    }

    fn wait_until(&self, deadline: Instant) -> bool {
        match &self.kind {
            Kind::Ready => true,
            Kind::Pending(latch) => {
                latch.wait_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            Kind::All(parts) => parts.iter().all(|part| part.wait_until(deadline)),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

// ============================================================================
// Completer
// ============================================================================

/// Receiver of an execution's outcome.
pub(crate) trait Finish<R>: Send + Sync {
    /// Apply the terminal transitions. Subscriber panics are handed back to
    /// the caller rather than unwinding through it.
    fn finish(&self, ticket: &Ticket, outcome: Result<R, ExecutionError>) -> Option<PanicPayload>;
}

/// Identity of one execution.
pub(crate) struct Ticket {
    pub(crate) execution: u64,
    pub(crate) latch: Arc<Latch>,
    pub(crate) progress: ProgressContext,
}

/// One-shot reporter handed to a unit of work.
///
/// Call exactly one of [`complete`](Self::complete),
/// [`succeed`](Self::succeed) or [`fail`](Self::fail). The completer may be
/// moved to any thread first. Dropping it without reporting fails the
/// execution with [`CommandError::Abandoned`].
pub struct Completer<R> {
    target: Option<Arc<dyn Finish<R>>>,
    ticket: Ticket,
}

impl<R> Completer<R> {
    pub(crate) fn new(target: Arc<dyn Finish<R>>, ticket: Ticket) -> Self {
        Self {
            target: Some(target),
            ticket,
        }
    }

    /// Report `outcome`.
    pub fn complete<E: Into<BoxError>>(self, outcome: Result<R, E>) {
        self.complete_with(outcome.map_err(ExecutionError::new));
    }

    /// Report success.
    pub fn succeed(self, value: R) {
        self.complete_with(Ok(value));
    }

    /// Report failure.
    pub fn fail(self, error: impl Into<BoxError>) {
        self.complete_with(Err(ExecutionError::new(error)));
    }

    /// Report an outcome whose error is already an [`ExecutionError`].
    ///
    /// A subscriber that panics while the outcome is applied re-panics here,
    /// after every transition has been applied.
    pub fn complete_with(mut self, outcome: Result<R, ExecutionError>) {
        if let Some(target) = self.target.take() {
            self.ticket.latch.mark_reported();
            if let Some(payload) = target.finish(&self.ticket, outcome) {
                panic::resume_unwind(payload);
            }
        }
    }

    pub(crate) fn latch(&self) -> Arc<Latch> {
        Arc::clone(&self.ticket.latch)
    }

    /// Progress handle for this execution.
    #[must_use]
    pub fn progress(&self) -> &ProgressContext {
        &self.ticket.progress
    }

    /// 1-based sequence number of this execution within its command.
    #[must_use]
    pub fn execution(&self) -> u64 {
        self.ticket.execution
    }
}

impl<R> Drop for Completer<R> {
    fn drop(&mut self) {
        let Some(target) = self.target.take() else {
            return;
        };
        let error = if thread::panicking() {
            CommandError::Panicked {
                message: "unit of work panicked before completing".to_string(),
            }
        } else {
            CommandError::Abandoned
        };
        tracing::warn!(
            message = "command.completer_dropped",
            execution = self.ticket.execution,
            %error
        );
        if target
            .finish(&self.ticket, Err(ExecutionError::new(error)))
            .is_some()
        {
            tracing::error!(message = "command.subscriber_panicked_on_drop");
        }
    }
}

impl<R> fmt::Debug for Completer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("execution", &self.ticket.execution)
            .field("reported", &self.target.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Progress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        outcomes: Mutex<Vec<Result<u32, String>>>,
        calls: AtomicUsize,
    }

    impl Finish<u32> for Recorder {
        fn finish(&self, ticket: &Ticket, outcome: Result<u32, ExecutionError>) -> Option<PanicPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .push(outcome.map_err(|e| e.to_string()));
            ticket.latch.complete();
            None
        }
    }

    fn completer() -> (Arc<Recorder>, Arc<Latch>, Completer<u32>) {
        let recorder = Arc::new(Recorder {
            outcomes: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let latch = Latch::new();
        let ticket = Ticket {
            execution: 1,
            latch: Arc::clone(&latch),
            progress: Progress::new().context(),
        };
        let target: Arc<dyn Finish<u32>> = recorder.clone();
        (recorder, latch, Completer::new(target, ticket))
    }

    #[test]
    fn succeed_reports_once() {
        let (recorder, latch, completer) = completer();
        completer.succeed(7);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec![Ok(7)]);
        assert!(Completion::pending(latch).is_complete());
    }

    #[test]
    fn dropped_completer_reports_abandoned() {
        let (recorder, _latch, completer) = completer();
        drop(completer);
        let outcomes = recorder.outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0],
            Err(CommandError::Abandoned.to_string())
        );
    }

    #[test]
    fn completer_dropped_while_unwinding_reports_panic() {
        let (recorder, _latch, completer) = completer();
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            let _held = completer;
            panic!("boom");
        }));
        assert!(result.is_err());
        let outcomes = recorder.outcomes.lock().unwrap();
        assert!(matches!(&outcomes[0], Err(m) if m.contains("panicked")));
    }

    #[test]
    fn completer_moves_across_threads() {
        let (recorder, latch, completer) = completer();
        let handle = thread::spawn(move || completer.fail("remote failure"));
        assert!(Completion::pending(Arc::clone(&latch)).wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
        assert_eq!(
            *recorder.outcomes.lock().unwrap(),
            vec![Err("remote failure".to_string())]
        );
    }

    #[test]
    fn held_error_goes_to_caller_only_during_call() {
        let latch = Latch::new();
        assert!(latch.hold_for_caller(ExecutionError::msg("first")).is_ok());
        let returned = latch.leave_call();
        assert_eq!(returned.map(|e| e.to_string()), Some("first".to_string()));
        assert!(latch.hold_for_caller(ExecutionError::msg("late")).is_err());
    }

    #[test]
    fn wait_timeout_expires_on_pending_latch() {
        let latch = Latch::new();
        let completion = Completion::pending(latch);
        assert!(!completion.wait_timeout(Duration::from_millis(10)));
        assert!(!completion.is_complete());
    }

    #[test]
    fn all_completes_with_every_part() {
        let a = Latch::new();
        let b = Latch::new();
        let all = Completion::all(vec![
            Completion::pending(Arc::clone(&a)),
            Completion::ready(),
            Completion::pending(Arc::clone(&b)),
        ]);
        a.complete();
        assert!(!all.is_complete());
        b.complete();
        assert!(all.is_complete());
        all.wait();
    }

    #[test]
    fn panics_keeps_first_payload() {
        let mut panics = Panics::default();
        let mut ran = 0;
        panics.run(|| panic!("first"));
        panics.run(|| ran += 1);
        panics.run(|| panic!("second"));
        assert_eq!(ran, 1);
        let payload = panics.into_payload().unwrap();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"first"));
    }
}
