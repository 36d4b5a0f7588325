#![forbid(unsafe_code)]

//! Where units of work run.
//!
//! An [`Executor`] accepts a job and eventually runs it exactly once, on any
//! thread. Commands built with an executor hand their work to it and return
//! from `execute` immediately; the command's state transitions are then
//! applied on whichever thread the executor runs the job on.
//!
//! Provided executors:
//!
//! - [`InlineExecutor`]: runs the job on the calling thread.
//! - [`ThreadExecutor`]: one named OS thread per job.
//! - [`WorkerExecutor`]: one dedicated worker thread fed by a channel. Jobs
//!   run in submission order.
//! - [`ManualExecutor`]: queues jobs until the owner runs them. Deterministic
//!   tests use it to decide exactly when dispatched work happens.
//!
//! # Failure Modes
//!
//! - **Job dropped without running** (spawn failure, worker shut down): the
//!   command's completer is dropped with it, which publishes an abandoned
//!   execution error. The command never stays stuck executing.
//! - **Job panics on a worker**: caught and logged; the worker keeps serving.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs, synchronously or on another thread.
pub trait Executor: Send + Sync {
    /// Run `job` exactly once, now or later.
    fn spawn(&self, job: Job);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn spawn(&self, job: Job) {
        (**self).spawn(job);
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn spawn(&self, job: Job) {
        (**self).spawn(job);
    }
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, job: Job) {
        job();
    }
}

// ============================================================================
// ThreadExecutor
// ============================================================================

/// Spawns a named OS thread per job.
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    name: Cow<'static, str>,
}

impl ThreadExecutor {
    /// Executor whose threads carry `name`.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("rxcmd-task")
    }
}

impl Executor for ThreadExecutor {
    fn spawn(&self, job: Job) {
        let spawned = thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || run_job(job));
        if let Err(error) = spawned {
            tracing::error!(message = "executor.spawn_failed", name = %self.name, %error);
        }
    }
}

// ============================================================================
// WorkerExecutor
// ============================================================================

/// A single dedicated worker thread.
///
/// Jobs run one at a time in submission order. [`shutdown`](Self::shutdown)
/// lets already queued jobs finish, then joins the thread; dropping the
/// executor does the same.
pub struct WorkerExecutor {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerExecutor {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn start(name: impl Into<String>) -> io::Result<Self> {
        // Unbounded: a job may submit follow-up work to its own worker, which
        // must never block.
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_loop(rx))?;
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Whether the worker still accepts jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop accepting jobs, finish the queued ones, and join the thread.
    ///
    /// Calling this from a job running on the worker itself only stops
    /// intake; the thread exits once its queue drains.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }
}

impl Executor for WorkerExecutor {
    fn spawn(&self, job: Job) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => {
                if tx.send(job).is_err() {
                    tracing::warn!(message = "executor.worker_gone");
                }
            }
            None => tracing::warn!(message = "executor.rejected_after_shutdown"),
        }
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerExecutor")
            .field("running", &self.is_running())
            .finish()
    }
}

fn worker_loop(rx: mpsc::Receiver<Job>) {
    // Exits once every sender is gone and the queue is empty.
    while let Ok(job) = rx.recv() {
        run_job(job);
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!(message = "executor.job_panicked");
    }
}

// ============================================================================
// ManualExecutor
// ============================================================================

/// Queues jobs until the owner runs them.
///
/// Cloning shares the queue, so a test can keep one handle while a command
/// holds another.
#[derive(Clone, Default)]
pub struct ManualExecutor {
    queue: Arc<Mutex<VecDeque<Job>>>,
}

impl ManualExecutor {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Run the oldest queued job on the calling thread.
    ///
    /// Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        let job = self.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run queued jobs until the queue is empty, including jobs queued by the
    /// jobs themselves. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Drop every queued job without running it.
    pub fn discard_all(&self) -> usize {
        let dropped: Vec<Job> = self.lock().drain(..).collect();
        let count = dropped.len();
        drop(dropped);
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Job>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Executor for ManualExecutor {
    fn spawn(&self, job: Job) {
        self.lock().push_back(job);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
