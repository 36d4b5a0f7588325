#![forbid(unsafe_code)]

//! Observable commands.
//!
//! A [`Command`] wraps a unit of work behind an `Idle -> Executing -> Idle`
//! state machine and exposes that machine as observable properties:
//! `can_execute`, `is_executing`, `execution_count`, `has_been_executed`,
//! `result`, `error` and `progress`.
//!
//! # Variants
//!
//! One state machine serves every variant. The [`CommandBuilder`] decides
//! how the work runs:
//!
//! - **Inline** (no executor): the work runs inside `execute`, which returns
//!   after every transition has been applied.
//! - **Dispatched** ([`Executor`]): `execute` enters `Executing` and hands
//!   the work to the executor; completion is applied on the executor's
//!   thread.
//! - **Progress-aware**: the work also receives a [`ProgressContext`].
//! - **Deferred**: the work receives a [`Completer`] and reports whenever it
//!   likes, from any thread.
//!
//! [`CompositeCommand`] fans one execution out to several commands and
//! joins their results.
//!
//! # Failures
//!
//! A failed execution is published on `error`. If the command runs inline
//! and nobody observes `error`, the failure is returned from `execute` as
//! [`CommandError::Execution`] instead (see [`UnobservedErrors`]). A failure
//! is never both published and returned, and never dropped.
//!
//! # Logging
//!
//! Events are emitted through `tracing` with `command.*` and `composite.*`
//! message names. Terminal transitions run inside a `command.execution`
//! span carrying the command label and execution number.

pub mod builder;
pub mod command;
pub mod completion;
pub mod composite;
pub mod config;
pub mod error;
pub mod executor;
pub mod progress;

pub use builder::CommandBuilder;
pub use command::{Command, InputShape};
pub use completion::{Completer, Completion};
pub use composite::CompositeCommand;
pub use config::{CommandConfig, UnobservedErrors};
pub use error::{BoxError, CommandError, ExecutionError};
pub use executor::{
    Executor, InlineExecutor, Job, ManualExecutor, ThreadExecutor, WorkerExecutor,
};
pub use progress::{Progress, ProgressContext};
