#![forbid(unsafe_code)]

//! rxcmd public facade crate.
//!
//! Observable commands built on replay-latest properties. See
//! [`rxcmd_command`] for the execution model and [`rxcmd_reactive`] for the
//! property primitives.

pub use rxcmd_command as command;
#[cfg(feature = "interaction")]
pub use rxcmd_interaction as interaction;
pub use rxcmd_reactive as reactive;

pub mod prelude {
    pub use rxcmd_command::{
        BoxError, Command, CommandBuilder, CommandConfig, CommandError, Completer, Completion,
        CompositeCommand, ExecutionError, Executor, InlineExecutor, InputShape, ManualExecutor,
        Progress, ProgressContext, ThreadExecutor, UnobservedErrors, WorkerExecutor,
    };
    #[cfg(feature = "interaction")]
    pub use rxcmd_interaction::{Interaction, InteractionContext, InteractionError};
    pub use rxcmd_reactive::{
        Observable, Property, ReadOnlyProperty, Subscription, combine_all, combine2, constant,
    };
}
