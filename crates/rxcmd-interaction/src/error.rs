#![forbid(unsafe_code)]

use thiserror::Error;

/// Misuse of an [`Interaction`](crate::Interaction) handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InteractionError {
    /// `invoke` was called while no handler was registered.
    #[error("interaction `{label}` has no registered handler")]
    NoHandler { label: &'static str },

    /// A context was handled a second time.
    #[error("interaction was already handled")]
    AlreadyHandled,
}
