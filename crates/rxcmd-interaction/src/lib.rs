#![forbid(unsafe_code)]

//! Handler handshakes for rxcmd.
//!
//! Commands sometimes need an answer from whoever drives them (a
//! confirmation, a file choice) without depending on that party. An
//! [`Interaction`] decouples the two sides: the driver registers a handler,
//! the command invokes the interaction and continues once the handler
//! answers through its [`InteractionContext`].

pub mod error;
pub mod interaction;

pub use error::InteractionError;
pub use interaction::{Interaction, InteractionContext};
