#![forbid(unsafe_code)]

//! Per-command configuration.

use std::borrow::Cow;

/// What happens to a failure when nobody observes the `error` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnobservedErrors {
    /// Synchronous commands hand the failure back from `execute`; dispatched
    /// and deferred commands publish it on the `error` stream.
    #[default]
    Auto,
    /// Hand the failure back from `execute` whenever the work completed
    /// before `execute` returned. Failures completing later are published.
    Return,
    /// Always publish on the `error` stream.
    Publish,
}

/// Configuration shared by every command variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    /// Name attached to every tracing event and span of the command.
    pub label: Cow<'static, str>,
    /// Unobserved failure policy.
    pub unobserved_errors: UnobservedErrors,
}

impl CommandConfig {
    /// Default configuration with the given label.
    #[must_use]
    pub fn new(label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            label: label.into(),
            unobserved_errors: UnobservedErrors::Auto,
        }
    }

    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the unobserved failure policy.
    #[must_use]
    pub fn with_unobserved_errors(mut self, policy: UnobservedErrors) -> Self {
        self.unobserved_errors = policy;
        self
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::new("command")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CommandConfig::default();
        assert_eq!(config.label, "command");
        assert_eq!(config.unobserved_errors, UnobservedErrors::Auto);
    }

    #[test]
    fn builder_methods() {
        let config = CommandConfig::default()
            .with_label(String::from("save"))
            .with_unobserved_errors(UnobservedErrors::Publish);
        assert_eq!(config.label, "save");
        assert_eq!(config.unobserved_errors, UnobservedErrors::Publish);
    }
}
