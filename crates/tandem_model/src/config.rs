//! Configuration for object models.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What happens to the remaining listeners when one of them fails.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ListenerErrorMode {
    /// Stop delivering the event at the first failure.
    #[default]
    StopOnError,
    /// Deliver the event to every listener and report the first failure.
    ContinueOnError,
}

/// Configuration for a [`Model`](crate::Model).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelConfig {
    /// Failure policy for listener delivery.
    pub listener_errors: ListenerErrorMode,

    /// Upper bound on objects per scalar batch load. When unset, the
    /// loader's own limit applies; when both are unset, a batch is loaded in
    /// one call.
    pub batch_size: Option<usize>,
}

impl ModelConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that delivers every event to every listener.
    #[must_use]
    pub fn tolerant() -> Self {
        Self {
            listener_errors: ListenerErrorMode::ContinueOnError,
            ..Self::default()
        }
    }

    /// Builder method to set the listener failure policy.
    #[must_use]
    pub fn with_listener_errors(mut self, mode: ListenerErrorMode) -> Self {
        self.listener_errors = mode;
        self
    }

    /// Builder method to cap the scalar batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size.max(1));
        self
    }
}
