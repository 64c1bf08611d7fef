//! Startup provider lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a provider is in its startup lifecycle.
///
/// ```text
/// Pending → Starting → AwaitingCompletion → Started
///                    ↘                    ↘ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderState {
    /// Not yet eligible, or eligible but not dispatched
    #[default]
    Pending,
    /// `start` is being called
    Starting,
    /// `start` returned; waiting for the completion signal
    AwaitingCompletion,
    /// Completed successfully
    Started,
    /// Failed synchronously or through its completion token
    Failed,
}

impl ProviderState {
    /// Whether `start` has been called on the provider.
    pub fn was_dispatched(self) -> bool {
        !matches!(self, ProviderState::Pending)
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderState::Pending => write!(f, "pending"),
            ProviderState::Starting => write!(f, "starting"),
            ProviderState::AwaitingCompletion => write!(f, "awaiting-completion"),
            ProviderState::Started => write!(f, "started"),
            ProviderState::Failed => write!(f, "failed"),
        }
    }
}
