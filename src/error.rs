//! Error taxonomy for Buddy.
//!
//! Startup-phase errors ([`BuddyError::Ingestion`], [`BuddyError::CorruptIndex`],
//! [`BuddyError::Storage`]) abort before the conversation starts. Turn-phase
//! errors ([`BuddyError::Provider`], [`BuddyError::ProviderTimeout`],
//! [`BuddyError::ToolInvocation`]) are caught by the session loop, printed as a
//! single line, and the conversation continues.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for operations that fail with a [`BuddyError`].
pub type Result<T, E = BuddyError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BuddyError {
    /// The document source is missing, unreadable, or contains no text.
    #[error("ingestion failed: {0}")]
    Ingestion(String),

    /// The persisted index exists but cannot be used.
    #[error("corrupt index at {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    /// A provider call exceeded its deadline.
    #[error("{provider} did not answer within {secs}s")]
    ProviderTimeout { provider: String, secs: u64 },

    /// A provider call failed (HTTP, protocol, or payload error).
    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },

    /// A tool failed for a reason other than a provider error.
    #[error("tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    /// SQLite failure while writing the index.
    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BuddyError {
    pub fn provider(provider: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error belongs to a single turn and must not end the session.
    pub fn is_turn_level(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::ProviderTimeout { .. } | Self::ToolInvocation { .. }
        )
    }
}

/// Collapse every whitespace run, newlines included, into one space.
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
