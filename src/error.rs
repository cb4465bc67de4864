use thiserror::Error;

/// Failures reported by a media-session provider.
///
/// These never leave the session watcher: it degrades every one of them to
/// a log entry plus, at worst, an empty snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("media session provider unavailable: {0}")]
    Unavailable(String),

    #[error("media session is no longer valid: {0}")]
    SessionStale(String),

    #[error("media properties are incomplete")]
    MetadataIncomplete,

    #[error("transport command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("provider I/O error: {0}")]
    Io(String),
}

impl ProviderError {
    pub fn command_failed(command: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ProviderError::CommandFailed {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Io(err.to_string())
    }
}
