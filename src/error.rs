use thiserror::Error;

/// Errors surfaced by the playback core.
///
/// Every variant is terminal for the command that triggered it only: the
/// message is shown to the user and no other guild is affected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MusicError {
    /// Extraction failed or returned nothing playable.
    #[error("Could not load that track: {0}")]
    Resolution(String),

    /// Command issued in a state where it makes no sense (pause while idle...).
    #[error("{0}")]
    Precondition(String),

    /// The voice transport refused an operation or failed mid-stream.
    #[error("Playback error: {0}")]
    Transport(String),

    /// Bad user input, e.g. an out-of-range queue position.
    #[error("{0}")]
    Validation(String),
}

impl MusicError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;
