use thiserror::Error;

/// Result type used throughout the acquisition core
pub type WaveResult<T> = Result<T, WaveError>;

/// Errors raised by sources, the streaming client and configuration
#[derive(Debug, Error)]
pub enum WaveError {
    /// Socket, connection or HTTP failure. Never fatal: the streaming
    /// client reconnects and the gulper reports a failed chunk.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unsupported packet. The packet is dropped.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Missing or invalid source parameters, raised at construction
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The server rejected a command
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl WaveError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether retrying the same operation later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

impl From<reqwest::Error> for WaveError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
