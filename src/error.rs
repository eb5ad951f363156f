//! Error types for Vimana

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Vimana error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Command precondition failed before dispatch (e.g. not airborne)
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Hardware reported failure, or no confirmation arrived in time
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Telemetry went stale or the adapter reported a disconnect
    #[error("Hardware link lost")]
    LinkLost,

    /// Outbound stream failed to connect or broke
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// A hardware resource (decoder, frame listener) could not be acquired
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Streaming session was released and cannot be restarted
    #[error("Streaming session released")]
    SessionReleased,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Worker thread could not be spawned
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
