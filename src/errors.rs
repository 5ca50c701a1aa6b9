use thiserror::Error;

/// Errors that can occur anywhere in the pipeline.
///
/// This is a batch pipeline with mandatory barriers between stages: there is
/// no recoverable error class. Any variant surfacing out of a stage aborts
/// the whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// IO error (file operations, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encode/decode error
    #[error("codec error: {0}")]
    Codec(String),

    /// Wire protocol violation (unexpected frame, size mismatch)
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Transport failure (closed channel, handshake rejection)
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error (invalid config, missing fields)
    #[error("configuration error: {0}")]
    Config(String),

    /// Image decode/encode or geometry error
    #[error("image error: {0}")]
    Image(String),

    /// Convolution backend failure (accelerator unavailable, launch failure)
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<toml::ser::Error> for PipelineError {
    fn from(e: toml::ser::Error) -> Self {
        PipelineError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(e: toml::de::Error) -> Self {
        PipelineError::Config(e.to_string())
    }
}
