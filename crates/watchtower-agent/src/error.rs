use thiserror::Error;

/// Errors from the chat pipeline: provider calls, the tool bridge, and the
/// dispatch loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("response parse error: {0}")]
    Parse(String),

    /// The tool-server child process is gone or speaking garbage.
    #[error("tool bridge error: {0}")]
    Bridge(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
