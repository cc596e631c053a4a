use thiserror::Error;

/// Faults outside the probe itself. Their text is logged, never sent back to
/// the caller.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("failed to read request body: {0}")]
    BodyRead(String),
}
