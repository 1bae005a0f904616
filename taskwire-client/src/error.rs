//! Errors a [`crate::TaskQueueClient`] call can return.

use thiserror::Error;

/// Mirrors `asynx_client.taskqueue.TaskQueueResponseError`: the facade's
/// structured error envelope, surfaced as a typed error rather than a raw
/// JSON blob.
#[derive(Debug, Error)]
#[error("{desc} ({code}): {detail}")]
pub struct ApiError {
    pub code: u32,
    pub desc: String,
    pub detail: String,
    pub request_uri: String,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Mirrors `TaskQueueServerError`: a non-JSON (or otherwise unparseable)
    /// response body where the facade's error envelope was expected.
    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),
}
