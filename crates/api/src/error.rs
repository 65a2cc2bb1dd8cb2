//! API error types.

/// Errors produced while talking to the remote repository API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid redirect target: {0}")]
    InvalidRedirect(String),

    #[error("redirect loop at {0}")]
    RedirectLoop(String),

    #[error("too many redirects ({0})")]
    TooManyRedirects(usize),

    #[error("prefetch response does not carry a URL: {0:?}")]
    EmptyPrefetch(String),
}
