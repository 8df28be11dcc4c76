use thiserror::Error;

/// Failure of a single upload or pinning-service call
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no credential available for {0}")]
    MissingCredential(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("reading upload content: {0}")]
    Content(#[from] std::io::Error),
}

impl TransportError {
    /// HTTP status code, if the remote answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Request { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
