use containers::Height;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to build http client: {source}")]
    Client { source: reqwest::Error },

    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("request to {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decompress bundle {id}: {source}")]
    Decompress { id: u64, source: std::io::Error },

    #[error("failed to decode bundle {id}: {source}")]
    BundleDecode {
        id: u64,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Container(#[from] containers::Error),

    #[error("gap in block stream: expected height {expected}, got {got}")]
    Gap { expected: Height, got: Height },

    #[error("{op} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: String,
        attempts: u32,
        source: Box<CollectorError>,
    },
}
