use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("Response missing field `{0}`")]
    MissingField(&'static str),

    #[error("Store not configured: {0}")]
    NotConfigured(String),

    #[error("Conditional write rejected, {0} changed since it was read")]
    Conflict(String),
}

impl From<ureq::Error> for StoreError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(status, response) => StoreError::Http {
                status,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(t) => StoreError::Transport(t.to_string()),
        }
    }
}
