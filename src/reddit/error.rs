use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while fetching, resolving or downloading posts
#[derive(Error, Debug)]
pub enum Error {
    /// The listing provider could not be built
    #[error("no listing available: {0}")]
    Authentication(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A page resolved to a structure no parser knows how to handle
    #[error("unsupported {shape} at {url}")]
    UnsupportedShape { url: String, shape: String },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("malformed template: {0}")]
    Template(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl Error {
    pub fn transport(url: &str, err: impl std::fmt::Display) -> Self {
        Error::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
