use thiserror::Error;

pub mod digest;
pub mod models;
pub mod settings;
pub mod stats;
pub mod surt;

pub use models::*;
pub use settings::*;
pub use stats::*;
pub use surt::surt;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid CDXJ line: '{0}'")]
    InvalidCdxjLine(String),
    #[error("corrupt ZIP container: {0}")]
    ZipCorruption(String),
    #[error("member not found: {0}")]
    MissingMember(String),
    #[error("unsupported WARC version: {0}")]
    UnsupportedWarcVersion(String),
    #[error("malformed WARC record: {0}")]
    MalformedWarcRecord(String),
    #[error("unexpected record type: {0}")]
    UnsupportedRecordType(String),
    #[error("unexpected record content-type: {0}")]
    UnsupportedContentType(String),
    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("URI scheme not supported: {0}")]
    UnsupportedUri(String),
    #[error("unknown lookup strategy: {0}")]
    UnknownStrategy(String),
    #[error("web archive source or target not configured")]
    NotConfigured,
}

impl Error {
    /// Wraps a transport-layer failure (HTTP, S3) without forcing every
    /// downstream crate onto the client crates' error types.
    pub fn transport<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Transport(Box::new(source))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
