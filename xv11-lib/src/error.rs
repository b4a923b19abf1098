#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Reading from the underlying transport failed, or it reached end-of-stream. The
    /// connection is presumed broken; nothing is retried.
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Invalid decoder config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
