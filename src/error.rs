use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The storage backend has no block under the requested key.
    #[error("block not found")]
    BlockNotFound,

    /// A metadata item does not exist under the requested name.
    #[error("metadata item not found")]
    NotFound,

    /// Stored bytes fail integrity: content-hash mismatch, AEAD tag
    /// failure, or an indirect index that does not parse or line up.
    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Incompatible repository options.
    #[error("unsupported configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// The object reader speaks std::io; everything else speaks Error.
impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        use std::io::ErrorKind;

        match err {
            Error::BlockNotFound | Error::NotFound => {
                std::io::Error::new(ErrorKind::NotFound, err.to_string())
            }
            Error::Malformed(_) => std::io::Error::new(ErrorKind::InvalidData, err.to_string()),
            Error::InvalidArgument(_) | Error::Config(_) => {
                std::io::Error::new(ErrorKind::InvalidInput, err.to_string())
            }
            Error::Io(inner) => inner,
            Error::Json(_) => std::io::Error::new(ErrorKind::InvalidData, err.to_string()),
        }
    }
}
