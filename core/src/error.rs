use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed index record: {0}")]
    MalformedRecord(String),

    #[error("exclusion list must be sorted ascending without duplicates")]
    InvalidExclusion,

    #[error("labelled set too small: {0}")]
    EmptyLabelled(String),

    #[error("scan cancelled")]
    Cancelled,
}

impl Error {
    /// Exit code the command-line tools report for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Argument(_) | Error::InvalidExclusion | Error::EmptyLabelled(_) => 1,
            Error::Io(_) => 2,
            Error::MalformedRecord(_) => 3,
            Error::Cancelled => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
