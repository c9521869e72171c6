use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Session(#[from] gmt_clib::Error),

    #[error("figure `{0}` has been finalized")]
    SequencerFinalized(String),

    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    #[error("operation `{operation}` has no parameter `{keyword}`")]
    UnknownParameter { operation: String, keyword: String },

    #[error("operation `{operation}` needs -{flag} and no earlier call set it")]
    MissingParameter { operation: String, flag: char },

    #[error("cannot produce {format} output: {reason}")]
    ConversionUnavailable { format: String, reason: String },

    #[error("{format} conversion failed (status {status:?}): {stderr}")]
    ConversionFailed {
        format: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("invalid operation table: {0}")]
    Table(String),

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
