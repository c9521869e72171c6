use thiserror::Error;

use crate::bridge::ElementType;
use crate::library::Family;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create {library} session: {reason}")]
    Initialization { library: String, reason: String },

    #[error("operation `{operation}` failed with status {status}: {message}")]
    Operation {
        operation: String,
        status: i32,
        message: String,
    },

    #[error("{family} data cannot be used as {what}")]
    FamilyMismatch { family: Family, what: String },

    #[error("arrays of rank {rank} are not supported (maximum rank is {max})")]
    UnsupportedShape { rank: usize, max: usize },

    #[error("invalid array shape: {0}")]
    Shape(String),

    #[error("native buffer holds {native} values, {requested} requested")]
    ElementType {
        native: ElementType,
        requested: ElementType,
    },

    #[error("virtual file `{found}` closed out of order (innermost open file is `{expected}`)")]
    NestingViolation { expected: String, found: String },

    #[error("virtual files still open after `{operation}`: {}", .names.join(", "))]
    VirtualFileLeak {
        operation: String,
        names: Vec<String>,
    },

    #[error("{0} belongs to a different session")]
    ForeignHandle(String),

    #[error("resource `{resource}` not found: {message}")]
    ResourceNotFound { resource: String, message: String },

    #[error("resource `{resource}` is malformed: {message}")]
    Format { resource: String, message: String },

    #[error("another native session is already active in this process")]
    ConcurrentSession,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("`{0}` produced no output")]
    EmptyOutput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;
