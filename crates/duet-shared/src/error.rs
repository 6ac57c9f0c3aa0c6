use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Invalid email address: {0:?}")]
    InvalidEmail(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
