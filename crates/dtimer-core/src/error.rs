use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DTimerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for DTimerError {
    fn from(err: serde_json::Error) -> Self {
        DTimerError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DTimerError>;
