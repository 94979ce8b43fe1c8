use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Malformed wake hint: {0}")]
    MalformedHint(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
