use thiserror::Error;

#[derive(Error, Debug)]
pub enum LensError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON error: {0}")]
    Bson(String),
}

impl From<mongodb::error::Error> for LensError {
    fn from(err: mongodb::error::Error) -> Self {
        LensError::Connection(err.to_string())
    }
}

impl From<bson::ser::Error> for LensError {
    fn from(err: bson::ser::Error) -> Self {
        LensError::Bson(err.to_string())
    }
}

impl From<bson::de::Error> for LensError {
    fn from(err: bson::de::Error) -> Self {
        LensError::Bson(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LensError>;
