use thiserror::Error;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("master node {0} not exist")]
    OwnerNotFound(String),

    #[error("invalid node: {0}")]
    InvalidNode(String),

    #[error("{0} is required")]
    MissingParam(&'static str),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

impl From<serde_json::Error> for FanoutError {
    fn from(e: serde_json::Error) -> Self {
        FanoutError::Serialize(e.to_string())
    }
}
