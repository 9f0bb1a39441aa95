use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProverError {
    #[error("io error: {0}")]
    Io(String),
    #[error("json error: {0}")]
    Json(String),
    #[error("snarkjs error: {0}")]
    Snarkjs(String),
    #[error("garaga error: {0}")]
    Garaga(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<std::io::Error> for ProverError {
    fn from(err: std::io::Error) -> Self {
        ProverError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ProverError {
    fn from(err: serde_json::Error) -> Self {
        ProverError::Json(err.to_string())
    }
}
