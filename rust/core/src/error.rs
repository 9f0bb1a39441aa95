use thiserror::Error;
use zylith_prover::ProverError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("stale state: {0}")]
    StaleState(String),
    #[error("indexing not ready: {0}")]
    IndexingNotReady(String),
    #[error("proof generation failed: {0}")]
    ProofGeneration(String),
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("poll error: {0}")]
    Poll(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("indexer error: {0}")]
    Indexer(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serde error: {0}")]
    Serde(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("another action is already in flight")]
    ActionInFlight,
    #[error("runtime stopped")]
    RuntimeStopped,
}

impl ClientError {
    /// Whether re-running the same action unchanged can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::StaleState(_)
                | ClientError::IndexingNotReady(_)
                | ClientError::ProofGeneration(_)
                | ClientError::Submission(_)
                | ClientError::Poll(_)
                | ClientError::Rpc(_)
                | ClientError::Indexer(_)
                | ClientError::ActionInFlight
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serde(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Indexer(err.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<ProverError> for ClientError {
    fn from(err: ProverError) -> Self {
        ClientError::ProofGeneration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = ClientError::Validation("insufficient liquidity".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "validation error: insufficient liquidity");
    }

    #[test]
    fn stale_state_is_retryable() {
        assert!(ClientError::StaleState("spent".to_string()).is_retryable());
        assert!(ClientError::Submission("rejected".to_string()).is_retryable());
    }

    #[test]
    fn prover_errors_map_to_proof_generation() {
        let err: ClientError = ProverError::Snarkjs("exit code 1".to_string()).into();
        match err {
            ClientError::ProofGeneration(msg) => assert!(msg.contains("exit code 1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
