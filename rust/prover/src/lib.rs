//! Garaga-based proof generation pipeline for Starknet.
//!
//! Callers hand a [`CircuitId`] and its [`WitnessInputs`] to a [`ProofGateway`]
//! and get back verifier calldata plus the circuit's public signals. Circuit
//! internals never leak past this boundary.

mod circuits;
mod error;
mod garaga_converter;
mod snarkjs;
mod starknet_types;
mod witness;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

pub use crate::circuits::{validate_artifacts, CircuitArtifacts, CircuitId};
pub use crate::error::ProverError;
pub use crate::garaga_converter::generate_garaga_calldata;
pub use crate::snarkjs::{generate_proof_snarkjs, SnarkjsOutput, SnarkjsProof};
pub use crate::starknet_types::ProofCalldata;
pub use crate::witness::{WitnessInputs, WitnessValue, MERKLE_DEPTH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOutput {
    pub calldata: ProofCalldata,
    pub public_signals: Vec<String>,
}

#[async_trait]
pub trait ProofGateway: Send + Sync {
    async fn prove(
        &self,
        circuit: CircuitId,
        inputs: WitnessInputs,
    ) -> Result<ProofOutput, ProverError>;
}

/// Proves with the `snarkjs` and `garaga` CLIs against artifacts laid out as
/// `<dir>/<circuit>.wasm`, `<dir>/<circuit>.zkey`, `<dir>/<circuit>_vk.json`.
#[derive(Debug, Clone)]
pub struct SnarkjsProver {
    artifacts_dir: PathBuf,
}

impl SnarkjsProver {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }
}

#[async_trait]
impl ProofGateway for SnarkjsProver {
    async fn prove(
        &self,
        circuit: CircuitId,
        inputs: WitnessInputs,
    ) -> Result<ProofOutput, ProverError> {
        let artifacts = circuit.artifacts(&self.artifacts_dir);
        artifacts.ensure_present()?;
        let witness_json = inputs.to_json();
        let output = generate_proof_snarkjs(circuit, &witness_json, &artifacts).await?;
        let calldata = generate_garaga_calldata(
            &artifacts.verification_key,
            &output.proof_path,
            &output.public_signals_path,
        )
        .await?;
        info!(%circuit, felts = calldata.len(), "proof ready");
        Ok(ProofOutput {
            calldata: ProofCalldata::new(calldata),
            public_signals: output.public_signals.clone(),
        })
    }
}
