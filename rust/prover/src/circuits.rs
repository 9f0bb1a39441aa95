//! Circuit identifiers and their on-disk artifacts.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ProverError;

/// Circuits the pool verifier accepts proofs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitId {
    Swap,
    Liquidity,
    Withdraw,
    LiquidityOwnership,
}

impl CircuitId {
    pub const ALL: [CircuitId; 4] = [
        CircuitId::Swap,
        CircuitId::Liquidity,
        CircuitId::Withdraw,
        CircuitId::LiquidityOwnership,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CircuitId::Swap => "swap",
            CircuitId::Liquidity => "lp",
            CircuitId::Withdraw => "withdraw",
            CircuitId::LiquidityOwnership => "lp_ownership",
        }
    }

    pub fn artifacts(&self, artifacts_dir: &Path) -> CircuitArtifacts {
        let name = self.name();
        CircuitArtifacts {
            wasm: artifacts_dir.join(format!("{name}.wasm")),
            zkey: artifacts_dir.join(format!("{name}.zkey")),
            verification_key: artifacts_dir.join(format!("{name}_vk.json")),
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitArtifacts {
    pub wasm: PathBuf,
    pub zkey: PathBuf,
    pub verification_key: PathBuf,
}

impl CircuitArtifacts {
    pub fn ensure_present(&self) -> Result<(), ProverError> {
        for (label, path) in [
            ("wasm", &self.wasm),
            ("zkey", &self.zkey),
            ("verification key", &self.verification_key),
        ] {
            if !path.exists() {
                return Err(ProverError::InvalidInput(format!(
                    "missing {label} at {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Checks every circuit's artifacts up front so a misconfigured directory
/// fails at startup instead of mid-action.
pub fn validate_artifacts(artifacts_dir: &Path) -> Result<(), ProverError> {
    for circuit in CircuitId::ALL {
        circuit.artifacts(artifacts_dir).ensure_present()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifacts_follow_circuit_name() {
        let artifacts = CircuitId::LiquidityOwnership.artifacts(Path::new("/srv/circuits"));
        assert_eq!(artifacts.wasm, PathBuf::from("/srv/circuits/lp_ownership.wasm"));
        assert_eq!(artifacts.zkey, PathBuf::from("/srv/circuits/lp_ownership.zkey"));
        assert_eq!(
            artifacts.verification_key,
            PathBuf::from("/srv/circuits/lp_ownership_vk.json")
        );
    }

    #[test]
    fn missing_artifacts_are_reported() {
        let err = validate_artifacts(Path::new("/nonexistent/zylith")).expect_err("missing");
        match err {
            ProverError::InvalidInput(msg) => assert!(msg.contains("swap.wasm")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn complete_artifact_dir_validates_until_one_file_goes_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        for circuit in CircuitId::ALL {
            let artifacts = circuit.artifacts(dir.path());
            for path in [&artifacts.wasm, &artifacts.zkey, &artifacts.verification_key] {
                std::fs::write(path, b"{}").expect("write");
            }
        }
        validate_artifacts(dir.path()).expect("complete");

        std::fs::remove_file(dir.path().join("lp_ownership_vk.json")).expect("remove");
        let err = validate_artifacts(dir.path()).expect_err("missing vk");
        assert!(err.to_string().contains("lp_ownership_vk.json"));
    }
}
