//! Snarkjs proof generation wrapper.
//! Requires the `snarkjs` CLI to be available on PATH.

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::circuits::{CircuitArtifacts, CircuitId};
use crate::error::ProverError;

#[derive(Debug, Clone, Deserialize)]
pub struct SnarkjsProof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    pub protocol: String,
    pub curve: String,
}

/// Proof files produced in a private scratch directory, removed on drop.
#[derive(Debug)]
pub struct SnarkjsOutput {
    pub proof: SnarkjsProof,
    pub public_signals: Vec<String>,
    pub workdir: PathBuf,
    pub proof_path: PathBuf,
    pub public_signals_path: PathBuf,
}

impl Drop for SnarkjsOutput {
    fn drop(&mut self) {
        if self.workdir.as_os_str().is_empty() {
            return;
        }
        let _ = std::fs::remove_dir_all(&self.workdir);
    }
}

pub async fn generate_proof_snarkjs(
    circuit: CircuitId,
    witness_input: &serde_json::Value,
    artifacts: &CircuitArtifacts,
) -> Result<SnarkjsOutput, ProverError> {
    if !artifacts.wasm.exists() {
        return Err(ProverError::InvalidInput(format!(
            "missing wasm at {}",
            artifacts.wasm.display()
        )));
    }
    if !artifacts.zkey.exists() {
        return Err(ProverError::InvalidInput(format!(
            "missing zkey at {}",
            artifacts.zkey.display()
        )));
    }

    let workdir = create_temp_dir(circuit.name())?;
    let result = prove_in(&workdir, witness_input, artifacts).await;
    match result {
        Ok((proof, public_signals, proof_path, public_signals_path)) => {
            debug!(%circuit, signals = public_signals.len(), "snarkjs proof generated");
            Ok(SnarkjsOutput {
                proof,
                public_signals,
                workdir,
                proof_path,
                public_signals_path,
            })
        }
        Err(err) => {
            let _ = std::fs::remove_dir_all(&workdir);
            Err(err)
        }
    }
}

async fn prove_in(
    workdir: &Path,
    witness_input: &serde_json::Value,
    artifacts: &CircuitArtifacts,
) -> Result<(SnarkjsProof, Vec<String>, PathBuf, PathBuf), ProverError> {
    let input_path = workdir.join("input.json");
    let witness_path = workdir.join("witness.wtns");
    let proof_path = workdir.join("proof.json");
    let public_path = workdir.join("public.json");

    write_private_file(&input_path, &serde_json::to_vec_pretty(witness_input)?)?;

    run_snarkjs(
        [
            "wtns",
            "calculate",
            &artifacts.wasm.display().to_string(),
            &input_path.display().to_string(),
            &witness_path.display().to_string(),
        ],
        workdir,
    )
    .await?;

    run_snarkjs(
        [
            "groth16",
            "prove",
            &artifacts.zkey.display().to_string(),
            &witness_path.display().to_string(),
            &proof_path.display().to_string(),
            &public_path.display().to_string(),
        ],
        workdir,
    )
    .await?;

    let proof: SnarkjsProof = serde_json::from_slice(&std::fs::read(&proof_path)?)?;
    let public_signals: Vec<String> = serde_json::from_slice(&std::fs::read(&public_path)?)?;
    Ok((proof, public_signals, proof_path, public_path))
}

async fn run_snarkjs<I, S>(args: I, workdir: &Path) -> Result<(), ProverError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut command = Command::new("snarkjs");
    if let Ok(options) = std::env::var("ZYLITH_NODE_OPTIONS") {
        command.env("NODE_OPTIONS", options);
    } else if std::env::var("NODE_OPTIONS").is_err() {
        command.env("NODE_OPTIONS", "--max-old-space-size=8192");
    }
    for arg in args {
        command.arg(arg.as_ref());
    }
    command.current_dir(workdir);
    let output = command
        .output()
        .await
        .map_err(|err| ProverError::Snarkjs(format!("failed to run snarkjs: {err}")))?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProverError::Snarkjs(format!(
            "snarkjs failed ({}): {stdout} {stderr}",
            describe_status(&output.status)
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn describe_status(status: &std::process::ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("terminated by signal {signal}"),
        (None, None) => "terminated".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_status(status: &std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated".to_string(),
    }
}

// Witness inputs carry note secrets, keep them owner-readable only.
fn write_private_file(path: &Path, data: &[u8]) -> Result<(), ProverError> {
    use std::io::Write;
    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    Ok(())
}

fn create_temp_dir(circuit_name: &str) -> Result<PathBuf, ProverError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| ProverError::Io(err.to_string()))?;
    let dir = std::env::temp_dir().join(format!(
        "zylith_snarkjs_{circuit_name}_{}_{}",
        now.as_nanos(),
        std::process::id()
    ));
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(dir)
}
