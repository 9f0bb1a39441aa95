//! Garaga calldata generation helpers.
//! Requires the `garaga` CLI to be available on PATH.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::error::ProverError;

const EXPECTED_GARAGA_VERSION: &str = "0.18.2";

pub async fn generate_garaga_calldata(
    vk_path: &Path,
    proof_path: &Path,
    public_signals_path: &Path,
) -> Result<Vec<String>, ProverError> {
    ensure_garaga_pinned().await?;
    for (label, path) in [
        ("verification key", vk_path),
        ("proof", proof_path),
        ("public signals", public_signals_path),
    ] {
        if !path.exists() {
            return Err(ProverError::InvalidInput(format!(
                "missing {label} at {}",
                path.display()
            )));
        }
    }

    let output = Command::new("garaga")
        .arg("calldata")
        .arg("--vk")
        .arg(vk_path)
        .arg("--proof")
        .arg(proof_path)
        .arg("--public-inputs")
        .arg(public_signals_path)
        .arg("--system")
        .arg("groth16")
        .arg("--format")
        .arg("array")
        .output()
        .await
        .map_err(|err| ProverError::Garaga(format!("failed to run garaga: {err}")))?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProverError::Garaga(format!(
            "garaga failed: {stdout} {stderr}"
        )));
    }

    let calldata = parse_calldata_output(&String::from_utf8_lossy(&output.stdout))?;
    debug!(felts = calldata.len(), "garaga calldata generated");
    Ok(calldata)
}

/// Extracts felt tokens from garaga's `--format array` output, skipping any banner.
fn parse_calldata_output(stdout: &str) -> Result<Vec<String>, ProverError> {
    let tokens: Vec<String> = stdout
        .split_whitespace()
        .map(normalize_token)
        .filter(|token| !token.is_empty())
        .collect();
    let start = tokens
        .iter()
        .position(|token| is_felt_token(token))
        .ok_or_else(|| ProverError::Garaga("garaga calldata empty".to_string()))?;
    Ok(tokens[start..].to_vec())
}

fn is_felt_token(token: &str) -> bool {
    token.starts_with("0x") || token.chars().all(|c| c.is_ascii_digit())
}

fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c| c == '[' || c == ']' || c == ',')
        .to_string()
}

async fn ensure_garaga_pinned() -> Result<(), ProverError> {
    let version_output = Command::new("garaga")
        .arg("--version")
        .output()
        .await
        .map_err(|err| ProverError::Garaga(format!("failed to run garaga: {err}")))?;
    if !version_output.status.success() {
        let stdout = String::from_utf8_lossy(&version_output.stdout);
        let stderr = String::from_utf8_lossy(&version_output.stderr);
        return Err(ProverError::Garaga(format!(
            "garaga --version failed: {stdout} {stderr}"
        )));
    }
    let version_stdout = String::from_utf8_lossy(&version_output.stdout);
    let version = parse_garaga_version(&version_stdout).ok_or_else(|| {
        ProverError::Garaga("garaga --version output unrecognized".to_string())
    })?;
    let expected = std::env::var("ZYLITH_GARAGA_VERSION")
        .unwrap_or_else(|_| EXPECTED_GARAGA_VERSION.to_string());
    if version != expected {
        return Err(ProverError::Garaga(format!(
            "garaga version mismatch: expected {expected} got {version}"
        )));
    }
    Ok(())
}

fn parse_garaga_version(output: &str) -> Option<String> {
    let token = output.trim().split_whitespace().last()?;
    if token.chars().all(|c| c.is_ascii_digit() || c == '.') {
        Some(token.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_output_after_banner() {
        let stdout = "Generating calldata...\n[0x3, 0x1, 12,\n 0xabc]\n";
        let calldata = parse_calldata_output(stdout).expect("calldata");
        assert_eq!(calldata, vec!["0x3", "0x1", "12", "0xabc"]);
    }

    #[test]
    fn empty_output_is_an_error() {
        let err = parse_calldata_output("no calldata here").expect_err("empty");
        match err {
            ProverError::Garaga(msg) => assert!(msg.contains("empty")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn version_is_last_token() {
        assert_eq!(parse_garaga_version("garaga 0.18.2\n").as_deref(), Some("0.18.2"));
        assert_eq!(parse_garaga_version("garaga unknown"), None);
    }
}
