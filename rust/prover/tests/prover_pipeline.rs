use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde_json::Value;
use tokio::sync::Mutex;
use zylith_prover::{CircuitId, ProofGateway, ProverError, SnarkjsProver, WitnessInputs, WitnessValue};

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

fn artifacts_root() -> PathBuf {
    std::env::var("ZYLITH_ARTIFACTS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| repo_root().join("artifacts"))
}

fn vectors_root() -> PathBuf {
    std::env::var("ZYLITH_VECTORS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| repo_root().join("circuits/test/vectors"))
}

/// Loads a vector's `input` object as raw scalar witness values.
fn load_vector_inputs(circuit: CircuitId, name: &str) -> Result<WitnessInputs, ProverError> {
    let path = vectors_root()
        .join(circuit.name())
        .join(format!("{name}.json"));
    let data = std::fs::read_to_string(&path)
        .map_err(|err| ProverError::Io(format!("failed to read {path:?}: {err}")))?;
    let value: Value = serde_json::from_str(&data)?;
    let input = value
        .get("input")
        .and_then(Value::as_object)
        .ok_or_else(|| ProverError::InvalidInput("vector missing input".to_string()))?;
    let mut inputs = WitnessInputs::new();
    for (key, value) in input {
        let scalar = value
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string());
        inputs.insert(key, WitnessValue::Scalar(scalar));
    }
    Ok(inputs)
}

async fn with_prover_lock<F, Fut>(f: F) -> Result<(), ProverError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<(), ProverError>>,
{
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let guard = LOCK.get_or_init(|| Mutex::new(())).lock().await;
    let result = f().await;
    drop(guard);
    result
}

async fn run_vector(circuit: CircuitId, name: &str) -> Result<(), ProverError> {
    let inputs = load_vector_inputs(circuit, name)?;
    let prover = SnarkjsProver::new(artifacts_root());
    let output = prover.prove(circuit, inputs).await?;
    if output.calldata.as_proof().is_empty() {
        return Err(ProverError::Garaga("garaga calldata empty".to_string()));
    }
    if output.public_signals.is_empty() {
        return Err(ProverError::Snarkjs("no public signals".to_string()));
    }
    Ok(())
}

#[tokio::test]
async fn prover_reports_missing_artifacts() {
    let prover = SnarkjsProver::new("/nonexistent/zylith-artifacts");
    let err = prover
        .prove(CircuitId::Withdraw, WitnessInputs::new())
        .await
        .expect_err("missing artifacts");
    match err {
        ProverError::InvalidInput(msg) => assert!(msg.contains("withdraw.wasm")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn prove_swap_vector() -> Result<(), ProverError> {
    with_prover_lock(|| run_vector(CircuitId::Swap, "single_step_swap")).await
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn prove_liquidity_vector() -> Result<(), ProverError> {
    with_prover_lock(|| run_vector(CircuitId::Liquidity, "mint_in_range")).await
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn prove_withdraw_vector() -> Result<(), ProverError> {
    with_prover_lock(|| run_vector(CircuitId::Withdraw, "full_withdraw")).await
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn prove_liquidity_ownership_vector() -> Result<(), ProverError> {
    with_prover_lock(|| run_vector(CircuitId::LiquidityOwnership, "collect_fees")).await
}
