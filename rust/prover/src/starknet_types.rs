//! Helper types for Starknet calldata.

use starknet::core::types::Felt;

use crate::error::ProverError;

/// Garaga groth16 calldata for one proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofCalldata {
    pub full_proof: Vec<String>,
}

impl ProofCalldata {
    pub fn new(full_proof: Vec<String>) -> Self {
        Self { full_proof }
    }

    pub fn as_proof(&self) -> &[String] {
        &self.full_proof
    }

    /// Serializes as a `Span<felt252>`, adding the length prefix unless garaga
    /// already emitted one.
    pub fn to_calldata(&self) -> Vec<String> {
        if let Some(len) = parse_len_token(self.full_proof.first()) {
            if len == self.full_proof.len().saturating_sub(1) {
                return self.full_proof.clone();
            }
        }
        let mut calldata = Vec::with_capacity(self.full_proof.len() + 1);
        calldata.push(format!("0x{:x}", self.full_proof.len()));
        calldata.extend(self.full_proof.iter().cloned());
        calldata
    }

    pub fn to_felts(&self) -> Result<Vec<Felt>, ProverError> {
        self.to_calldata()
            .iter()
            .map(|token| parse_felt_token(token))
            .collect()
    }
}

fn parse_felt_token(token: &str) -> Result<Felt, ProverError> {
    let parsed = if token.starts_with("0x") {
        Felt::from_hex(token)
    } else {
        Felt::from_dec_str(token)
    };
    parsed.map_err(|_| ProverError::Conversion(format!("invalid calldata token {token}")))
}

fn parse_len_token(token: Option<&String>) -> Option<usize> {
    let token = token?;
    if let Some(hex) = token.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        token.parse::<usize>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_length_prefix_when_missing() {
        let proof = ProofCalldata::new(vec!["0x5".to_string(), "0x6".to_string()]);
        assert_eq!(proof.to_calldata(), vec!["0x2", "0x5", "0x6"]);
    }

    #[test]
    fn keeps_existing_length_prefix() {
        let proof = ProofCalldata::new(vec![
            "0x2".to_string(),
            "0x5".to_string(),
            "0x6".to_string(),
        ]);
        assert_eq!(proof.to_calldata(), proof.full_proof);
    }

    #[test]
    fn felts_accept_decimal_and_hex() {
        let proof = ProofCalldata::new(vec!["17".to_string(), "0x11".to_string()]);
        let felts = proof.to_felts().expect("felts");
        assert_eq!(felts, vec![Felt::from(2u8), Felt::from(17u8), Felt::from(17u8)]);
    }

    #[test]
    fn felts_reject_garbage() {
        let proof = ProofCalldata::new(vec!["zz".to_string()]);
        assert!(matches!(proof.to_felts(), Err(ProverError::Conversion(_))));
    }
}
