//! Witness input formatting for Circom circuits.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde_json::Value;

use crate::error::ProverError;

/// Fixed depth of the commitment tree every circuit verifies against.
pub const MERKLE_DEPTH: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessValue {
    /// Decimal string passed through untouched.
    Scalar(String),
    U128(u128),
    Bool(bool),
    Bytes32([u8; 32]),
    VecBool(Vec<bool>),
    VecBytes32(Vec<[u8; 32]>),
}

/// Named circuit inputs. Keys are the circuit's public signal names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WitnessInputs {
    values: BTreeMap<String, WitnessValue>,
}

impl WitnessInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: WitnessValue) -> &mut Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&WitnessValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Inserts `path_elements` and `path_indices` padded to [`MERKLE_DEPTH`]
    /// with zero siblings and left-child indices.
    pub fn insert_merkle_path(
        &mut self,
        siblings: &[[u8; 32]],
        indices: &[bool],
    ) -> Result<&mut Self, ProverError> {
        if siblings.len() != indices.len() {
            return Err(ProverError::InvalidInput(format!(
                "merkle path has {} siblings but {} indices",
                siblings.len(),
                indices.len()
            )));
        }
        if siblings.len() > MERKLE_DEPTH {
            return Err(ProverError::InvalidInput(format!(
                "merkle path deeper than {MERKLE_DEPTH}"
            )));
        }
        let mut elements = siblings.to_vec();
        elements.resize(MERKLE_DEPTH, [0u8; 32]);
        let mut bits = indices.to_vec();
        bits.resize(MERKLE_DEPTH, false);
        self.insert("path_elements", WitnessValue::VecBytes32(elements));
        self.insert("path_indices", WitnessValue::VecBool(bits));
        Ok(self)
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.values {
            map.insert(key.clone(), witness_value_to_json(value));
        }
        Value::Object(map)
    }
}

fn witness_value_to_json(value: &WitnessValue) -> Value {
    match value {
        WitnessValue::Scalar(value) => Value::String(value.clone()),
        WitnessValue::U128(value) => Value::String(value.to_string()),
        WitnessValue::Bool(value) => Value::String(bool_to_string(*value)),
        WitnessValue::Bytes32(value) => Value::String(bytes_to_decimal(value)),
        WitnessValue::VecBool(values) => Value::Array(
            values
                .iter()
                .map(|v| Value::String(bool_to_string(*v)))
                .collect(),
        ),
        WitnessValue::VecBytes32(values) => Value::Array(
            values
                .iter()
                .map(|v| Value::String(bytes_to_decimal(v)))
                .collect(),
        ),
    }
}

fn bytes_to_decimal(bytes: &[u8; 32]) -> String {
    BigUint::from_bytes_be(bytes).to_str_radix(10)
}

fn bool_to_string(value: bool) -> String {
    if value { "1".to_string() } else { "0".to_string() }
}
