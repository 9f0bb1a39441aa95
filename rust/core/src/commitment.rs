//! Note identities: note-hash, commitment and nullifier-hash.
//!
//! Every derivation is one call of the circom Poseidon permutation with two
//! BN254 inputs, the same function the verifier contract and the circuits
//! evaluate.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use starknet::core::types::{Felt, U256};

use crate::error::ClientError;
use crate::utils::u256_to_felts;

/// Random secret width. 248 bits always sit below the BN254 modulus.
pub const SECRET_BYTES: usize = 31;

/// A BN254 field element in canonical big-endian form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldHash([u8; 32]);

impl FieldHash {
    pub const ZERO: FieldHash = FieldHash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn to_decimal(&self) -> String {
        BigUint::from_bytes_be(&self.0).to_str_radix(10)
    }

    pub fn to_u256(&self) -> U256 {
        let mut high = [0u8; 16];
        let mut low = [0u8; 16];
        high.copy_from_slice(&self.0[..16]);
        low.copy_from_slice(&self.0[16..]);
        U256::from_words(u128::from_be_bytes(low), u128::from_be_bytes(high))
    }

    /// `(low, high)` felts, the calldata encoding of a u256.
    pub fn to_felts(&self) -> [Felt; 2] {
        u256_to_felts(self.to_u256())
    }

    /// The low 128 bits, if the value fits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(low))
    }

    fn to_fr(self) -> Result<Fr, ClientError> {
        let fr = Fr::from_be_bytes_mod_order(&self.0);
        if fr.into_bigint().to_bytes_be() != self.0 {
            return Err(ClientError::Crypto(format!(
                "{} is not a canonical field element",
                self.to_hex()
            )));
        }
        Ok(fr)
    }

    fn from_fr(fr: Fr) -> Result<Self, ClientError> {
        let bytes = fr.into_bigint().to_bytes_be();
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ClientError::Crypto("field element wider than 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for FieldHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FieldHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldHash({})", self.to_hex())
    }
}

impl FromStr for FieldHash {
    type Err = ClientError;

    /// Accepts `0x`-prefixed hex of any width up to 64 digits, or decimal.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some("") => None,
            Some(digits) => BigUint::parse_bytes(digits.as_bytes(), 16),
            None => BigUint::parse_bytes(value.as_bytes(), 10),
        };
        let parsed =
            parsed.ok_or_else(|| ClientError::Serde(format!("invalid field element {value}")))?;
        let raw = parsed.to_bytes_be();
        if raw.len() > 32 {
            return Err(ClientError::Serde(format!(
                "field element {value} wider than 32 bytes"
            )));
        }
        let mut bytes = [0u8; 32];
        bytes[32 - raw.len()..].copy_from_slice(&raw);
        Ok(Self(bytes))
    }
}

impl Serialize for FieldHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn poseidon_pair(left: &FieldHash, right: &FieldHash) -> Result<FieldHash, ClientError> {
    let mut hasher = Poseidon::<Fr>::new_circom(2)
        .map_err(|err| ClientError::Crypto(format!("poseidon init failed: {err}")))?;
    let hashed = hasher
        .hash(&[left.to_fr()?, right.to_fr()?])
        .map_err(|err| ClientError::Crypto(format!("poseidon hash failed: {err}")))?;
    FieldHash::from_fr(hashed)
}

/// `noteHash = H(secret, nullifier)`
pub fn derive_identity(secret: &[u8; 32], nullifier: &[u8; 32]) -> Result<FieldHash, ClientError> {
    poseidon_pair(&FieldHash::from_bytes(*secret), &FieldHash::from_bytes(*nullifier))
}

/// `commitment = H(noteHash, amount)`
pub fn derive_commitment(note_hash: &FieldHash, amount: u128) -> Result<FieldHash, ClientError> {
    poseidon_pair(note_hash, &FieldHash::from_u128(amount))
}

/// `nullifierHash = H(secret, commitment)`
pub fn derive_nullifier_hash(
    secret: &[u8; 32],
    commitment: &FieldHash,
) -> Result<FieldHash, ClientError> {
    poseidon_pair(&FieldHash::from_bytes(*secret), commitment)
}

/// Fresh scalar from the OS CSPRNG: 31 random bytes, left-padded to 32.
pub fn random_scalar() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes[32 - SECRET_BYTES..]);
    bytes
}
