use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::commitment::{
    derive_commitment, derive_identity, derive_nullifier_hash, random_scalar, FieldHash,
};
use crate::error::ClientError;
use crate::utils::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteStatus {
    /// Submitted but not yet seen by the indexer.
    Pending,
    /// Indexed and spendable.
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoteKind {
    Swap,
    Lp { tick_lower: i32, tick_upper: i32 },
}

impl NoteKind {
    pub fn ticks(&self) -> Option<(i32, i32)> {
        match self {
            NoteKind::Swap => None,
            NoteKind::Lp {
                tick_lower,
                tick_upper,
            } => Some((*tick_lower, *tick_upper)),
        }
    }
}

/// A private claim on pool value. The secret and nullifier never leave the
/// process except inside witness inputs or the sealed ledger file.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ShieldedNote {
    #[zeroize(skip)]
    pub token: Address,
    #[serde(with = "scalar_hex")]
    pub secret: [u8; 32],
    #[serde(with = "scalar_hex")]
    pub nullifier: [u8; 32],
    /// Token units for swap notes, liquidity units for LP notes.
    #[zeroize(skip)]
    pub amount: u128,
    #[zeroize(skip)]
    pub note_hash: FieldHash,
    #[zeroize(skip)]
    pub commitment: FieldHash,
    #[zeroize(skip)]
    pub status: NoteStatus,
    #[zeroize(skip)]
    pub kind: NoteKind,
    #[zeroize(skip)]
    #[serde(default)]
    pub index: Option<u64>,
    /// Local CLMM estimate for shielded notes. Never hashed.
    #[zeroize(skip)]
    #[serde(default)]
    pub quoted_amount: Option<u128>,
}

impl ShieldedNote {
    /// Fresh note with random secret and nullifier, saved as pending until
    /// the indexer sees it.
    pub fn generate(token: Address, amount: u128, kind: NoteKind) -> Result<Self, ClientError> {
        let secret = random_scalar();
        let nullifier = random_scalar();
        let note_hash = derive_identity(&secret, &nullifier)?;
        let commitment = derive_commitment(&note_hash, amount)?;
        Ok(Self {
            token,
            secret,
            nullifier,
            amount,
            note_hash,
            commitment,
            status: NoteStatus::Pending,
            kind,
            index: None,
            quoted_amount: None,
        })
    }

    /// Stable identity across amount rewrites.
    pub fn fingerprint(&self) -> FieldHash {
        self.note_hash
    }

    pub fn nullifier_hash(&self) -> Result<FieldHash, ClientError> {
        derive_nullifier_hash(&self.secret, &self.commitment)
    }

    /// Commitment the note would have if it held `amount`.
    pub fn commitment_for(&self, amount: u128) -> Result<FieldHash, ClientError> {
        derive_commitment(&self.note_hash, amount)
    }

    /// Rebinds the note to the indexer-settled amount.
    pub fn settle(&mut self, amount: u128) -> Result<(), ClientError> {
        self.commitment = self.commitment_for(amount)?;
        self.amount = amount;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.status == NoteStatus::Ready
    }

    pub fn ticks(&self) -> Option<(i32, i32)> {
        self.kind.ticks()
    }
}

impl fmt::Debug for ShieldedNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShieldedNote")
            .field("token", &self.token)
            .field("amount", &self.amount)
            .field("note_hash", &self.note_hash)
            .field("commitment", &self.commitment)
            .field("status", &self.status)
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("quoted_amount", &self.quoted_amount)
            .finish_non_exhaustive()
    }
}

mod scalar_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(deserializer)?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        let decoded = hex::decode(digits).map_err(serde::de::Error::custom)?;
        if decoded.len() > 32 {
            return Err(serde::de::Error::custom("scalar wider than 32 bytes"));
        }
        let mut bytes = [0u8; 32];
        bytes[32 - decoded.len()..].copy_from_slice(&decoded);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starknet::core::types::Felt;

    #[test]
    fn generated_note_is_pending_and_self_consistent() {
        let note = ShieldedNote::generate(Felt::from(7u8), 1_000, NoteKind::Swap).expect("note");
        assert_eq!(note.status, NoteStatus::Pending);
        assert_eq!(note.fingerprint(), note.note_hash);
        assert_eq!(note.commitment, note.commitment_for(1_000).expect("commitment"));
        assert!(note.ticks().is_none());
    }

    #[test]
    fn settle_rebinds_commitment_and_keeps_fingerprint() {
        let mut note = ShieldedNote::generate(Felt::from(7u8), 0, NoteKind::Swap).expect("note");
        let fingerprint = note.fingerprint();
        let before = note.nullifier_hash().expect("nullifier");
        note.settle(42).expect("settle");
        assert_eq!(note.amount, 42);
        assert_eq!(note.fingerprint(), fingerprint);
        assert_ne!(note.nullifier_hash().expect("nullifier"), before);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let note = ShieldedNote::generate(Felt::ONE, 5, NoteKind::Swap).expect("note");
        let rendered = format!("{note:?}");
        assert!(!rendered.contains(&hex::encode(note.secret)));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn lp_notes_serialize_with_ticks() {
        let note = ShieldedNote::generate(
            Felt::ONE,
            5,
            NoteKind::Lp {
                tick_lower: -600,
                tick_upper: 600,
            },
        )
        .expect("note");
        let json = serde_json::to_value(&note).expect("json");
        assert_eq!(json["kind"]["type"], "lp");
        assert_eq!(json["kind"]["tick_lower"], -600);
        assert_eq!(json["status"], "pending");
        let back: ShieldedNote = serde_json::from_value(json).expect("decode");
        assert_eq!(back.secret, note.secret);
        assert_eq!(back.ticks(), Some((-600, 600)));
    }
}
