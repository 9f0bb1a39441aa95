//! The local note ledger.
//!
//! All writes go through one mutex doing read-full-set, apply-delta,
//! write-full-set against an injected [`NoteStore`], so concurrent tasks never
//! interleave partial updates.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::commitment::FieldHash;
use crate::error::ClientError;
use crate::notes::{NoteStatus, ShieldedNote};
use crate::utils::Address;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub notes: Vec<ShieldedNote>,
    /// Nullifier-hashes known to be consumed.
    pub spent: BTreeSet<FieldHash>,
}

impl LedgerSnapshot {
    fn position(&self, fingerprint: &FieldHash) -> Option<usize> {
        self.notes
            .iter()
            .position(|note| note.fingerprint() == *fingerprint)
    }

    fn upsert(&mut self, note: ShieldedNote) {
        match self.position(&note.fingerprint()) {
            Some(idx) => self.notes[idx] = note,
            None => self.notes.push(note),
        }
    }
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn load(&self) -> Result<LedgerSnapshot, ClientError>;
    async fn store(&self, snapshot: &LedgerSnapshot) -> Result<(), ClientError>;
}

/// Outcome of settling one pending note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    Promoted { amount: u128, commitment: FieldHash },
    /// Already ready, or gone from the ledger.
    Skipped,
}

pub struct NoteLedger {
    store: Arc<dyn NoteStore>,
    write_lock: Mutex<()>,
}

impl NoteLedger {
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot, ClientError> {
        self.store.load().await
    }

    pub async fn notes(&self) -> Result<Vec<ShieldedNote>, ClientError> {
        Ok(self.store.load().await?.notes)
    }

    pub async fn get(&self, fingerprint: &FieldHash) -> Result<Option<ShieldedNote>, ClientError> {
        let snapshot = self.store.load().await?;
        Ok(snapshot
            .notes
            .into_iter()
            .find(|note| note.fingerprint() == *fingerprint))
    }

    pub async fn pending_notes(&self) -> Result<Vec<ShieldedNote>, ClientError> {
        let snapshot = self.store.load().await?;
        Ok(snapshot
            .notes
            .into_iter()
            .filter(|note| note.status == NoteStatus::Pending)
            .collect())
    }

    pub async fn is_spent(&self, nullifier_hash: &FieldHash) -> Result<bool, ClientError> {
        Ok(self.store.load().await?.spent.contains(nullifier_hash))
    }

    /// First ready note of `token` holding exactly `amount` whose
    /// nullifier-hash is not in the spent set.
    pub async fn find_spendable(
        &self,
        token: Address,
        amount: u128,
    ) -> Result<Option<ShieldedNote>, ClientError> {
        let snapshot = self.store.load().await?;
        for note in snapshot.notes {
            if !note.is_ready() || note.token != token || note.amount != amount {
                continue;
            }
            if snapshot.spent.contains(&note.nullifier_hash()?) {
                continue;
            }
            return Ok(Some(note));
        }
        Ok(None)
    }

    pub async fn save_note(&self, note: ShieldedNote) -> Result<(), ClientError> {
        let fingerprint = note.fingerprint();
        self.update(|snapshot| {
            snapshot.upsert(note);
            Ok(())
        })
        .await?;
        debug!(%fingerprint, "note saved");
        Ok(())
    }

    /// Marks a pending note ready. A non-zero `settled_amount` replaces the
    /// local amount and rebinds the commitment.
    pub async fn promote(
        &self,
        fingerprint: &FieldHash,
        settled_amount: u128,
        index: Option<u64>,
    ) -> Result<Promotion, ClientError> {
        self.update(|snapshot| {
            let Some(idx) = snapshot.position(fingerprint) else {
                return Ok(Promotion::Skipped);
            };
            let note = &mut snapshot.notes[idx];
            if note.status != NoteStatus::Pending {
                return Ok(Promotion::Skipped);
            }
            if settled_amount != 0 {
                note.settle(settled_amount)?;
            }
            note.status = NoteStatus::Ready;
            if index.is_some() {
                note.index = index;
            }
            Ok(Promotion::Promoted {
                amount: note.amount,
                commitment: note.commitment,
            })
        })
        .await
    }

    /// Consumes a note: records its nullifier-hash as spent, drops it, and
    /// saves the output note if there is one. All in a single write.
    pub async fn record_spend(
        &self,
        fingerprint: &FieldHash,
        nullifier_hash: FieldHash,
        output: Option<ShieldedNote>,
    ) -> Result<(), ClientError> {
        self.update(|snapshot| {
            snapshot.spent.insert(nullifier_hash);
            snapshot.notes.retain(|note| note.fingerprint() != *fingerprint);
            if let Some(output) = output {
                snapshot.upsert(output);
            }
            Ok(())
        })
        .await
    }

    /// Self-correction for a note whose nullifier is already spent, either
    /// on-chain or in the ledger's own spent set.
    pub async fn correct_stale(
        &self,
        fingerprint: &FieldHash,
        nullifier_hash: FieldHash,
    ) -> Result<(), ClientError> {
        warn!(%fingerprint, "note already spent; removing from ledger");
        self.record_spend(fingerprint, nullifier_hash, None).await
    }

    async fn update<T, F>(&self, apply: F) -> Result<T, ClientError>
    where
        F: FnOnce(&mut LedgerSnapshot) -> Result<T, ClientError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.store.load().await?;
        let result = apply(&mut snapshot)?;
        self.store.store(&snapshot).await?;
        Ok(result)
    }
}
