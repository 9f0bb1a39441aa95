//! Background reconciliation against the indexer and the pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::ChainGateway;
use crate::commitment::FieldHash;
use crate::error::ClientError;
use crate::indexer::Indexer;
use crate::ledger::{NoteLedger, Promotion};
use crate::notes::{NoteKind, NoteStatus};
use crate::utils::Address;

/// What one pass of the poller did.
#[derive(Debug, Default)]
pub struct PollReport {
    pub checked: usize,
    pub promoted: Vec<FieldHash>,
    /// Notes the indexer has not picked up yet.
    pub still_pending: Vec<FieldHash>,
    pub errors: Vec<(FieldHash, ClientError)>,
}

/// Promotes pending notes once their commitments reach the indexer tree.
pub struct IndexingPoller {
    indexer: Arc<dyn Indexer>,
    ledger: Arc<NoteLedger>,
    request_timeout: Duration,
}

impl IndexingPoller {
    pub fn new(indexer: Arc<dyn Indexer>, ledger: Arc<NoteLedger>, request_timeout: Duration) -> Self {
        Self {
            indexer,
            ledger,
            request_timeout,
        }
    }

    /// One pass over every pending note. Failures are reported, never written.
    pub async fn poll_once(&self) -> Result<PollReport, ClientError> {
        let pending = self.ledger.pending_notes().await?;
        let mut report = PollReport {
            checked: pending.len(),
            ..PollReport::default()
        };
        for note in pending {
            let fingerprint = note.fingerprint();
            let request = self.indexer.get_path(&note.commitment, &note.note_hash);
            let path = match tokio::time::timeout(self.request_timeout, request).await {
                Ok(Ok(path)) => path,
                Ok(Err(err)) => {
                    warn!(%fingerprint, error = %err, "indexer poll failed");
                    report.errors.push((fingerprint, ClientError::Poll(err.to_string())));
                    continue;
                }
                Err(_) => {
                    warn!(%fingerprint, "indexer poll timed out");
                    report.errors.push((
                        fingerprint,
                        ClientError::Poll(format!("timed out after {:?}", self.request_timeout)),
                    ));
                    continue;
                }
            };
            if !path.is_indexed() {
                debug!(%fingerprint, "not indexed yet");
                report.still_pending.push(fingerprint);
                continue;
            }
            match self
                .ledger
                .promote(&fingerprint, path.amount, Some(path.index))
                .await
            {
                Ok(Promotion::Promoted { amount, commitment }) => {
                    if !path.commitment.is_zero() && path.commitment != commitment {
                        warn!(
                            %fingerprint,
                            local = %commitment,
                            indexed = %path.commitment,
                            "settled commitment differs from indexed leaf"
                        );
                    }
                    info!(%fingerprint, amount, index = path.index, "note ready");
                    report.promoted.push(fingerprint);
                }
                Ok(Promotion::Skipped) => {}
                Err(err) => {
                    warn!(%fingerprint, error = %err, "promotion failed");
                    report.errors.push((fingerprint, ClientError::Poll(err.to_string())));
                }
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenAggregate {
    /// Sum of ready, unspent swap notes.
    pub withdrawable: u128,
    pub pending_notes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub tokens: BTreeMap<Address, TokenAggregate>,
    pub fees_owed0: u128,
    pub fees_owed1: u128,
    /// Ready LP notes whose position read failed this round.
    pub unread_positions: usize,
}

/// Recomputes per-token balances and LP fees owed, publishing on a watch channel.
pub struct AggregateRecompute {
    chain: Arc<dyn ChainGateway>,
    ledger: Arc<NoteLedger>,
    tx: watch::Sender<Aggregates>,
}

impl AggregateRecompute {
    pub fn new(chain: Arc<dyn ChainGateway>, ledger: Arc<NoteLedger>) -> Self {
        let (tx, _) = watch::channel(Aggregates::default());
        Self { chain, ledger, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Aggregates> {
        self.tx.subscribe()
    }

    pub async fn recompute(&self) -> Result<Aggregates, ClientError> {
        let snapshot = self.ledger.snapshot().await?;
        let mut aggregates = Aggregates::default();
        for note in &snapshot.notes {
            if snapshot.spent.contains(&note.nullifier_hash()?) {
                continue;
            }
            let entry = aggregates.tokens.entry(note.token).or_default();
            match (note.status, &note.kind) {
                (NoteStatus::Pending, _) => entry.pending_notes += 1,
                (NoteStatus::Ready, NoteKind::Swap) => {
                    entry.withdrawable = entry.withdrawable.saturating_add(note.amount);
                }
                (NoteStatus::Ready, NoteKind::Lp { .. }) => {
                    match self.chain.get_position(&note.note_hash).await {
                        Ok(fees) => {
                            aggregates.fees_owed0 =
                                aggregates.fees_owed0.saturating_add(fees.tokens_owed0);
                            aggregates.fees_owed1 =
                                aggregates.fees_owed1.saturating_add(fees.tokens_owed1);
                        }
                        Err(err) => {
                            warn!(fingerprint = %note.fingerprint(), error = %err, "position read failed");
                            aggregates.unread_positions += 1;
                        }
                    }
                }
            }
        }
        self.tx.send_replace(aggregates.clone());
        Ok(aggregates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ContractCall, PoolState, PositionFees, Reserves};
    use crate::indexer::{MerklePath, TokenMeta};
    use crate::notes::ShieldedNote;
    use crate::store::MemoryNoteStore;
    use async_trait::async_trait;
    use starknet::core::types::{Felt, U256};
    use std::collections::HashMap;
    use std::sync::Mutex;

    // std Mutex: never held across an await.
    #[derive(Default)]
    struct ScriptedIndexer {
        paths: Mutex<HashMap<FieldHash, Result<MerklePath, String>>>,
        stall: bool,
    }

    impl ScriptedIndexer {
        fn indexed(&self, note_hash: FieldHash, amount: u128, commitment: FieldHash) {
            let path = MerklePath {
                root: FieldHash::from_u128(1),
                path: vec![],
                indices: vec![],
                index: 7,
                amount,
                commitment,
            };
            self.paths.lock().expect("lock").insert(note_hash, Ok(path));
        }
    }

    #[async_trait]
    impl Indexer for ScriptedIndexer {
        async fn get_path(
            &self,
            commitment: &FieldHash,
            note_hash: &FieldHash,
        ) -> Result<MerklePath, ClientError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            match self.paths.lock().expect("lock").get(note_hash) {
                Some(Ok(path)) => Ok(path.clone()),
                Some(Err(msg)) => Err(ClientError::Indexer(msg.clone())),
                None => Ok(MerklePath {
                    root: FieldHash::ZERO,
                    path: vec![],
                    indices: vec![],
                    index: 0,
                    amount: 0,
                    commitment: *commitment,
                }),
            }
        }

        async fn tokens(&self) -> Result<Vec<TokenMeta>, ClientError> {
            Ok(vec![])
        }
    }

    struct FeeChain;

    #[async_trait]
    impl ChainGateway for FeeChain {
        async fn get_state(&self) -> Result<PoolState, ClientError> {
            Err(ClientError::Rpc("unused".to_string()))
        }
        async fn get_reserves(&self) -> Result<Reserves, ClientError> {
            Ok(Reserves {
                reserve0: U256::from(0u8),
                reserve1: U256::from(0u8),
            })
        }
        async fn get_position(&self, _: &FieldHash) -> Result<PositionFees, ClientError> {
            Ok(PositionFees {
                liquidity: 1,
                tokens_owed0: 3,
                tokens_owed1: 4,
            })
        }
        async fn is_nullifier_spent(&self, _: &FieldHash) -> Result<bool, ClientError> {
            Ok(false)
        }
        async fn submit(&self, _: Vec<ContractCall>) -> Result<Felt, ClientError> {
            Err(ClientError::Submission("read-only".to_string()))
        }
    }

    fn ledger() -> Arc<NoteLedger> {
        Arc::new(NoteLedger::new(Arc::new(MemoryNoteStore::default())))
    }

    #[tokio::test]
    async fn shield_note_takes_indexed_amount() {
        let ledger = ledger();
        let note = ShieldedNote::generate(Felt::ONE, 0, NoteKind::Swap).expect("note");
        let fingerprint = note.fingerprint();
        let expected = note.commitment_for(4_200).expect("commitment");
        ledger.save_note(note).await.expect("save");

        let indexer = Arc::new(ScriptedIndexer::default());
        indexer.indexed(fingerprint, 4_200, expected);
        let poller = IndexingPoller::new(indexer, ledger.clone(), Duration::from_secs(1));
        let report = poller.poll_once().await.expect("poll");

        assert_eq!(report.promoted, vec![fingerprint]);
        let stored = ledger.get(&fingerprint).await.expect("get").expect("note");
        assert!(stored.is_ready());
        assert_eq!(stored.amount, 4_200);
        assert_eq!(stored.commitment, expected);
        assert_eq!(stored.index, Some(7));
    }

    #[tokio::test]
    async fn unindexed_notes_stay_pending() {
        let ledger = ledger();
        let note = ShieldedNote::generate(Felt::ONE, 10, NoteKind::Swap).expect("note");
        let fingerprint = note.fingerprint();
        ledger.save_note(note).await.expect("save");

        let poller = IndexingPoller::new(
            Arc::new(ScriptedIndexer::default()),
            ledger.clone(),
            Duration::from_secs(1),
        );
        let report = poller.poll_once().await.expect("poll");
        assert_eq!(report.still_pending, vec![fingerprint]);
        assert_eq!(ledger.pending_notes().await.expect("pending").len(), 1);
    }

    #[tokio::test]
    async fn private_output_keeps_its_amount_on_zero_report() {
        let ledger = ledger();
        let note = ShieldedNote::generate(Felt::TWO, 55, NoteKind::Swap).expect("note");
        let fingerprint = note.fingerprint();
        let commitment = note.commitment;
        ledger.save_note(note).await.expect("save");

        let indexer = Arc::new(ScriptedIndexer::default());
        indexer.indexed(fingerprint, 0, commitment);
        let poller = IndexingPoller::new(indexer, ledger.clone(), Duration::from_secs(1));
        poller.poll_once().await.expect("poll");

        let stored = ledger.get(&fingerprint).await.expect("get").expect("note");
        assert_eq!(stored.amount, 55);
        assert_eq!(stored.commitment, commitment);
    }

    #[tokio::test]
    async fn indexer_errors_are_reported_not_applied() {
        let ledger = ledger();
        let note = ShieldedNote::generate(Felt::ONE, 10, NoteKind::Swap).expect("note");
        let fingerprint = note.fingerprint();
        ledger.save_note(note).await.expect("save");

        let indexer = Arc::new(ScriptedIndexer::default());
        indexer
            .paths
            .lock()
            .expect("lock")
            .insert(fingerprint, Err("503".to_string()));
        let poller = IndexingPoller::new(indexer, ledger.clone(), Duration::from_secs(1));
        let report = poller.poll_once().await.expect("poll");
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0].1, ClientError::Poll(_)));
        assert_eq!(ledger.pending_notes().await.expect("pending").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_indexer_times_out() {
        let ledger = ledger();
        let note = ShieldedNote::generate(Felt::ONE, 10, NoteKind::Swap).expect("note");
        ledger.save_note(note).await.expect("save");

        let indexer = Arc::new(ScriptedIndexer {
            stall: true,
            ..ScriptedIndexer::default()
        });
        let poller = IndexingPoller::new(indexer, ledger, Duration::from_secs(2));
        let report = poller.poll_once().await.expect("poll");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].1.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn aggregates_split_ready_pending_and_fees() {
        let ledger = ledger();
        let mut ready = ShieldedNote::generate(Felt::ONE, 100, NoteKind::Swap).expect("note");
        ready.status = NoteStatus::Ready;
        let mut spent = ShieldedNote::generate(Felt::ONE, 900, NoteKind::Swap).expect("note");
        spent.status = NoteStatus::Ready;
        let spent_fp = spent.fingerprint();
        let spent_nh = spent.nullifier_hash().expect("nh");
        let pending = ShieldedNote::generate(Felt::ONE, 5, NoteKind::Swap).expect("note");
        let mut lp = ShieldedNote::generate(
            Felt::TWO,
            50,
            NoteKind::Lp {
                tick_lower: -60,
                tick_upper: 60,
            },
        )
        .expect("note");
        lp.status = NoteStatus::Ready;
        for note in [ready, spent, pending, lp] {
            ledger.save_note(note).await.expect("save");
        }
        ledger
            .record_spend(&spent_fp, spent_nh, None)
            .await
            .expect("spend");

        let recompute = AggregateRecompute::new(Arc::new(FeeChain), ledger);
        let mut rx = recompute.subscribe();
        let aggregates = recompute.recompute().await.expect("recompute");

        let token = &aggregates.tokens[&Felt::ONE];
        assert_eq!(token.withdrawable, 100);
        assert_eq!(token.pending_notes, 1);
        assert_eq!(aggregates.fees_owed0, 3);
        assert_eq!(aggregates.fees_owed1, 4);
        assert!(rx.has_changed().expect("watch"));
        assert_eq!(*rx.borrow_and_update(), aggregates);
    }
}
