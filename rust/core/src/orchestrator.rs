//! Action orchestration: validate, pick the private or shield path, prove,
//! submit one atomic multi-call, then reconcile the ledger.
//!
//! The ledger is only written after a submission succeeds. The one exception
//! is the stale-note correction, which records what the chain already says.

use std::sync::Arc;

use starknet::core::types::{Felt, U256};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use zylith_prover::{CircuitId, ProofGateway, ProofOutput, WitnessInputs};

use crate::calldata::{self, SpendProofRef};
use crate::chain::{ChainGateway, ContractCall, PoolState, Reserves};
use crate::commitment::FieldHash;
use crate::error::ClientError;
use crate::indexer::{Indexer, MerklePath};
use crate::ledger::NoteLedger;
use crate::math::{
    co_required_amount, pool_range, shield_liquidity, sqrt_price_at_tick, swap_checks, swap_step,
    with_approval_buffer, Direction, RangePosition,
};
use crate::notes::{NoteKind, ShieldedNote};
use crate::utils::Address;
use crate::witness::{
    liquidity_inputs, lp_ownership_inputs, swap_inputs, withdraw_inputs, LiquidityWitness,
    SpentNote, SwapWitness,
};

/// Addresses an orchestrator acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolContext {
    pub pool: Address,
    pub token0: Address,
    pub token1: Address,
    /// Receives public withdrawals and collected fees.
    pub recipient: Address,
}

impl PoolContext {
    pub fn token_in(&self, direction: Direction) -> Address {
        match direction {
            Direction::ZeroToOne => self.token0,
            Direction::OneToZero => self.token1,
        }
    }

    pub fn token_out(&self, direction: Direction) -> Address {
        match direction {
            Direction::ZeroToOne => self.token1,
            Direction::OneToZero => self.token0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionIntent {
    Swap {
        direction: Direction,
        amount: u128,
    },
    AddLiquidity {
        direction: Direction,
        amount: u128,
        tick_lower: i32,
        tick_upper: i32,
    },
}

impl ActionIntent {
    pub fn amount(&self) -> u128 {
        match self {
            ActionIntent::Swap { amount, .. } | ActionIntent::AddLiquidity { amount, .. } => {
                *amount
            }
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            ActionIntent::Swap { direction, .. }
            | ActionIntent::AddLiquidity { direction, .. } => *direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Idle,
    Validating,
    PrivatePath,
    ShieldPath,
    ProofPending,
    Submitting,
    Settled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Spent an existing ready note.
    Private,
    /// Pulled public tokens into a new note.
    Shield,
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub path: ExecutionPath,
    pub tx_hash: Felt,
    pub calls: Vec<ContractCall>,
    /// Fingerprint of the note created by the action, if any.
    pub output_note: Option<FieldHash>,
    pub quoted_amount: Option<u128>,
}

/// Local estimate for an intent against the current pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub state: PoolState,
    /// Swap output, or liquidity minted for a deposit.
    pub amount_out: u128,
    /// Other-token amount an in-range deposit needs, before the approval buffer.
    pub co_required: u128,
}

/// Pool price, in-range liquidity and token balances as read from chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOverview {
    pub state: PoolState,
    pub reserves: Reserves,
}

pub struct ActionOrchestrator {
    chain: Arc<dyn ChainGateway>,
    indexer: Arc<dyn Indexer>,
    prover: Arc<dyn ProofGateway>,
    ledger: Arc<NoteLedger>,
    pool: PoolContext,
    phase: watch::Sender<ActionPhase>,
    in_flight: Mutex<()>,
}

impl ActionOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainGateway>,
        indexer: Arc<dyn Indexer>,
        prover: Arc<dyn ProofGateway>,
        ledger: Arc<NoteLedger>,
        pool: PoolContext,
    ) -> Self {
        let (phase, _) = watch::channel(ActionPhase::Idle);
        Self {
            chain,
            indexer,
            prover,
            ledger,
            pool,
            phase,
            in_flight: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ActionPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> ActionPhase {
        *self.phase.borrow()
    }

    pub fn ledger(&self) -> &Arc<NoteLedger> {
        &self.ledger
    }

    pub fn pool(&self) -> &PoolContext {
        &self.pool
    }

    fn set_phase(&self, phase: ActionPhase) {
        debug!(?phase, "action phase");
        self.phase.send_replace(phase);
    }

    /// Runs `body` as the single in-flight action, publishing the terminal phase.
    async fn exclusive<T, F>(&self, body: F) -> Result<T, ClientError>
    where
        F: std::future::Future<Output = Result<T, ClientError>>,
    {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ClientError::ActionInFlight)?;
        self.set_phase(ActionPhase::Validating);
        let result = body.await;
        match &result {
            Ok(_) => self.set_phase(ActionPhase::Settled),
            Err(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "action failed");
                self.set_phase(ActionPhase::Failed);
            }
        }
        result
    }

    pub async fn quote(&self, intent: &ActionIntent) -> Result<Quote, ClientError> {
        let state = self.chain.get_state().await?;
        validate_intent(intent, &state)?;
        quote_against(intent, &state)
    }

    pub async fn pool_overview(&self) -> Result<PoolOverview, ClientError> {
        let state = self.chain.get_state().await?;
        let reserves = self.chain.get_reserves().await?;
        Ok(PoolOverview { state, reserves })
    }

    pub async fn execute(&self, intent: ActionIntent) -> Result<ActionOutcome, ClientError> {
        self.exclusive(self.run_intent(intent)).await
    }

    async fn run_intent(&self, intent: ActionIntent) -> Result<ActionOutcome, ClientError> {
        let state = self.chain.get_state().await?;
        validate_intent(&intent, &state)?;
        let token_in = self.pool.token_in(intent.direction());
        match self.ledger.find_spendable(token_in, intent.amount()).await? {
            Some(note) => self.private_path(intent, state, note).await,
            None => self.shield_path(intent, state).await,
        }
    }

    async fn private_path(
        &self,
        intent: ActionIntent,
        state: PoolState,
        note: ShieldedNote,
    ) -> Result<ActionOutcome, ClientError> {
        self.set_phase(ActionPhase::PrivatePath);
        let fingerprint = note.fingerprint();
        info!(%fingerprint, "spending ready note");
        let path = self.indexed_path(&note).await?;
        let nullifier_hash = self.ensure_unspent_onchain(&note).await?;
        let spent = SpentNote {
            note: &note,
            path: &path,
            nullifier_hash,
        };

        let direction = intent.direction();
        let token_in = self.pool.token_in(direction);
        let (output, circuit, inputs) = match intent {
            ActionIntent::Swap { amount, .. } => {
                let step = swap_step(
                    amount,
                    state.sqrt_price,
                    state.liquidity,
                    direction.zero_for_one(),
                )?;
                if step.amount_out == 0 {
                    return Err(ClientError::Validation("swap output is zero".to_string()));
                }
                let checks = swap_checks(&step, state.sqrt_price, state.liquidity);
                let output = ShieldedNote::generate(
                    self.pool.token_out(direction),
                    step.amount_out,
                    NoteKind::Swap,
                )?;
                let inputs = swap_inputs(
                    &spent,
                    &SwapWitness {
                        amount_in: amount,
                        output: &output,
                        step: &step,
                        checks,
                        sqrt_price: state.sqrt_price,
                        liquidity: state.liquidity,
                        zero_for_one: direction.zero_for_one(),
                    },
                )?;
                (output, CircuitId::Swap, inputs)
            }
            ActionIntent::AddLiquidity {
                amount,
                tick_lower,
                tick_upper,
                ..
            } => {
                let output = ShieldedNote::generate(
                    token_in,
                    amount,
                    NoteKind::Lp {
                        tick_lower,
                        tick_upper,
                    },
                )?;
                let inputs = liquidity_inputs(
                    &spent,
                    &LiquidityWitness {
                        amount_in: amount,
                        output: &output,
                        tick_lower,
                        tick_upper,
                        sqrt_price: state.sqrt_price,
                        sqrt_lower: sqrt_price_at_tick(tick_lower)?,
                        sqrt_upper: sqrt_price_at_tick(tick_upper)?,
                    },
                )?;
                (output, CircuitId::Liquidity, inputs)
            }
        };

        let proof = self.prove(circuit, inputs).await?;
        let spend = SpendProofRef {
            proof: &proof.calldata,
            root: path.root,
        };
        let principal = match intent {
            ActionIntent::Swap { amount, .. } => calldata::private_swap(
                self.pool.pool,
                &spend,
                &nullifier_hash,
                amount,
                &output.commitment,
                direction.zero_for_one(),
            )?,
            ActionIntent::AddLiquidity {
                amount,
                tick_lower,
                tick_upper,
                ..
            } => calldata::mint_liquidity(
                self.pool.pool,
                &spend,
                &nullifier_hash,
                amount,
                tick_lower,
                tick_upper,
                &output.commitment,
            )?,
        };
        let calls = vec![
            calldata::approve(token_in, self.pool.pool, intent.amount()),
            calldata::add_root_with_path(self.pool.pool, &note.commitment, &path),
            principal,
        ];
        let tx_hash = self.submit(&calls).await?;

        let output_fingerprint = output.fingerprint();
        self.ledger
            .record_spend(&fingerprint, nullifier_hash, Some(output))
            .await?;
        info!(spent = %fingerprint, output = %output_fingerprint, "private action settled");
        Ok(ActionOutcome {
            path: ExecutionPath::Private,
            tx_hash,
            calls,
            output_note: Some(output_fingerprint),
            quoted_amount: None,
        })
    }

    async fn shield_path(
        &self,
        intent: ActionIntent,
        state: PoolState,
    ) -> Result<ActionOutcome, ClientError> {
        self.set_phase(ActionPhase::ShieldPath);
        let direction = intent.direction();
        let token_in = self.pool.token_in(direction);
        let amount = intent.amount();
        let estimate = quote_against(&intent, &state)?;

        let mut calls = vec![calldata::approve(token_in, self.pool.pool, amount)];
        let mut output = match intent {
            ActionIntent::Swap { .. } => {
                let output =
                    ShieldedNote::generate(self.pool.token_out(direction), 0, NoteKind::Swap)?;
                calls.push(calldata::swap_public_to_private(
                    self.pool.pool,
                    token_in,
                    amount,
                    &output.note_hash,
                    direction.zero_for_one(),
                ));
                output
            }
            ActionIntent::AddLiquidity {
                tick_lower,
                tick_upper,
                ..
            } => {
                let output = ShieldedNote::generate(
                    token_in,
                    0,
                    NoteKind::Lp {
                        tick_lower,
                        tick_upper,
                    },
                )?;
                let co_approval = with_approval_buffer(estimate.co_required)?;
                if co_approval > 0 {
                    calls.push(calldata::approve(
                        self.pool.token_out(direction),
                        self.pool.pool,
                        co_approval,
                    ));
                }
                calls.push(calldata::mint_liquidity_public_to_private(
                    self.pool.pool,
                    token_in,
                    amount,
                    tick_lower,
                    tick_upper,
                    &output.note_hash,
                ));
                output
            }
        };

        let tx_hash = self.submit(&calls).await?;

        output.quoted_amount = Some(estimate.amount_out);
        let fingerprint = output.fingerprint();
        self.ledger.save_note(output).await?;
        info!(%fingerprint, quoted = estimate.amount_out, "shielded note pending");
        Ok(ActionOutcome {
            path: ExecutionPath::Shield,
            tx_hash,
            calls,
            output_note: Some(fingerprint),
            quoted_amount: Some(estimate.amount_out),
        })
    }

    /// Full withdrawal of a ready swap note to the configured recipient.
    pub async fn withdraw(&self, fingerprint: &FieldHash) -> Result<ActionOutcome, ClientError> {
        self.exclusive(self.run_withdraw(fingerprint)).await
    }

    async fn run_withdraw(&self, fingerprint: &FieldHash) -> Result<ActionOutcome, ClientError> {
        let note = self.live_note(fingerprint).await?;
        if note.ticks().is_some() {
            return Err(ClientError::Validation(
                "liquidity notes are removed, not withdrawn".to_string(),
            ));
        }
        let path = self.indexed_path(&note).await?;
        let nullifier_hash = self.ensure_unspent_onchain(&note).await?;
        let spent = SpentNote {
            note: &note,
            path: &path,
            nullifier_hash,
        };
        let inputs = withdraw_inputs(&spent, self.pool.recipient)?;
        let proof = self.prove(CircuitId::Withdraw, inputs).await?;
        let spend = SpendProofRef {
            proof: &proof.calldata,
            root: path.root,
        };
        let calls = vec![
            calldata::add_root_with_path(self.pool.pool, &note.commitment, &path),
            calldata::withdraw_public(
                self.pool.pool,
                &spend,
                &nullifier_hash,
                note.amount,
                note.token,
                self.pool.recipient,
            )?,
        ];
        let tx_hash = self.submit(&calls).await?;
        self.ledger
            .record_spend(fingerprint, nullifier_hash, None)
            .await?;
        info!(%fingerprint, amount = note.amount, "note withdrawn");
        Ok(ActionOutcome {
            path: ExecutionPath::Private,
            tx_hash,
            calls,
            output_note: None,
            quoted_amount: None,
        })
    }

    /// Claims accrued fees; the LP note stays live under the same commitment.
    pub async fn collect_fees(&self, fingerprint: &FieldHash) -> Result<ActionOutcome, ClientError> {
        self.exclusive(self.run_ownership(fingerprint, OwnershipAction::CollectFees))
            .await
    }

    /// Removes the whole position and consumes the LP note.
    pub async fn remove_liquidity(
        &self,
        fingerprint: &FieldHash,
    ) -> Result<ActionOutcome, ClientError> {
        self.exclusive(self.run_ownership(fingerprint, OwnershipAction::Remove))
            .await
    }

    async fn run_ownership(
        &self,
        fingerprint: &FieldHash,
        action: OwnershipAction,
    ) -> Result<ActionOutcome, ClientError> {
        let note = self.live_note(fingerprint).await?;
        let (tick_lower, tick_upper) = note
            .ticks()
            .ok_or_else(|| ClientError::Validation("note is not a liquidity note".to_string()))?;
        let path = self.indexed_path(&note).await?;
        let nullifier_hash = self.ensure_unspent_onchain(&note).await?;
        let new_commitment = match action {
            OwnershipAction::CollectFees => note.commitment_for(note.amount)?,
            OwnershipAction::Remove => FieldHash::ZERO,
        };
        let spent = SpentNote {
            note: &note,
            path: &path,
            nullifier_hash,
        };
        let inputs = lp_ownership_inputs(&spent, &new_commitment, self.pool.recipient)?;
        let proof = self.prove(CircuitId::LiquidityOwnership, inputs).await?;
        let spend = SpendProofRef {
            proof: &proof.calldata,
            root: path.root,
        };
        let principal = match action {
            OwnershipAction::CollectFees => calldata::collect_fees_public(
                self.pool.pool,
                &spend,
                &note.note_hash,
                tick_lower,
                tick_upper,
                self.pool.recipient,
                &new_commitment,
            )?,
            OwnershipAction::Remove => calldata::remove_liquidity_public(
                self.pool.pool,
                &spend,
                &note.note_hash,
                tick_lower,
                tick_upper,
                self.pool.recipient,
            )?,
        };
        let calls = vec![
            calldata::add_root_with_path(self.pool.pool, &note.commitment, &path),
            principal,
        ];
        let tx_hash = self.submit(&calls).await?;
        if action == OwnershipAction::Remove {
            self.ledger
                .record_spend(fingerprint, nullifier_hash, None)
                .await?;
            info!(%fingerprint, "liquidity removed");
        } else {
            info!(%fingerprint, "fees collected");
        }
        Ok(ActionOutcome {
            path: ExecutionPath::Private,
            tx_hash,
            calls,
            output_note: None,
            quoted_amount: None,
        })
    }

    /// A note that exists locally, is not recorded spent, and is indexed.
    async fn live_note(&self, fingerprint: &FieldHash) -> Result<ShieldedNote, ClientError> {
        let note = self
            .ledger
            .get(fingerprint)
            .await?
            .ok_or_else(|| ClientError::StaleState(format!("note {fingerprint} not found")))?;
        let nullifier_hash = note.nullifier_hash()?;
        if self.ledger.is_spent(&nullifier_hash).await? {
            self.ledger.correct_stale(fingerprint, nullifier_hash).await?;
            return Err(ClientError::StaleState(format!(
                "note {fingerprint} already spent"
            )));
        }
        if !note.is_ready() {
            return Err(ClientError::IndexingNotReady(format!(
                "note {fingerprint} is still pending"
            )));
        }
        Ok(note)
    }

    async fn indexed_path(&self, note: &ShieldedNote) -> Result<MerklePath, ClientError> {
        let path = self
            .indexer
            .get_path(&note.commitment, &note.note_hash)
            .await?;
        if !path.is_indexed() {
            return Err(ClientError::IndexingNotReady(format!(
                "no merkle path for {}",
                note.fingerprint()
            )));
        }
        if path.computed_root(&note.commitment)? != path.root {
            return Err(ClientError::IndexingNotReady(format!(
                "merkle path for {} does not reach root {}",
                note.fingerprint(),
                path.root
            )));
        }
        Ok(path)
    }

    /// Re-checks the chain before spending. A nullifier the chain already
    /// knows is reconciled into the ledger and reported as stale.
    async fn ensure_unspent_onchain(&self, note: &ShieldedNote) -> Result<FieldHash, ClientError> {
        let nullifier_hash = note.nullifier_hash()?;
        if self.chain.is_nullifier_spent(&nullifier_hash).await? {
            self.ledger
                .correct_stale(&note.fingerprint(), nullifier_hash)
                .await?;
            return Err(ClientError::StaleState(format!(
                "note {} already spent on-chain",
                note.fingerprint()
            )));
        }
        Ok(nullifier_hash)
    }

    async fn prove(
        &self,
        circuit: CircuitId,
        inputs: WitnessInputs,
    ) -> Result<ProofOutput, ClientError> {
        self.set_phase(ActionPhase::ProofPending);
        Ok(self.prover.prove(circuit, inputs).await?)
    }

    async fn submit(&self, calls: &[ContractCall]) -> Result<Felt, ClientError> {
        self.set_phase(ActionPhase::Submitting);
        self.chain.submit(calls.to_vec()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnershipAction {
    CollectFees,
    Remove,
}

fn validate_intent(intent: &ActionIntent, state: &PoolState) -> Result<(), ClientError> {
    if intent.amount() == 0 {
        return Err(ClientError::Validation("amount must be positive".to_string()));
    }
    match intent {
        ActionIntent::Swap { .. } => {
            if state.liquidity == 0 || state.sqrt_price == U256::from(0u8) {
                return Err(ClientError::Validation("insufficient liquidity".to_string()));
            }
        }
        ActionIntent::AddLiquidity {
            direction,
            tick_lower,
            tick_upper,
            ..
        } => match (pool_range(state.sqrt_price, *tick_lower, *tick_upper)?, direction) {
            (RangePosition::PriceBelow, Direction::OneToZero) => {
                return Err(ClientError::Validation(
                    "range above the price accepts only token0".to_string(),
                ))
            }
            (RangePosition::PriceAbove, Direction::ZeroToOne) => {
                return Err(ClientError::Validation(
                    "range below the price accepts only token1".to_string(),
                ))
            }
            _ => {}
        },
    }
    Ok(())
}

fn quote_against(intent: &ActionIntent, state: &PoolState) -> Result<Quote, ClientError> {
    match *intent {
        ActionIntent::Swap { direction, amount } => {
            let step = swap_step(
                amount,
                state.sqrt_price,
                state.liquidity,
                direction.zero_for_one(),
            )?;
            Ok(Quote {
                state: *state,
                amount_out: step.amount_out,
                co_required: 0,
            })
        }
        ActionIntent::AddLiquidity {
            direction,
            amount,
            tick_lower,
            tick_upper,
        } => Ok(Quote {
            state: *state,
            amount_out: shield_liquidity(state.sqrt_price, tick_lower, tick_upper, amount, direction)?,
            co_required: co_required_amount(
                state.sqrt_price,
                tick_lower,
                tick_upper,
                amount,
                direction,
            )?,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::q96;
    use crate::utils::biguint_to_u256;

    fn state(liquidity: u128) -> PoolState {
        PoolState {
            sqrt_price: biguint_to_u256(&q96()).expect("q96"),
            tick: 0,
            liquidity,
        }
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let intent = ActionIntent::Swap {
            direction: Direction::ZeroToOne,
            amount: 0,
        };
        assert!(matches!(
            validate_intent(&intent, &state(1_000)),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn empty_pool_rejects_swaps() {
        let intent = ActionIntent::Swap {
            direction: Direction::OneToZero,
            amount: 10,
        };
        let err = validate_intent(&intent, &state(0)).expect_err("reject");
        assert!(err.to_string().contains("insufficient liquidity"));
    }

    #[test]
    fn single_sided_deposits_must_match_range_side() {
        let above = ActionIntent::AddLiquidity {
            direction: Direction::OneToZero,
            amount: 10,
            tick_lower: 600,
            tick_upper: 1200,
        };
        assert!(validate_intent(&above, &state(1)).is_err());
        let above_token0 = ActionIntent::AddLiquidity {
            direction: Direction::ZeroToOne,
            amount: 10,
            tick_lower: 600,
            tick_upper: 1200,
        };
        assert!(validate_intent(&above_token0, &state(1)).is_ok());
        let below = ActionIntent::AddLiquidity {
            direction: Direction::ZeroToOne,
            amount: 10,
            tick_lower: -1200,
            tick_upper: -600,
        };
        assert!(validate_intent(&below, &state(1)).is_err());
    }

    #[test]
    fn inverted_ticks_are_rejected() {
        let intent = ActionIntent::AddLiquidity {
            direction: Direction::ZeroToOne,
            amount: 10,
            tick_lower: 600,
            tick_upper: -600,
        };
        assert!(matches!(
            validate_intent(&intent, &state(1)),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn in_range_quote_needs_the_other_token() {
        let intent = ActionIntent::AddLiquidity {
            direction: Direction::ZeroToOne,
            amount: 1_000_000,
            tick_lower: -600,
            tick_upper: 600,
        };
        let quote = quote_against(&intent, &state(1)).expect("quote");
        assert!(quote.amount_out > 0);
        assert!(quote.co_required > 0);
    }
}
