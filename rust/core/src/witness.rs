//! Witness inputs for each circuit. Field names match the circuit signals;
//! Merkle paths are padded to the fixed tree depth.

use starknet::core::types::U256;
use zylith_prover::{WitnessInputs, WitnessValue};

use crate::commitment::FieldHash;
use crate::error::ClientError;
use crate::indexer::MerklePath;
use crate::math::{SwapChecks, SwapStep};
use crate::notes::ShieldedNote;
use crate::utils::{felt_to_decimal, i32_to_felt_decimal, u256_to_biguint, Address};

/// The note being consumed together with its tree membership.
pub struct SpentNote<'a> {
    pub note: &'a ShieldedNote,
    pub path: &'a MerklePath,
    pub nullifier_hash: FieldHash,
}

fn field(value: &FieldHash) -> WitnessValue {
    WitnessValue::Bytes32(*value.as_bytes())
}

fn u256(value: U256) -> WitnessValue {
    WitnessValue::Scalar(u256_to_biguint(value).to_str_radix(10))
}

fn address(value: &Address) -> WitnessValue {
    WitnessValue::Scalar(felt_to_decimal(value))
}

fn tick(value: i32) -> WitnessValue {
    WitnessValue::Scalar(i32_to_felt_decimal(value))
}

fn spend_inputs(spent: &SpentNote<'_>) -> Result<WitnessInputs, ClientError> {
    let mut inputs = WitnessInputs::new();
    inputs
        .insert("secret", WitnessValue::Bytes32(spent.note.secret))
        .insert("nullifier", WitnessValue::Bytes32(spent.note.nullifier))
        .insert("balance", WitnessValue::U128(spent.note.amount))
        .insert("root", field(&spent.path.root))
        .insert("nullifier_hash", field(&spent.nullifier_hash));
    inputs.insert_merkle_path(&spent.path.path_bytes(), &spent.path.indices)?;
    Ok(inputs)
}

pub struct SwapWitness<'a> {
    pub amount_in: u128,
    pub output: &'a ShieldedNote,
    pub step: &'a SwapStep,
    pub checks: SwapChecks,
    pub sqrt_price: U256,
    pub liquidity: u128,
    pub zero_for_one: bool,
}

pub fn swap_inputs(
    spent: &SpentNote<'_>,
    swap: &SwapWitness<'_>,
) -> Result<WitnessInputs, ClientError> {
    let mut inputs = spend_inputs(spent)?;
    let out_sqrt_next = u256_to_biguint(swap.step.sqrt_price_next) * swap.step.amount_out;
    inputs
        .insert("amount_in", WitnessValue::U128(swap.amount_in))
        .insert("amount_out", WitnessValue::U128(swap.step.amount_out))
        .insert("min_amount_out", WitnessValue::U128(0))
        .insert("out_secret", WitnessValue::Bytes32(swap.output.secret))
        .insert("out_nullifier", WitnessValue::Bytes32(swap.output.nullifier))
        .insert("change_commitment", field(&swap.output.commitment))
        .insert("sqrt_price", u256(swap.sqrt_price))
        .insert("liquidity", WitnessValue::U128(swap.liquidity))
        .insert("zero_for_one", WitnessValue::Bool(swap.zero_for_one))
        .insert("sqrt_next_v", u256(swap.step.sqrt_price_next))
        .insert(
            "out_sqrt_next_v",
            WitnessValue::Scalar(out_sqrt_next.to_str_radix(10)),
        )
        .insert(
            "check0_v",
            WitnessValue::Bool(swap.checks.price_delta_covers_output),
        )
        .insert("check1_v", WitnessValue::Bool(swap.checks.input_covers_output));
    Ok(inputs)
}

pub struct LiquidityWitness<'a> {
    pub amount_in: u128,
    pub output: &'a ShieldedNote,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub sqrt_price: U256,
    pub sqrt_lower: U256,
    pub sqrt_upper: U256,
}

pub fn liquidity_inputs(
    spent: &SpentNote<'_>,
    lp: &LiquidityWitness<'_>,
) -> Result<WitnessInputs, ClientError> {
    let mut inputs = spend_inputs(spent)?;
    inputs
        .insert("amount_in", WitnessValue::U128(lp.amount_in))
        .insert("out_secret", WitnessValue::Bytes32(lp.output.secret))
        .insert("out_nullifier", WitnessValue::Bytes32(lp.output.nullifier))
        .insert("tick_lower", tick(lp.tick_lower))
        .insert("tick_upper", tick(lp.tick_upper))
        .insert("change_commitment", field(&lp.output.commitment))
        .insert("sqrt_price", u256(lp.sqrt_price))
        .insert("sqrt_lower", u256(lp.sqrt_lower))
        .insert("sqrt_upper", u256(lp.sqrt_upper));
    Ok(inputs)
}

/// Full withdrawal: the whole balance leaves, no change note.
pub fn withdraw_inputs(
    spent: &SpentNote<'_>,
    recipient: Address,
) -> Result<WitnessInputs, ClientError> {
    let mut inputs = spend_inputs(spent)?;
    inputs
        .insert("amount", WitnessValue::U128(spent.note.amount))
        .insert("token", address(&spent.note.token))
        .insert("recipient", address(&recipient))
        .insert("change_commitment", field(&FieldHash::ZERO));
    Ok(inputs)
}

/// Proves ownership of an LP note for fee collection or removal.
pub fn lp_ownership_inputs(
    spent: &SpentNote<'_>,
    new_commitment: &FieldHash,
    recipient: Address,
) -> Result<WitnessInputs, ClientError> {
    let (tick_lower, tick_upper) = spent
        .note
        .ticks()
        .ok_or_else(|| ClientError::Validation("note is not a liquidity note".to_string()))?;
    let mut inputs = spend_inputs(spent)?;
    inputs
        .insert("note_hash", field(&spent.note.note_hash))
        .insert("tick_lower", tick(tick_lower))
        .insert("tick_upper", tick(tick_upper))
        .insert("new_commitment", field(new_commitment))
        .insert("recipient", address(&recipient));
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{q96, swap_checks, swap_step};
    use crate::notes::NoteKind;
    use crate::utils::biguint_to_u256;
    use serde_json::Value;
    use starknet::core::types::Felt;
    use zylith_prover::MERKLE_DEPTH;

    fn path(len: usize) -> MerklePath {
        MerklePath {
            root: FieldHash::from_u128(99),
            path: (0..len as u128).map(FieldHash::from_u128).collect(),
            indices: (0..len).map(|i| i % 2 == 1).collect(),
            index: 3,
            amount: 0,
            commitment: FieldHash::from_u128(1),
        }
    }

    fn as_str(json: &Value, key: &str) -> String {
        json[key].as_str().expect("string").to_string()
    }

    #[test]
    fn swap_inputs_carry_all_circuit_signals() {
        let note = ShieldedNote::generate(Felt::ONE, 1_000_000, NoteKind::Swap).expect("note");
        let price = biguint_to_u256(&q96()).expect("q96");
        let step = swap_step(1_000_000, price, 10u128.pow(12), true).expect("step");
        let checks = swap_checks(&step, price, 10u128.pow(12));
        let output =
            ShieldedNote::generate(Felt::TWO, step.amount_out, NoteKind::Swap).expect("note");
        let path = path(3);
        let spent = SpentNote {
            note: &note,
            path: &path,
            nullifier_hash: note.nullifier_hash().expect("nh"),
        };
        let inputs = swap_inputs(
            &spent,
            &SwapWitness {
                amount_in: 1_000_000,
                output: &output,
                step: &step,
                checks,
                sqrt_price: price,
                liquidity: 10u128.pow(12),
                zero_for_one: true,
            },
        )
        .expect("inputs");
        let json = inputs.to_json();
        for key in [
            "secret",
            "nullifier",
            "balance",
            "amount_in",
            "path_elements",
            "path_indices",
            "root",
            "nullifier_hash",
            "amount_out",
            "min_amount_out",
            "out_secret",
            "out_nullifier",
            "change_commitment",
            "sqrt_price",
            "liquidity",
            "zero_for_one",
            "sqrt_next_v",
            "out_sqrt_next_v",
            "check0_v",
            "check1_v",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(inputs.len(), 20);
        assert_eq!(json["path_elements"].as_array().expect("array").len(), MERKLE_DEPTH);
        assert_eq!(as_str(&json, "zero_for_one"), "1");
        assert_eq!(as_str(&json, "check0_v"), "1");
        assert_eq!(as_str(&json, "change_commitment"), output.commitment.to_decimal());
        assert_eq!(as_str(&json, "sqrt_price"), q96().to_str_radix(10));
    }

    #[test]
    fn liquidity_inputs_encode_negative_ticks_as_stark_felts() {
        let note = ShieldedNote::generate(Felt::ONE, 500, NoteKind::Swap).expect("note");
        let output = ShieldedNote::generate(
            Felt::ONE,
            500,
            NoteKind::Lp {
                tick_lower: -600,
                tick_upper: 600,
            },
        )
        .expect("note");
        let path = path(0);
        let spent = SpentNote {
            note: &note,
            path: &path,
            nullifier_hash: FieldHash::from_u128(4),
        };
        let inputs = liquidity_inputs(
            &spent,
            &LiquidityWitness {
                amount_in: 500,
                output: &output,
                tick_lower: -600,
                tick_upper: 600,
                sqrt_price: U256::from(1u8),
                sqrt_lower: U256::from(1u8),
                sqrt_upper: U256::from(2u8),
            },
        )
        .expect("inputs");
        let json = inputs.to_json();
        assert_eq!(as_str(&json, "tick_lower"), i32_to_felt_decimal(-600));
        assert_eq!(as_str(&json, "tick_upper"), "600");
        assert_eq!(as_str(&json, "amount_in"), "500");
    }

    #[test]
    fn withdraw_inputs_spend_the_full_balance() {
        let note = ShieldedNote::generate(Felt::from(0xabu8), 321, NoteKind::Swap).expect("note");
        let path = path(2);
        let spent = SpentNote {
            note: &note,
            path: &path,
            nullifier_hash: FieldHash::from_u128(4),
        };
        let json = withdraw_inputs(&spent, Felt::from(7u8))
            .expect("inputs")
            .to_json();
        assert_eq!(as_str(&json, "amount"), "321");
        assert_eq!(as_str(&json, "balance"), "321");
        assert_eq!(as_str(&json, "token"), "171");
        assert_eq!(as_str(&json, "recipient"), "7");
        assert_eq!(as_str(&json, "change_commitment"), "0");
    }

    #[test]
    fn ownership_inputs_reject_swap_notes() {
        let note = ShieldedNote::generate(Felt::ONE, 1, NoteKind::Swap).expect("note");
        let path = path(1);
        let spent = SpentNote {
            note: &note,
            path: &path,
            nullifier_hash: FieldHash::from_u128(4),
        };
        let err = lp_ownership_inputs(&spent, &note.commitment, Felt::ONE).expect_err("swap");
        assert!(matches!(err, ClientError::Validation(_)));
    }
}
