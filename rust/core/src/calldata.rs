//! Calldata layouts for the pool and token entrypoints.
//!
//! u256 values are `(low, high)` felt pairs, signed ticks are felts modulo the
//! Stark prime, and proofs are length-prefixed garaga calldata.

use starknet::core::types::{Felt, U256};
use zylith_prover::ProofCalldata;

use crate::chain::{ContractCall, Entrypoint};
use crate::commitment::FieldHash;
use crate::error::ClientError;
use crate::indexer::MerklePath;
use crate::utils::{i32_to_felt, u256_to_felts, Address};

/// Pool-side inputs shared by every proof-carrying call.
#[derive(Debug, Clone, Copy)]
pub struct SpendProofRef<'a> {
    pub proof: &'a ProofCalldata,
    pub root: FieldHash,
}

fn u128_as_u256(value: u128) -> [Felt; 2] {
    u256_to_felts(U256::from_words(value, 0))
}

fn bool_felt(value: bool) -> Felt {
    if value {
        Felt::ONE
    } else {
        Felt::ZERO
    }
}

fn proof_prefix(spend: &SpendProofRef<'_>) -> Result<Vec<Felt>, ClientError> {
    let mut calldata = spend.proof.to_felts()?;
    calldata.extend(spend.root.to_felts());
    Ok(calldata)
}

pub fn approve(token: Address, spender: Address, amount: u128) -> ContractCall {
    let mut calldata = vec![spender];
    calldata.extend(u128_as_u256(amount));
    ContractCall {
        to: token,
        entrypoint: Entrypoint::Approve,
        calldata,
    }
}

/// Registers the root a spend proves against, with the leaf it came from.
pub fn add_root_with_path(
    pool: Address,
    commitment: &FieldHash,
    path: &MerklePath,
) -> ContractCall {
    let mut calldata = commitment.to_felts().to_vec();
    calldata.push(Felt::from(path.path.len() as u64));
    for node in &path.path {
        calldata.extend(node.to_felts());
    }
    calldata.push(Felt::from(path.index));
    calldata.extend(path.root.to_felts());
    ContractCall {
        to: pool,
        entrypoint: Entrypoint::AddRootWithPath,
        calldata,
    }
}

pub fn private_swap(
    pool: Address,
    spend: &SpendProofRef<'_>,
    nullifier_hash: &FieldHash,
    amount_in: u128,
    out_commitment: &FieldHash,
    zero_for_one: bool,
) -> Result<ContractCall, ClientError> {
    let mut calldata = proof_prefix(spend)?;
    calldata.extend(nullifier_hash.to_felts());
    calldata.push(Felt::from(amount_in));
    // min_amount_out
    calldata.push(Felt::ZERO);
    calldata.extend(out_commitment.to_felts());
    calldata.push(bool_felt(zero_for_one));
    Ok(ContractCall {
        to: pool,
        entrypoint: Entrypoint::PrivateSwap,
        calldata,
    })
}

pub fn mint_liquidity(
    pool: Address,
    spend: &SpendProofRef<'_>,
    nullifier_hash: &FieldHash,
    amount: u128,
    tick_lower: i32,
    tick_upper: i32,
    out_commitment: &FieldHash,
) -> Result<ContractCall, ClientError> {
    let mut calldata = proof_prefix(spend)?;
    calldata.extend(nullifier_hash.to_felts());
    calldata.push(Felt::from(amount));
    calldata.push(i32_to_felt(tick_lower));
    calldata.push(i32_to_felt(tick_upper));
    calldata.extend(out_commitment.to_felts());
    Ok(ContractCall {
        to: pool,
        entrypoint: Entrypoint::MintLiquidity,
        calldata,
    })
}

/// Public tokens in, a note out. The note is identified by its note-hash; the
/// pool binds the amount when it emits the leaf.
pub fn swap_public_to_private(
    pool: Address,
    token_in: Address,
    amount: u128,
    note_hash: &FieldHash,
    zero_for_one: bool,
) -> ContractCall {
    let mut calldata = vec![token_in, Felt::from(amount), Felt::ZERO];
    calldata.extend(note_hash.to_felts());
    calldata.push(bool_felt(zero_for_one));
    ContractCall {
        to: pool,
        entrypoint: Entrypoint::SwapPublicToPrivate,
        calldata,
    }
}

pub fn mint_liquidity_public_to_private(
    pool: Address,
    token: Address,
    amount: u128,
    tick_lower: i32,
    tick_upper: i32,
    note_hash: &FieldHash,
) -> ContractCall {
    let mut calldata = vec![
        token,
        Felt::from(amount),
        i32_to_felt(tick_lower),
        i32_to_felt(tick_upper),
    ];
    calldata.extend(note_hash.to_felts());
    ContractCall {
        to: pool,
        entrypoint: Entrypoint::MintLiquidityPublicToPrivate,
        calldata,
    }
}

pub fn withdraw_public(
    pool: Address,
    spend: &SpendProofRef<'_>,
    nullifier_hash: &FieldHash,
    amount: u128,
    token: Address,
    recipient: Address,
) -> Result<ContractCall, ClientError> {
    let mut calldata = proof_prefix(spend)?;
    calldata.extend(nullifier_hash.to_felts());
    calldata.push(Felt::from(amount));
    calldata.push(token);
    calldata.push(recipient);
    // full withdrawal: no change note
    calldata.extend(FieldHash::ZERO.to_felts());
    Ok(ContractCall {
        to: pool,
        entrypoint: Entrypoint::WithdrawPublic,
        calldata,
    })
}

pub fn collect_fees_public(
    pool: Address,
    spend: &SpendProofRef<'_>,
    note_hash: &FieldHash,
    tick_lower: i32,
    tick_upper: i32,
    recipient: Address,
    new_commitment: &FieldHash,
) -> Result<ContractCall, ClientError> {
    let mut calldata = proof_prefix(spend)?;
    calldata.extend(note_hash.to_felts());
    calldata.push(i32_to_felt(tick_lower));
    calldata.push(i32_to_felt(tick_upper));
    calldata.push(recipient);
    calldata.extend(new_commitment.to_felts());
    Ok(ContractCall {
        to: pool,
        entrypoint: Entrypoint::CollectFeesPublic,
        calldata,
    })
}

pub fn remove_liquidity_public(
    pool: Address,
    spend: &SpendProofRef<'_>,
    note_hash: &FieldHash,
    tick_lower: i32,
    tick_upper: i32,
    recipient: Address,
) -> Result<ContractCall, ClientError> {
    let mut calldata = proof_prefix(spend)?;
    calldata.extend(note_hash.to_felts());
    calldata.push(i32_to_felt(tick_lower));
    calldata.push(i32_to_felt(tick_upper));
    calldata.push(recipient);
    Ok(ContractCall {
        to: pool,
        entrypoint: Entrypoint::RemoveLiquidityPublic,
        calldata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof() -> ProofCalldata {
        ProofCalldata::new(vec!["0x7".to_string(), "0x8".to_string()])
    }

    #[test]
    fn approve_encodes_u256_amount() {
        let call = approve(Felt::from(3u8), Felt::from(9u8), 500);
        assert_eq!(call.to, Felt::from(3u8));
        assert_eq!(
            call.calldata,
            vec![Felt::from(9u8), Felt::from(500u32), Felt::ZERO]
        );
    }

    #[test]
    fn add_root_with_path_lists_siblings_as_u256() {
        let path = MerklePath {
            root: FieldHash::from_u128(77),
            path: vec![FieldHash::from_u128(1), FieldHash::from_u128(2)],
            indices: vec![false, true],
            index: 5,
            amount: 0,
            commitment: FieldHash::from_u128(4),
        };
        let call = add_root_with_path(Felt::ONE, &FieldHash::from_u128(4), &path);
        let expected: Vec<Felt> = [4u32, 0, 2, 1, 0, 2, 0, 5, 77, 0]
            .into_iter()
            .map(Felt::from)
            .collect();
        assert_eq!(call.calldata, expected);
        assert_eq!(call.entrypoint, Entrypoint::AddRootWithPath);
    }

    #[test]
    fn private_swap_layout() {
        let proof = proof();
        let spend = SpendProofRef {
            proof: &proof,
            root: FieldHash::from_u128(10),
        };
        let call = private_swap(
            Felt::ONE,
            &spend,
            &FieldHash::from_u128(11),
            1_000,
            &FieldHash::from_u128(12),
            true,
        )
        .expect("call");
        let expected: Vec<Felt> = [2u32, 7, 8, 10, 0, 11, 0, 1_000, 0, 12, 0, 1]
            .into_iter()
            .map(Felt::from)
            .collect();
        assert_eq!(call.calldata, expected);
    }

    #[test]
    fn negative_ticks_wrap_in_mint_calldata() {
        let call = mint_liquidity_public_to_private(
            Felt::ONE,
            Felt::TWO,
            100,
            -600,
            600,
            &FieldHash::from_u128(3),
        );
        assert_eq!(call.calldata[2], Felt::ZERO - Felt::from(600u32));
        assert_eq!(call.calldata[3], Felt::from(600u32));
        assert_eq!(&call.calldata[4..], &[Felt::from(3u8), Felt::ZERO]);
    }

    #[test]
    fn withdraw_ends_with_zero_change_commitment() {
        let proof = proof();
        let spend = SpendProofRef {
            proof: &proof,
            root: FieldHash::from_u128(10),
        };
        let call = withdraw_public(
            Felt::ONE,
            &spend,
            &FieldHash::from_u128(11),
            55,
            Felt::from(0xaau8),
            Felt::from(0xbbu8),
        )
        .expect("call");
        let tail = &call.calldata[call.calldata.len() - 5..];
        assert_eq!(
            tail,
            &[
                Felt::from(55u8),
                Felt::from(0xaau8),
                Felt::from(0xbbu8),
                Felt::ZERO,
                Felt::ZERO
            ]
        );
    }

    #[test]
    fn swap_public_to_private_passes_note_hash() {
        let call = swap_public_to_private(
            Felt::ONE,
            Felt::from(5u8),
            42,
            &FieldHash::from_u128(99),
            false,
        );
        let expected: Vec<Felt> = [5u32, 42, 0, 99, 0, 0]
            .into_iter()
            .map(Felt::from)
            .collect();
        assert_eq!(call.calldata, expected);
    }
}
