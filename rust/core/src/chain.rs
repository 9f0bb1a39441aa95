//! Pool contract reads and multi-call submission.
//!
//! Every read response passes through one decode ([`RawPoolState`],
//! [`RawReserves`], [`RawPosition`]) that accepts positional felts from the
//! RPC node or named fields from JSON before the rest of the crate sees it.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::Deserialize;
use starknet::accounts::{Account, ConnectedAccount};
use starknet::core::types::{BlockId, BlockTag, Call, Felt, FunctionCall, U256};
use starknet::core::utils::get_selector_from_name;
use starknet::providers::Provider;
use tracing::{debug, info};

use crate::commitment::FieldHash;
use crate::config::RetryConfig;
use crate::error::ClientError;
use crate::utils::{
    biguint_to_u128, biguint_to_u256, felt_to_i32, felt_to_u128, parse_felt, with_retry, Address,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub sqrt_price: U256,
    pub tick: i32,
    pub liquidity: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserves {
    pub reserve0: U256,
    pub reserve1: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionFees {
    pub liquidity: u128,
    pub tokens_owed0: u128,
    pub tokens_owed1: u128,
}

/// A scalar as it shows up in JSON: number, string (hex, decimal or
/// negative decimal) or a `{low, high}` u256 pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Int(i64),
    Parts { low: String, high: String },
    Text(String),
}

impl RawNumber {
    fn to_biguint(&self) -> Result<BigUint, ClientError> {
        match self {
            RawNumber::Int(value) => u64::try_from(*value)
                .map(BigUint::from)
                .map_err(|_| ClientError::Rpc(format!("negative value {value}"))),
            RawNumber::Parts { low, high } => {
                let low = parse_unsigned(low)?;
                let high = parse_unsigned(high)?;
                Ok((high << 128) + low)
            }
            RawNumber::Text(text) => parse_unsigned(text),
        }
    }

    fn to_u128(&self) -> Result<u128, ClientError> {
        biguint_to_u128(&self.to_biguint()?).map_err(|e| ClientError::Rpc(e.to_string()))
    }

    fn to_u256(&self) -> Result<U256, ClientError> {
        biguint_to_u256(&self.to_biguint()?).map_err(|e| ClientError::Rpc(e.to_string()))
    }

    fn to_i32(&self) -> Result<i32, ClientError> {
        match self {
            RawNumber::Int(value) => {
                i32::try_from(*value).map_err(|_| ClientError::Rpc(format!("tick {value}")))
            }
            RawNumber::Text(text) if text.trim_start().starts_with('-') => text
                .trim()
                .parse::<i32>()
                .map_err(|_| ClientError::Rpc(format!("tick {text}"))),
            RawNumber::Text(text) => {
                let felt = parse_felt(text).map_err(|e| ClientError::Rpc(e.to_string()))?;
                felt_to_i32(&felt)
            }
            RawNumber::Parts { .. } => Err(ClientError::Rpc("tick cannot be a u256".to_string())),
        }
    }
}

fn parse_unsigned(text: &str) -> Result<BigUint, ClientError> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x") {
        Some(digits) => BigUint::parse_bytes(digits.as_bytes(), 16),
        None => BigUint::parse_bytes(text.as_bytes(), 10),
    };
    parsed.ok_or_else(|| ClientError::Rpc(format!("invalid number {text}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedPoolState {
    pub sqrt_price: RawNumber,
    pub tick: RawNumber,
    pub liquidity: RawNumber,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPoolState {
    Wrapped { state: NamedPoolState },
    Named(NamedPoolState),
    /// `[sqrt_low, sqrt_high, tick, liquidity, ..]`
    Felts(Vec<Felt>),
}

impl TryFrom<RawPoolState> for PoolState {
    type Error = ClientError;

    fn try_from(raw: RawPoolState) -> Result<Self, Self::Error> {
        match raw {
            RawPoolState::Wrapped { state } | RawPoolState::Named(state) => Ok(PoolState {
                sqrt_price: state.sqrt_price.to_u256()?,
                tick: state.tick.to_i32()?,
                liquidity: state.liquidity.to_u128()?,
            }),
            RawPoolState::Felts(felts) => {
                if felts.len() < 4 {
                    return Err(ClientError::Rpc(format!(
                        "pool state has {} felts, expected at least 4",
                        felts.len()
                    )));
                }
                Ok(PoolState {
                    sqrt_price: U256::from_words(felt_to_u128(&felts[0])?, felt_to_u128(&felts[1])?),
                    tick: felt_to_i32(&felts[2])?,
                    liquidity: felt_to_u128(&felts[3])?,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedReserves {
    pub res0: RawNumber,
    pub res1: RawNumber,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawReserves {
    Wrapped { reserves: NamedReserves },
    Named(NamedReserves),
    /// `[res0_low, res0_high, res1_low, res1_high]`
    Felts(Vec<Felt>),
}

impl TryFrom<RawReserves> for Reserves {
    type Error = ClientError;

    fn try_from(raw: RawReserves) -> Result<Self, Self::Error> {
        match raw {
            RawReserves::Wrapped { reserves } | RawReserves::Named(reserves) => Ok(Reserves {
                reserve0: reserves.res0.to_u256()?,
                reserve1: reserves.res1.to_u256()?,
            }),
            RawReserves::Felts(felts) => {
                if felts.len() < 4 {
                    return Err(ClientError::Rpc(format!(
                        "reserves have {} felts, expected 4",
                        felts.len()
                    )));
                }
                Ok(Reserves {
                    reserve0: U256::from_words(felt_to_u128(&felts[0])?, felt_to_u128(&felts[1])?),
                    reserve1: U256::from_words(felt_to_u128(&felts[2])?, felt_to_u128(&felts[3])?),
                })
            }
        }
    }
}

/// `[liquidity, fg0_low, fg0_high, fg1_low, fg1_high, owed0, owed1]`
#[derive(Debug, Clone)]
pub struct RawPosition(pub Vec<Felt>);

impl TryFrom<RawPosition> for PositionFees {
    type Error = ClientError;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        let felts = raw.0;
        if felts.len() < 7 {
            return Err(ClientError::Rpc(format!(
                "position has {} felts, expected 7",
                felts.len()
            )));
        }
        Ok(PositionFees {
            liquidity: felt_to_u128(&felts[0])?,
            tokens_owed0: felt_to_u128(&felts[5])?,
            tokens_owed1: felt_to_u128(&felts[6])?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entrypoint {
    Approve,
    AddRootWithPath,
    PrivateSwap,
    MintLiquidity,
    SwapPublicToPrivate,
    MintLiquidityPublicToPrivate,
    WithdrawPublic,
    CollectFeesPublic,
    RemoveLiquidityPublic,
}

impl Entrypoint {
    pub fn name(&self) -> &'static str {
        match self {
            Entrypoint::Approve => "approve",
            Entrypoint::AddRootWithPath => "add_root_with_path",
            Entrypoint::PrivateSwap => "private_swap",
            Entrypoint::MintLiquidity => "mint_liquidity",
            Entrypoint::SwapPublicToPrivate => "swap_public_to_private",
            Entrypoint::MintLiquidityPublicToPrivate => "mint_liquidity_public_to_private",
            Entrypoint::WithdrawPublic => "withdraw_public",
            Entrypoint::CollectFeesPublic => "collect_fees_public",
            Entrypoint::RemoveLiquidityPublic => "remove_liquidity_public",
        }
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub entrypoint: Entrypoint,
    pub calldata: Vec<Felt>,
}

impl ContractCall {
    pub fn to_call(&self) -> Result<Call, ClientError> {
        let selector = get_selector_from_name(self.entrypoint.name())
            .map_err(|err| ClientError::Submission(err.to_string()))?;
        Ok(Call {
            to: self.to,
            selector,
            calldata: self.calldata.clone(),
        })
    }
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn get_state(&self) -> Result<PoolState, ClientError>;
    async fn get_reserves(&self) -> Result<Reserves, ClientError>;
    async fn get_position(&self, note_hash: &FieldHash) -> Result<PositionFees, ClientError>;
    async fn is_nullifier_spent(&self, nullifier_hash: &FieldHash) -> Result<bool, ClientError>;
    /// Sends all calls as one atomic multi-call and returns the tx hash.
    async fn submit(&self, calls: Vec<ContractCall>) -> Result<Felt, ClientError>;
}

pub struct StarknetGateway<A: ConnectedAccount + Sync + Send> {
    account: A,
    pool_address: Address,
    retry: RetryConfig,
}

impl<A: ConnectedAccount + Sync + Send> StarknetGateway<A> {
    pub fn new(account: A, pool_address: Address, retry: RetryConfig) -> Self {
        Self {
            account,
            pool_address,
            retry,
        }
    }

    async fn read(&self, entrypoint: &str, calldata: Vec<Felt>) -> Result<Vec<Felt>, ClientError> {
        let selector = get_selector_from_name(entrypoint)
            .map_err(|err| ClientError::Rpc(err.to_string()))?;
        let call = FunctionCall {
            contract_address: self.pool_address,
            entry_point_selector: selector,
            calldata,
        };
        let provider = self.account.provider();
        with_retry(&self.retry, || async {
            provider
                .call(call.clone(), BlockId::Tag(BlockTag::Latest))
                .await
                .map_err(|err| ClientError::Rpc(format!("{entrypoint}: {err}")))
        })
        .await
    }
}

#[async_trait]
impl<A: ConnectedAccount + Sync + Send> ChainGateway for StarknetGateway<A> {
    async fn get_state(&self) -> Result<PoolState, ClientError> {
        let felts = self.read("get_state", Vec::new()).await?;
        PoolState::try_from(RawPoolState::Felts(felts))
    }

    async fn get_reserves(&self) -> Result<Reserves, ClientError> {
        let felts = self.read("get_reserves", Vec::new()).await?;
        Reserves::try_from(RawReserves::Felts(felts))
    }

    async fn get_position(&self, note_hash: &FieldHash) -> Result<PositionFees, ClientError> {
        let felts = self.read("get_position", note_hash.to_felts().to_vec()).await?;
        PositionFees::try_from(RawPosition(felts))
    }

    async fn is_nullifier_spent(&self, nullifier_hash: &FieldHash) -> Result<bool, ClientError> {
        let felts = self
            .read("is_nullifier_spent", nullifier_hash.to_felts().to_vec())
            .await?;
        Ok(felts.first() == Some(&Felt::ONE))
    }

    /// Attempted once; a retried multi-call could land twice.
    async fn submit(&self, calls: Vec<ContractCall>) -> Result<Felt, ClientError> {
        let entrypoints: Vec<&str> = calls.iter().map(|call| call.entrypoint.name()).collect();
        debug!(?entrypoints, "submitting multi-call");
        let calls = calls
            .iter()
            .map(ContractCall::to_call)
            .collect::<Result<Vec<_>, _>>()?;
        let mut exec = self.account.execute_v3(calls);
        if let Some(value) = gas_override::<u64>("ZYLITH_L1_GAS")? {
            exec = exec.l1_gas(value);
        }
        if let Some(value) = gas_override::<u128>("ZYLITH_L1_GAS_PRICE")? {
            exec = exec.l1_gas_price(value);
        }
        if let Some(value) = gas_override::<u64>("ZYLITH_L2_GAS")? {
            exec = exec.l2_gas(value);
        }
        if let Some(value) = gas_override::<u128>("ZYLITH_L2_GAS_PRICE")? {
            exec = exec.l2_gas_price(value);
        }
        if let Some(value) = gas_override::<u64>("ZYLITH_L1_DATA_GAS")? {
            exec = exec.l1_data_gas(value);
        }
        if let Some(value) = gas_override::<u128>("ZYLITH_L1_DATA_GAS_PRICE")? {
            exec = exec.l1_data_gas_price(value);
        }
        let result = exec
            .send()
            .await
            .map_err(|err| ClientError::Submission(err.to_string()))?;
        info!(tx_hash = %format!("{:#x}", result.transaction_hash), "multi-call accepted");
        Ok(result.transaction_hash)
    }
}

fn gas_override<T: FromStr>(name: &str) -> Result<Option<T>, ClientError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("invalid {name}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::i32_to_felt;

    #[test]
    fn pool_state_decodes_from_felts() {
        let raw = RawPoolState::Felts(vec![
            Felt::from(5u8),
            Felt::from(1u8),
            i32_to_felt(-600),
            Felt::from(1_000u32),
            Felt::ZERO,
        ]);
        let state = PoolState::try_from(raw).expect("decode");
        assert_eq!(state.sqrt_price, U256::from_words(5, 1));
        assert_eq!(state.tick, -600);
        assert_eq!(state.liquidity, 1_000);
    }

    #[test]
    fn pool_state_decodes_from_named_json() {
        let raw: RawPoolState = serde_json::from_str(
            r#"{"state":{"sqrt_price":{"low":"0x10","high":"0x0"},"tick":-12,"liquidity":"500"}}"#,
        )
        .expect("json");
        let state = PoolState::try_from(raw).expect("decode");
        assert_eq!(state.sqrt_price, U256::from(16u32));
        assert_eq!(state.tick, -12);
        assert_eq!(state.liquidity, 500);

        let flat: RawPoolState =
            serde_json::from_str(r#"{"sqrt_price":"79228162514264337593543950336","tick":"0","liquidity":7}"#)
                .expect("json");
        let state = PoolState::try_from(flat).expect("decode");
        assert_eq!(state.sqrt_price, U256::from_words(1u128 << 96, 0));
        assert_eq!(state.liquidity, 7);
    }

    #[test]
    fn short_pool_state_is_rejected() {
        let err = PoolState::try_from(RawPoolState::Felts(vec![Felt::ONE])).expect_err("short");
        assert!(matches!(err, ClientError::Rpc(_)));
    }

    #[test]
    fn reserves_decode_either_shape() {
        let felts = RawReserves::Felts(vec![
            Felt::from(10u8),
            Felt::ZERO,
            Felt::from(20u8),
            Felt::ZERO,
        ]);
        let reserves = Reserves::try_from(felts).expect("decode");
        assert_eq!(reserves.reserve0, U256::from(10u8));
        assert_eq!(reserves.reserve1, U256::from(20u8));

        let named: RawReserves =
            serde_json::from_str(r#"{"reserves":{"res0":"0xa","res1":20}}"#).expect("json");
        assert_eq!(Reserves::try_from(named).expect("decode"), reserves);
    }

    #[test]
    fn position_reads_owed_fees_from_tail() {
        let felts: Vec<Felt> = (0u8..7).map(Felt::from).collect();
        let fees = PositionFees::try_from(RawPosition(felts)).expect("decode");
        assert_eq!(fees.liquidity, 0);
        assert_eq!(fees.tokens_owed0, 5);
        assert_eq!(fees.tokens_owed1, 6);
    }

    #[test]
    fn contract_call_uses_entrypoint_selector() {
        let call = ContractCall {
            to: Felt::ONE,
            entrypoint: Entrypoint::AddRootWithPath,
            calldata: vec![Felt::TWO],
        };
        let starknet_call = call.to_call().expect("call");
        assert_eq!(
            starknet_call.selector,
            get_selector_from_name("add_root_with_path").expect("selector")
        );
        assert_eq!(starknet_call.calldata, vec![Felt::TWO]);
    }
}
