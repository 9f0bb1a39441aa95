//! Fixed-point concentrated-liquidity math.
//!
//! Mirrors the pool contract's integer arithmetic exactly: Q96 square-root
//! prices, floor division everywhere, and a single rounding step in
//! [`sqrt_price_at_tick`]. Any drift here desynchronizes client quotes from
//! what the contract executes.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use starknet::core::types::U256;

use crate::error::ClientError;
use crate::utils::{biguint_to_u128, biguint_to_u256, u256_to_biguint};

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

pub const SWAP_FEE_RATE: u128 = 997_000;
pub const FEE_DENOMINATOR: u128 = 1_000_000;
pub const LP_APPROVAL_BUFFER: u128 = 1_005;
pub const LP_BUFFER_DENOMINATOR: u128 = 1_000;

const Q96_BITS: usize = 96;
const Q128_BITS: usize = 128;

/// `2^128 / sqrt(1.0001)^(2^i)` in Q128, one entry per bit of `|tick|`.
const TICK_RATIOS: [u128; 20] = [
    0xfffcb933bd6fad37aa2d162d1a594001,
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

/// Which token enters the pool. For liquidity this is the single side deposited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ZeroToOne,
    OneToZero,
}

impl Direction {
    pub fn zero_for_one(&self) -> bool {
        matches!(self, Direction::ZeroToOne)
    }
}

impl std::str::FromStr for Direction {
    type Err = ClientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "0to1" | "zero_to_one" => Ok(Direction::ZeroToOne),
            "1to0" | "one_to_zero" => Ok(Direction::OneToZero),
            other => Err(ClientError::Validation(format!("unknown direction {other}"))),
        }
    }
}

pub fn q96() -> BigUint {
    BigUint::one() << Q96_BITS
}

pub fn check_tick(tick: i32) -> Result<(), ClientError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(ClientError::Validation(format!(
            "tick {tick} outside [{MIN_TICK}, {MAX_TICK}]"
        )));
    }
    Ok(())
}

pub fn sqrt_price_at_tick(tick: i32) -> Result<U256, ClientError> {
    check_tick(tick)?;
    biguint_to_u256(&sqrt_price_at_tick_big(tick))
}

fn sqrt_price_at_tick_big(tick: i32) -> BigUint {
    let abs_tick = tick.unsigned_abs();
    let mut ratio = BigUint::one() << Q128_BITS;
    for (bit, constant) in TICK_RATIOS.iter().enumerate() {
        if abs_tick & (1 << bit) != 0 {
            ratio = (ratio * BigUint::from(*constant)) >> Q128_BITS;
        }
    }
    if tick > 0 {
        let max_u256 = (BigUint::one() << 256) - BigUint::one();
        ratio = max_u256 / ratio;
    }
    let remainder_mask = BigUint::from(u32::MAX);
    let round_up = !(&ratio & &remainder_mask).is_zero();
    let mut sqrt_price = ratio >> 32;
    if round_up {
        sqrt_price += 1u8;
    }
    sqrt_price
}

fn sorted(sqrt_a: U256, sqrt_b: U256) -> (BigUint, BigUint) {
    let a = u256_to_biguint(sqrt_a);
    let b = u256_to_biguint(sqrt_b);
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

pub fn liquidity_from_amount0(sqrt_a: U256, sqrt_b: U256, amount0: u128) -> Result<u128, ClientError> {
    let (low, high) = sorted(sqrt_a, sqrt_b);
    if low == high || amount0 == 0 {
        return Ok(0);
    }
    let intermediate = (&high * &low) >> Q96_BITS;
    let liquidity = BigUint::from(amount0) * intermediate / (high - low);
    biguint_to_u128(&liquidity)
}

pub fn liquidity_from_amount1(sqrt_a: U256, sqrt_b: U256, amount1: u128) -> Result<u128, ClientError> {
    let (low, high) = sorted(sqrt_a, sqrt_b);
    if low == high || amount1 == 0 {
        return Ok(0);
    }
    let liquidity = (BigUint::from(amount1) << Q96_BITS) / (high - low);
    biguint_to_u128(&liquidity)
}

pub fn amount0_delta(sqrt_a: U256, sqrt_b: U256, liquidity: u128) -> Result<u128, ClientError> {
    let (low, high) = sorted(sqrt_a, sqrt_b);
    if low == high || liquidity == 0 || low.is_zero() {
        return Ok(0);
    }
    let numerator = (BigUint::from(liquidity) * (&high - &low)) << Q96_BITS;
    let amount = numerator / (high * low);
    biguint_to_u128(&amount)
}

pub fn amount1_delta(sqrt_a: U256, sqrt_b: U256, liquidity: u128) -> Result<u128, ClientError> {
    let (low, high) = sorted(sqrt_a, sqrt_b);
    if low == high || liquidity == 0 {
        return Ok(0);
    }
    let amount = (BigUint::from(liquidity) * (high - low)) >> Q96_BITS;
    biguint_to_u128(&amount)
}

/// Input left after the pool's 0.3% fee, floored.
pub fn fee_adjusted(amount_in: u128) -> u128 {
    let adjusted = BigUint::from(amount_in) * SWAP_FEE_RATE / FEE_DENOMINATOR;
    // fee_rate < denominator so the result never exceeds amount_in
    biguint_to_u128(&adjusted).unwrap_or(amount_in)
}

/// One constant-liquidity price step. Assumes no initialized tick is crossed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapStep {
    pub amount_in_less_fee: u128,
    pub sqrt_price_next: U256,
    pub amount_out: u128,
}

pub fn swap_step(
    amount_in: u128,
    sqrt_price: U256,
    liquidity: u128,
    zero_for_one: bool,
) -> Result<SwapStep, ClientError> {
    let less_fee = fee_adjusted(amount_in);
    let price = u256_to_biguint(sqrt_price);
    let unchanged = SwapStep {
        amount_in_less_fee: less_fee,
        sqrt_price_next: sqrt_price,
        amount_out: 0,
    };
    if less_fee == 0 || liquidity == 0 || price.is_zero() {
        return Ok(unchanged);
    }
    let liq = BigUint::from(liquidity);
    let less_fee_big = BigUint::from(less_fee);

    let (next, amount_out) = if zero_for_one {
        let liq_q96 = &liq << Q96_BITS;
        let denominator = &liq_q96 + &less_fee_big * &price;
        let next = &liq_q96 * &price / denominator;
        let out = (&liq * (&price - &next)) >> Q96_BITS;
        (next, out)
    } else {
        let next = &price + (&less_fee_big << Q96_BITS) / &liq;
        let numerator = (&liq << Q96_BITS) * (&next - &price);
        let out = numerator / &next / &price;
        (next, out)
    };

    Ok(SwapStep {
        amount_in_less_fee: less_fee,
        sqrt_price_next: biguint_to_u256(&next)?,
        amount_out: biguint_to_u128(&amount_out)?,
    })
}

pub fn swap_output(
    amount_in: u128,
    sqrt_price: U256,
    liquidity: u128,
    zero_for_one: bool,
) -> Result<u128, ClientError> {
    Ok(swap_step(amount_in, sqrt_price, liquidity, zero_for_one)?.amount_out)
}

/// Range checks the swap circuit re-derives for `amount_out`. The first binds
/// zero-for-one outputs, the second one-for-zero outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChecks {
    /// `L * (P - P_next) >= amount_out * Q96`
    pub price_delta_covers_output: bool,
    /// `amount_in_less_fee * Q96^2 >= amount_out * P_next * P`
    pub input_covers_output: bool,
}

pub fn swap_checks(step: &SwapStep, sqrt_price: U256, liquidity: u128) -> SwapChecks {
    let price = u256_to_biguint(sqrt_price);
    let next = u256_to_biguint(step.sqrt_price_next);
    let out = BigUint::from(step.amount_out);
    let delta = if price > next {
        &price - &next
    } else {
        BigUint::zero()
    };
    let lhs0 = &out << Q96_BITS;
    let rhs0 = BigUint::from(liquidity) * delta;
    let lhs1 = &out * &next * &price;
    let rhs1 = BigUint::from(step.amount_in_less_fee) << (2 * Q96_BITS);
    SwapChecks {
        price_delta_covers_output: rhs0 >= lhs0,
        input_covers_output: rhs1 >= lhs1,
    }
}

/// Where the pool price sits relative to a position's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePosition {
    /// Price under the range: the position holds only token0.
    PriceBelow,
    InRange,
    /// Price over the range: the position holds only token1.
    PriceAbove,
}

pub fn validate_tick_range(tick_lower: i32, tick_upper: i32) -> Result<(), ClientError> {
    check_tick(tick_lower)?;
    check_tick(tick_upper)?;
    if tick_lower >= tick_upper {
        return Err(ClientError::Validation(format!(
            "invalid tick range [{tick_lower}, {tick_upper}]"
        )));
    }
    Ok(())
}

pub fn pool_range(
    sqrt_price: U256,
    tick_lower: i32,
    tick_upper: i32,
) -> Result<RangePosition, ClientError> {
    if u256_to_biguint(sqrt_price).is_zero() {
        return Err(ClientError::Validation(
            "pool price not initialized".to_string(),
        ));
    }
    validate_tick_range(tick_lower, tick_upper)?;
    let price = u256_to_biguint(sqrt_price);
    let lower = sqrt_price_at_tick_big(tick_lower);
    let upper = sqrt_price_at_tick_big(tick_upper);
    if lower >= upper {
        return Err(ClientError::Validation("invalid tick range".to_string()));
    }
    if price < lower {
        Ok(RangePosition::PriceBelow)
    } else if price > upper {
        Ok(RangePosition::PriceAbove)
    } else {
        Ok(RangePosition::InRange)
    }
}

/// Liquidity minted by a single-sided deposit of `amount`.
pub fn shield_liquidity(
    sqrt_price: U256,
    tick_lower: i32,
    tick_upper: i32,
    amount: u128,
    deposit: Direction,
) -> Result<u128, ClientError> {
    validate_tick_range(tick_lower, tick_upper)?;
    let sqrt_lower = sqrt_price_at_tick(tick_lower)?;
    let sqrt_upper = sqrt_price_at_tick(tick_upper)?;
    let price = u256_to_biguint(sqrt_price);
    if price < u256_to_biguint(sqrt_lower) {
        liquidity_from_amount0(sqrt_lower, sqrt_upper, amount)
    } else if price < u256_to_biguint(sqrt_upper) {
        match deposit {
            Direction::ZeroToOne => liquidity_from_amount0(sqrt_price, sqrt_upper, amount),
            Direction::OneToZero => liquidity_from_amount1(sqrt_lower, sqrt_price, amount),
        }
    } else {
        liquidity_from_amount1(sqrt_lower, sqrt_upper, amount)
    }
}

/// Amount of the other token an in-range deposit of `amount` pulls in.
/// Zero when the range does not straddle the price.
pub fn co_required_amount(
    sqrt_price: U256,
    tick_lower: i32,
    tick_upper: i32,
    amount: u128,
    deposit: Direction,
) -> Result<u128, ClientError> {
    validate_tick_range(tick_lower, tick_upper)?;
    let sqrt_lower = sqrt_price_at_tick(tick_lower)?;
    let sqrt_upper = sqrt_price_at_tick(tick_upper)?;
    let price = u256_to_biguint(sqrt_price);
    if price < u256_to_biguint(sqrt_lower) || price >= u256_to_biguint(sqrt_upper) {
        return Ok(0);
    }
    match deposit {
        Direction::ZeroToOne => {
            let liquidity = liquidity_from_amount0(sqrt_price, sqrt_upper, amount)?;
            amount1_delta(sqrt_lower, sqrt_price, liquidity)
        }
        Direction::OneToZero => {
            let liquidity = liquidity_from_amount1(sqrt_lower, sqrt_price, amount)?;
            amount0_delta(sqrt_price, sqrt_upper, liquidity)
        }
    }
}

/// Pads an approval by 0.5% to absorb contract-side ceiling rounding.
pub fn with_approval_buffer(amount: u128) -> Result<u128, ClientError> {
    let buffered = BigUint::from(amount) * LP_APPROVAL_BUFFER / LP_BUFFER_DENOMINATOR;
    biguint_to_u128(&buffered)
}
