use std::future::Future;

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use starknet::core::types::{Felt, U256};
use tokio::time::{sleep, Duration};

use crate::config::RetryConfig;
use crate::error::ClientError;

pub type Address = Felt;

const STARK_FIELD_MODULUS_HEX: &str =
    "800000000000011000000000000000000000000000000000000000000000001";

pub fn parse_felt(value: &str) -> Result<Felt, ClientError> {
    let value = value.trim();
    if value.starts_with("0x") {
        Felt::from_hex(value)
            .map_err(|_| ClientError::Validation(format!("invalid felt {value}")))
    } else {
        Felt::from_dec_str(value)
            .map_err(|_| ClientError::Validation(format!("invalid felt {value}")))
    }
}

pub fn felt_to_u128(value: &Felt) -> Result<u128, ClientError> {
    let bytes = value.to_bytes_be();
    if bytes[..16].iter().any(|b| *b != 0) {
        return Err(ClientError::Rpc("felt exceeds u128".to_string()));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[16..32]);
    Ok(u128::from_be_bytes(buf))
}

/// Decodes a felt holding a signed 32-bit value encoded modulo the Stark prime.
pub fn felt_to_i32(value: &Felt) -> Result<i32, ClientError> {
    let modulus = stark_field_modulus()?;
    let as_big = felt_to_biguint(value);
    let max = BigUint::from(i32::MAX as u32);
    if as_big <= max {
        return as_big
            .to_i32()
            .ok_or_else(|| ClientError::Rpc("felt out of i32 range".to_string()));
    }

    let min_abs = BigUint::from(1u32) << 31;
    let lower_bound = &modulus - &min_abs;
    if as_big < lower_bound {
        return Err(ClientError::Rpc("felt out of i32 range".to_string()));
    }

    let mag = &modulus - &as_big;
    let mag_u32 = mag
        .to_u32()
        .ok_or_else(|| ClientError::Rpc("felt out of i32 range".to_string()))?;
    if mag_u32 == (1u32 << 31) {
        return Ok(i32::MIN);
    }
    Ok(-(mag_u32 as i32))
}

/// Encodes a signed value as a felt, wrapping negatives modulo the Stark prime.
pub fn i32_to_felt(value: i32) -> Felt {
    if value >= 0 {
        Felt::from(value as u64)
    } else {
        Felt::ZERO - Felt::from(value.unsigned_abs() as u64)
    }
}

/// Decimal form of [`i32_to_felt`], the encoding circuits expect for ticks.
pub fn i32_to_felt_decimal(value: i32) -> String {
    felt_to_biguint(&i32_to_felt(value)).to_str_radix(10)
}

pub fn u256_to_felts(value: U256) -> [Felt; 2] {
    [Felt::from(value.low()), Felt::from(value.high())]
}

pub fn u256_to_biguint(value: U256) -> BigUint {
    (BigUint::from(value.high()) << 128) + BigUint::from(value.low())
}

pub fn biguint_to_u256(value: &BigUint) -> Result<U256, ClientError> {
    if value.bits() > 256 {
        return Err(ClientError::Validation("value exceeds u256".to_string()));
    }
    let mask = (BigUint::from(1u8) << 128) - 1u8;
    let low = (value & &mask)
        .to_u128()
        .ok_or_else(|| ClientError::Validation("value exceeds u256".to_string()))?;
    let high = (value >> 128usize)
        .to_u128()
        .ok_or_else(|| ClientError::Validation("value exceeds u256".to_string()))?;
    Ok(U256::from_words(low, high))
}

pub fn biguint_to_u128(value: &BigUint) -> Result<u128, ClientError> {
    value
        .to_u128()
        .ok_or_else(|| ClientError::Validation("value exceeds u128".to_string()))
}

pub fn felt_to_decimal(value: &Felt) -> String {
    felt_to_biguint(value).to_str_radix(10)
}

pub fn felt_to_hex(value: Felt) -> String {
    format!("0x{}", hex::encode(value.to_bytes_be()))
}

/// Parses a decimal token amount such as `"1.25"` into base units.
pub fn parse_amount(value: &str, decimals: u8) -> Result<u128, ClientError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let (whole, frac) = match trimmed.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (trimmed, ""),
    };
    let invalid = || ClientError::Validation(format!("invalid amount {trimmed}"));
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let decimals = decimals as usize;
    let mut frac_padded: String = frac.chars().take(decimals).collect();
    while frac_padded.len() < decimals {
        frac_padded.push('0');
    }
    let base = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(invalid)?;
    let whole = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| invalid())?
    };
    let frac = if frac_padded.is_empty() {
        0
    } else {
        frac_padded.parse::<u128>().map_err(|_| invalid())?
    };
    whole
        .checked_mul(base)
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(invalid)
}

/// Formats base units with `precision` fractional digits, truncating.
pub fn format_amount(amount: u128, decimals: u8, precision: usize) -> String {
    let base = 10u128.pow(decimals as u32);
    let whole = amount / base;
    if precision == 0 || decimals == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", amount % base, width = decimals as usize);
    let shown: String = frac.chars().take(precision).collect();
    format!("{whole}.{shown}")
}

pub(crate) async fn with_retry<F, Fut, T>(retry: &RetryConfig, mut f: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0usize;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= retry.max_attempts {
                    return Err(err);
                }
                sleep(Duration::from_millis(retry.delay_ms)).await;
            }
        }
    }
}

fn stark_field_modulus() -> Result<BigUint, ClientError> {
    BigUint::parse_bytes(STARK_FIELD_MODULUS_HEX.as_bytes(), 16)
        .ok_or_else(|| ClientError::Crypto("invalid Stark modulus".to_string()))
}

fn felt_to_biguint(felt: &Felt) -> BigUint {
    BigUint::from_bytes_be(&felt.to_bytes_be())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn negative_ticks_wrap_modulo_stark_prime() {
        let felt = i32_to_felt(-887272);
        assert_eq!(felt_to_i32(&felt).expect("decode"), -887272);
        assert_eq!(
            i32_to_felt_decimal(-1),
            "3618502788666131213697322783095070105623107215331596699973092056135872020480"
        );
        assert_eq!(i32_to_felt_decimal(887272), "887272");
    }

    #[test]
    fn felt_to_u128_rejects_wide_values() {
        let wide = Felt::from_hex("0x100000000000000000000000000000000").expect("felt");
        assert!(felt_to_u128(&wide).is_err());
        assert_eq!(felt_to_u128(&Felt::from(42u8)).expect("small"), 42);
    }

    #[test]
    fn u256_biguint_conversions_agree() {
        let value = U256::from_words(7, 9);
        let big = u256_to_biguint(value);
        assert_eq!(biguint_to_u256(&big).expect("u256"), value);
        assert_eq!(u256_to_felts(value), [Felt::from(7u8), Felt::from(9u8)]);
    }

    #[test]
    fn parse_amount_scales_by_decimals() {
        assert_eq!(parse_amount("1.5", 6).expect("amount"), 1_500_000);
        assert_eq!(parse_amount("0.0000001", 6).expect("truncated"), 0);
        assert_eq!(parse_amount("", 18).expect("empty"), 0);
        assert!(parse_amount("1e5", 6).is_err());
    }

    #[test]
    fn format_amount_truncates_fraction() {
        assert_eq!(format_amount(1_234_567, 6, 4), "1.2345");
        assert_eq!(format_amount(5, 6, 2), "0.00");
        assert_eq!(format_amount(5, 0, 4), "5");
    }

    #[tokio::test]
    async fn with_retry_stops_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let retry = RetryConfig {
            max_attempts: 3,
            delay_ms: 0,
        };
        let result: Result<(), ClientError> = with_retry(&retry, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Rpc("down".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
