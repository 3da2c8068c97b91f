//! Exact USD price → token base unit conversion.
//!
//! Prices in the service catalog are decimal USD strings ("0.001", "$1.50").
//! Advertised amounts and verified amounts must agree to the base unit, so
//! the conversion is pure string arithmetic — floating point never touches a
//! price. The same function runs at 402-advertisement time and at payment
//! verification time.

use alloy::primitives::U256;

/// Error produced when a catalog price cannot be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("malformed price: {0:?}")]
    MalformedPrice(String),
}

/// Converts a decimal USD price string into stablecoin base units.
///
/// The fractional part is truncated or right-padded with zeros to exactly
/// `decimals` digits, so `"0.001"` with 18 decimals yields `10^15` and with
/// 6 decimals yields `10^3`. A leading `$` is tolerated.
pub fn price_to_base_units(price: &str, decimals: u32) -> Result<U256, PriceError> {
    let trimmed = price.trim().trim_start_matches('$');
    if trimmed.is_empty() {
        return Err(PriceError::MalformedPrice(price.to_string()));
    }

    let (int_part, dec_part) = match trimmed.split_once('.') {
        Some((i, d)) => (i, d),
        None => (trimmed, ""),
    };
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !dec_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(PriceError::MalformedPrice(price.to_string()));
    }
    if int_part.is_empty() && dec_part.is_empty() {
        return Err(PriceError::MalformedPrice(price.to_string()));
    }

    let decimals = decimals as usize;
    let mut fraction = String::with_capacity(decimals);
    fraction.push_str(&dec_part[..dec_part.len().min(decimals)]);
    while fraction.len() < decimals {
        fraction.push('0');
    }

    let mut digits = String::with_capacity(int_part.len() + fraction.len());
    digits.push_str(int_part);
    digits.push_str(&fraction);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }

    U256::from_str_radix(digits, 10).map_err(|_| PriceError::MalformedPrice(price.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_dollar() {
        assert_eq!(
            price_to_base_units("1", 6).unwrap(),
            U256::from(1_000_000u64)
        );
        assert_eq!(
            price_to_base_units("2", 18).unwrap(),
            U256::from(2u64) * U256::from(10u64).pow(U256::from(18u64))
        );
    }

    #[test]
    fn test_fractional() {
        assert_eq!(price_to_base_units("0.001", 6).unwrap(), U256::from(1000u64));
        assert_eq!(
            price_to_base_units("0.001", 18).unwrap(),
            U256::from(10u64).pow(U256::from(15u64))
        );
        assert_eq!(
            price_to_base_units("1.50", 6).unwrap(),
            U256::from(1_500_000u64)
        );
    }

    #[test]
    fn test_dollar_sign_stripped() {
        assert_eq!(
            price_to_base_units("$0.25", 6).unwrap(),
            U256::from(250_000u64)
        );
    }

    #[test]
    fn test_fraction_longer_than_decimals_truncates() {
        // 9 fractional digits against 6 decimals: trailing digits dropped.
        assert_eq!(
            price_to_base_units("0.123456789", 6).unwrap(),
            U256::from(123_456u64)
        );
    }

    #[test]
    fn test_zero() {
        assert_eq!(price_to_base_units("0", 6).unwrap(), U256::ZERO);
        assert_eq!(price_to_base_units("0.000", 18).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_bare_fraction() {
        assert_eq!(price_to_base_units(".5", 6).unwrap(), U256::from(500_000u64));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(price_to_base_units("abc", 6).is_err());
        assert!(price_to_base_units("1.2.3", 6).is_err());
        assert!(price_to_base_units("1e5", 6).is_err());
        assert!(price_to_base_units("-1", 6).is_err());
        assert!(price_to_base_units("", 6).is_err());
        assert!(price_to_base_units("$", 6).is_err());
    }

    #[test]
    fn test_roundtrip_law() {
        // price_to_base_units followed by division by 10^d recovers the value
        // for any price with <= d fractional digits.
        for (price, decimals, int, frac_units) in [
            ("12.345678", 6u32, 12u64, 345_678u64),
            ("7", 6, 7, 0),
            ("0.000001", 6, 0, 1),
        ] {
            let units = price_to_base_units(price, decimals).unwrap();
            let scale = U256::from(10u64).pow(U256::from(decimals));
            assert_eq!(units / scale, U256::from(int));
            assert_eq!(units % scale, U256::from(frac_units));
        }
    }

    #[test]
    fn test_advertise_verify_agree() {
        // The same catalog price must produce identical amounts however many
        // times it is converted.
        let a = price_to_base_units("0.042", 18).unwrap();
        let b = price_to_base_units("0.042", 18).unwrap();
        assert_eq!(a, b);
    }
}
