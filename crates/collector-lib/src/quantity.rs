//! Kubernetes resource quantity parsing
//!
//! Quantities such as `100m`, `1.5Gi` or `2e3` are parsed into an exact
//! decimal so that millicore and byte conversions round the way the API
//! server does (toward positive infinity) without float drift.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),
    #[error("unknown suffix {suffix:?} in quantity {input:?}")]
    UnknownSuffix { input: String, suffix: String },
    #[error("quantity {0:?} is out of range")]
    Overflow(String),
}

/// Exact decimal value: `mantissa * 10^exponent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    mantissa: i128,
    exponent: i32,
}

impl Quantity {
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);

        let (mut mantissa, mut exponent) = parse_decimal(number)
            .ok_or_else(|| QuantityError::InvalidNumber(input.to_string()))?;

        match suffix {
            "" => {}
            "n" => exponent -= 9,
            "u" => exponent -= 6,
            "m" => exponent -= 3,
            "k" => exponent += 3,
            "M" => exponent += 6,
            "G" => exponent += 9,
            "T" => exponent += 12,
            "P" => exponent += 15,
            "E" => exponent += 18,
            "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" => {
                let power = match suffix {
                    "Ki" => 1,
                    "Mi" => 2,
                    "Gi" => 3,
                    "Ti" => 4,
                    "Pi" => 5,
                    _ => 6,
                };
                mantissa = 1024i128
                    .checked_pow(power)
                    .and_then(|m| mantissa.checked_mul(m))
                    .ok_or_else(|| QuantityError::Overflow(input.to_string()))?;
            }
            s if s.starts_with('e') || s.starts_with('E') => {
                let exp: i32 = s[1..].parse().map_err(|_| QuantityError::UnknownSuffix {
                    input: input.to_string(),
                    suffix: s.to_string(),
                })?;
                exponent = exponent
                    .checked_add(exp)
                    .ok_or_else(|| QuantityError::Overflow(input.to_string()))?;
            }
            other => {
                return Err(QuantityError::UnknownSuffix {
                    input: input.to_string(),
                    suffix: other.to_string(),
                })
            }
        }

        Ok(Self { mantissa, exponent })
    }

    /// Value in whole units, rounded up
    pub fn value(&self) -> i64 {
        self.scaled(0)
    }

    /// Value in thousandths of a unit, rounded up
    pub fn milli_value(&self) -> i64 {
        self.scaled(-3)
    }

    pub fn as_f64(&self) -> f64 {
        if self.exponent < 0 {
            self.mantissa as f64 / 10f64.powi(-self.exponent)
        } else {
            self.mantissa as f64 * 10f64.powi(self.exponent)
        }
    }

    /// `ceil(self / 10^scale)`, saturating at the i64 bounds
    fn scaled(&self, scale: i32) -> i64 {
        let shift = self.exponent - scale;
        let value = if shift >= 0 {
            10i128
                .checked_pow(shift as u32)
                .and_then(|m| self.mantissa.checked_mul(m))
        } else {
            match 10i128.checked_pow(shift.unsigned_abs()) {
                Some(divisor) => {
                    let quotient = self.mantissa.div_euclid(divisor);
                    let remainder = self.mantissa.rem_euclid(divisor);
                    Some(if remainder > 0 { quotient + 1 } else { quotient })
                }
                // Divisor beyond i128: anything non-zero rounds up to one unit
                None => Some(if self.mantissa > 0 { 1 } else { 0 }),
            }
        };

        match value {
            Some(v) => v.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            None if self.mantissa < 0 => i64::MIN,
            None => i64::MAX,
        }
    }
}

fn parse_decimal(number: &str) -> Option<(i128, i32)> {
    let (negative, digits) = match number.as_bytes().first()? {
        b'-' => (true, &number[1..]),
        b'+' => (false, &number[1..]),
        _ => (false, number),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut mantissa: i128 = 0;
    for b in int_part.bytes().chain(frac_part.bytes()) {
        mantissa = mantissa.checked_mul(10)?.checked_add((b - b'0') as i128)?;
    }
    if negative {
        mantissa = -mantissa;
    }

    Some((mantissa, -(frac_part.len() as i32)))
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}e{}", self.mantissa, self.exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_quantities() {
        assert_eq!(Quantity::parse("100").unwrap().milli_value(), 100_000);
        assert_eq!(Quantity::parse("100m").unwrap().milli_value(), 100);
        assert_eq!(Quantity::parse("0.1").unwrap().milli_value(), 100);
        assert_eq!(Quantity::parse("250m").unwrap().as_f64(), 0.25);
    }

    #[test]
    fn test_memory_quantities() {
        assert_eq!(Quantity::parse("64Mi").unwrap().value(), 64 * 1024 * 1024);
        assert_eq!(Quantity::parse("1G").unwrap().value(), 1_000_000_000);
        assert_eq!(Quantity::parse("1.5Gi").unwrap().value(), 1_610_612_736);
        assert_eq!(Quantity::parse("2e3").unwrap().value(), 2000);
    }

    #[test]
    fn test_value_rounds_up() {
        assert_eq!(Quantity::parse("100m").unwrap().value(), 1);
        assert_eq!(Quantity::parse("1500m").unwrap().value(), 2);
        assert_eq!(Quantity::parse("1n").unwrap().milli_value(), 1);
        assert_eq!(Quantity::parse("0").unwrap().value(), 0);
    }

    #[test]
    fn test_plain_counts() {
        assert_eq!(Quantity::parse("4").unwrap().value(), 4);
        assert_eq!(Quantity::parse(" 2 ").unwrap().value(), 2);
    }

    #[test]
    fn test_invalid_quantities() {
        assert_eq!(Quantity::parse(""), Err(QuantityError::Empty));
        assert!(matches!(
            Quantity::parse("12Qi"),
            Err(QuantityError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            Quantity::parse("abc"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(Quantity::parse("1.2.3").is_err());
    }
}
