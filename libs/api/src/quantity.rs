//! Fixed-point resource quantities.
//!
//! A [`Quantity`] is a decimal amount with at most three fractional digits,
//! bounded to the `i64` range of milli-units. It remembers which suffix
//! family it was written in (binary SI, decimal SI, or decimal exponent) and
//! always prints in canonical form: `1.5Gi` parses and re-serializes as
//! `1536Mi`, `0.1m` rounds up to the minimum representable `1m`.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Suffix family a quantity was expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Ki, Mi, Gi, Ti, Pi, Ei (powers of 1024).
    BinarySi,
    /// m, "", k, M, G, T, P, E (powers of 1000, plus milli).
    DecimalSi,
    /// `<mantissa>e<exp>` scientific notation.
    DecimalExponent,
}

/// A fixed-point resource amount in milli-units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quantity {
    milli: i64,
    format: Format,
}

const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 7] = ["", "k", "M", "G", "T", "P", "E"];

impl Quantity {
    pub fn from_milli(milli: i64) -> Self {
        Quantity {
            milli,
            format: Format::DecimalSi,
        }
    }

    /// Whole units in decimal SI, e.g. CPU cores.
    pub fn from_value(value: i64, format: Format) -> Self {
        Quantity {
            milli: value.saturating_mul(1000),
            format,
        }
    }

    pub fn milli_value(&self) -> i64 {
        self.milli
    }

    /// Whole units, rounding away from zero.
    pub fn value(&self) -> i64 {
        if self.milli >= 0 {
            (self.milli + 999) / 1000
        } else {
            (self.milli - 999) / 1000
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn is_zero(&self) -> bool {
        self.milli == 0
    }

    pub fn parse(s: &str) -> Result<Quantity> {
        s.parse()
    }

    fn invalid(s: &str) -> Error {
        Error::Decode(format!("unable to parse quantity {s:?}"))
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Quantity> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Quantity::invalid(s));
        }

        let (negative, rest) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let mut mantissa: i128 = 0;
        let mut frac_len: u32 = 0;
        let mut seen_dot = false;
        let mut digits = 0usize;
        let mut idx = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '0'..='9' => {
                    digits += 1;
                    if digits > 27 {
                        return Err(Quantity::invalid(s));
                    }
                    mantissa = mantissa * 10 + (c as u8 - b'0') as i128;
                    if seen_dot {
                        frac_len += 1;
                    }
                }
                '.' => {
                    if seen_dot {
                        return Err(Quantity::invalid(s));
                    }
                    seen_dot = true;
                }
                _ => {
                    idx = i;
                    break;
                }
            }
        }
        if digits == 0 {
            return Err(Quantity::invalid(s));
        }
        let suffix = &rest[idx..];
        if seen_dot && frac_len == 0 {
            return Err(Quantity::invalid(s));
        }

        let (format, mult_num, mult_den): (Format, i128, i128) = match suffix {
            "" => (Format::DecimalSi, 1, 1),
            "m" => (Format::DecimalSi, 1, 1000),
            "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" => {
                // safe unwrap: the arm pattern is the suffix table
                let pow = BINARY_SUFFIXES
                    .iter()
                    .position(|x| *x == suffix)
                    .unwrap() as u32;
                (Format::BinarySi, 1024i128.pow(pow), 1)
            }
            "k" | "M" | "G" | "T" | "P" | "E" => {
                // safe unwrap: the arm pattern is the suffix table
                let pow = DECIMAL_SUFFIXES
                    .iter()
                    .position(|x| *x == suffix)
                    .unwrap() as u32;
                (Format::DecimalSi, 10i128.pow(3 * pow), 1)
            }
            _ => {
                let exp_str = suffix
                    .strip_prefix('e')
                    .or_else(|| suffix.strip_prefix('E'))
                    .ok_or_else(|| Quantity::invalid(s))?;
                let exp: i32 = exp_str.parse().map_err(|_| Quantity::invalid(s))?;
                if exp.unsigned_abs() > 21 {
                    return Err(Quantity::invalid(s));
                }
                if exp >= 0 {
                    (Format::DecimalExponent, 10i128.pow(exp as u32), 1)
                } else {
                    (Format::DecimalExponent, 1, 10i128.pow(exp.unsigned_abs()))
                }
            }
        };

        // milli = ceil(mantissa * num * 1000 / (10^frac_len * den)), capping
        // on overflow rather than failing: amounts beyond the representable
        // range saturate at the maximum magnitude.
        let milli = mantissa
            .checked_mul(mult_num)
            .and_then(|n| n.checked_mul(1000))
            .map(|num| {
                let den = 10i128.pow(frac_len) * mult_den;
                let mut q = num / den;
                if num % den != 0 {
                    q += 1;
                }
                q
            })
            .unwrap_or(i128::from(i64::MAX));

        let milli = if negative { -milli } else { milli };
        let milli = milli.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
        Ok(Quantity { milli, format })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.milli == 0 {
            return write!(f, "0");
        }

        // Sub-unit amounts always render in decimal milli; whole-unit
        // amounts reduce to the largest suffix that keeps the mantissa
        // integral within the quantity's own suffix family.
        if self.milli % 1000 != 0 {
            return write!(f, "{}m", self.milli);
        }
        let mut units = self.milli / 1000;

        match self.format {
            Format::BinarySi => {
                let mut pow = 0;
                while units % 1024 == 0 && pow < BINARY_SUFFIXES.len() - 1 {
                    units /= 1024;
                    pow += 1;
                }
                write!(f, "{units}{}", BINARY_SUFFIXES[pow])
            }
            Format::DecimalSi => {
                let mut pow = 0;
                while units % 1000 == 0 && pow < DECIMAL_SUFFIXES.len() - 1 {
                    units /= 1000;
                    pow += 1;
                }
                write!(f, "{units}{}", DECIMAL_SUFFIXES[pow])
            }
            Format::DecimalExponent => {
                let mut exp = 0;
                while units % 1000 == 0 && exp < 18 {
                    units /= 1000;
                    exp += 3;
                }
                if exp == 0 {
                    write!(f, "{units}")
                } else {
                    write!(f, "{units}e{exp}")
                }
            }
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Quantity, D::Error> {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a quantity string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Quantity, E> {
                v.parse().map_err(de::Error::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Quantity, E> {
                Ok(Quantity::from_value(v, Format::DecimalSi))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Quantity, E> {
                let v = i64::try_from(v).map_err(de::Error::custom)?;
                Ok(Quantity::from_value(v, Format::DecimalSi))
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_binary_canonicalization() {
        assert_eq!(Quantity::parse("1.5Gi").unwrap().to_string(), "1536Mi");
        assert_eq!(Quantity::parse("1024Ki").unwrap().to_string(), "1Mi");
        assert_eq!(Quantity::parse("1000Ki").unwrap().to_string(), "1000Ki");
        assert_eq!(Quantity::parse("1Ei").unwrap().to_string(), "1Ei");
    }

    #[test]
    fn test_sub_milli_rounds_up() {
        let q = Quantity::parse("0.1m").unwrap();
        assert_eq!(q.milli_value(), 1);
        assert_eq!(q.to_string(), "1m");

        let q = Quantity::parse("-0.1m").unwrap();
        assert_eq!(q.milli_value(), -1);
    }

    #[test]
    fn test_decimal_canonicalization() {
        assert_eq!(Quantity::parse("1500m").unwrap().to_string(), "1500m");
        assert_eq!(Quantity::parse("1.5").unwrap().to_string(), "1500m");
        assert_eq!(Quantity::parse("2000").unwrap().to_string(), "2k");
        assert_eq!(Quantity::parse("2k").unwrap().to_string(), "2k");
        assert_eq!(Quantity::parse("100").unwrap().to_string(), "100");
        assert_eq!(Quantity::parse("-1.5").unwrap().to_string(), "-1500m");
    }

    #[test]
    fn test_exponent_form() {
        let q = Quantity::parse("12e6").unwrap();
        assert_eq!(q.value(), 12_000_000);
        assert_eq!(q.to_string(), "12e6");
        assert_eq!(Quantity::parse("1.5e3").unwrap().to_string(), "1500");
        assert_eq!(Quantity::parse("5e-3").unwrap().to_string(), "5m");
    }

    #[test]
    fn test_invalid_inputs() {
        for bad in ["1.5.0", "", "x", "1.5Gii", "1i", ".", "1.", "--1", "1e"] {
            assert!(Quantity::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_overflow_caps() {
        let q = Quantity::parse("9000E").unwrap();
        assert_eq!(q.milli_value(), i64::MAX);
    }

    #[test]
    fn test_serde_round_trip() {
        let q: Quantity = serde_json::from_str("\"1.5Gi\"").unwrap();
        assert_eq!(serde_json::to_string(&q).unwrap(), "\"1536Mi\"");
        let q: Quantity = serde_json::from_str("250").unwrap();
        assert_eq!(q.milli_value(), 250_000);
    }

    #[test]
    fn test_value_rounds_away_from_zero() {
        assert_eq!(Quantity::from_milli(1001).value(), 2);
        assert_eq!(Quantity::from_milli(-1001).value(), -2);
        assert_eq!(Quantity::from_milli(1000).value(), 1);
    }
}
