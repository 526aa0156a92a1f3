use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Resource name → quantity. Ordered so iteration (and every message built
/// from it) is deterministic.
pub type ResourceList = BTreeMap<String, Quantity>;

const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Rendering family of a quantity. Does not take part in comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    DecimalSI,
    BinarySI,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("quantity must not be empty")]
    Empty,
    #[error("invalid quantity '{0}'")]
    Invalid(String),
    #[error("unknown suffix '{suffix}' in quantity '{input}'")]
    UnknownSuffix { input: String, suffix: String },
    #[error("quantity '{0}' has more precision than one nano unit")]
    Precision(String),
    #[error("quantity '{0}' is out of range")]
    Overflow(String),
}

/// Exact fixed-point resource amount, stored as a count of nano units.
///
/// Parses the orchestrator's quantity notation: `100m`, `2`, `1.5Gi`, `4k`,
/// `1e3`. No floating point is involved at any step.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quantity {
    nanos: i128,
    format: Format,
}

impl Quantity {
    pub const fn zero() -> Self {
        Self {
            nanos: 0,
            format: Format::DecimalSI,
        }
    }

    /// Whole units, decimal format.
    pub const fn from_units(units: i64) -> Self {
        Self {
            nanos: units as i128 * NANOS_PER_UNIT,
            format: Format::DecimalSI,
        }
    }

    pub fn nanos(&self) -> i128 {
        self.nanos
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    // A zero accumulator adopts the format of whatever is added to it.
    fn merged_format(&self, other: &Quantity) -> Format {
        if self.nanos == 0 {
            other.format
        } else {
            self.format
        }
    }

    fn render_decimal(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SUFFIXES: [(&str, i128); 10] = [
            ("E", 1_000_000_000_000_000_000_000_000_000),
            ("P", 1_000_000_000_000_000_000_000_000),
            ("T", 1_000_000_000_000_000_000_000),
            ("G", 1_000_000_000_000_000_000),
            ("M", 1_000_000_000_000_000),
            ("k", 1_000_000_000_000),
            ("", 1_000_000_000),
            ("m", 1_000_000),
            ("u", 1_000),
            ("n", 1),
        ];
        for (suffix, scale) in SUFFIXES {
            if self.nanos % scale == 0 {
                return write!(f, "{}{}", self.nanos / scale, suffix);
            }
        }
        write!(f, "{}n", self.nanos)
    }

    fn render_binary(&self, f: &mut fmt::Formatter<'_>) -> Option<fmt::Result> {
        const SUFFIXES: [(&str, u32); 6] = [
            ("Ei", 60),
            ("Pi", 50),
            ("Ti", 40),
            ("Gi", 30),
            ("Mi", 20),
            ("Ki", 10),
        ];
        if self.nanos % NANOS_PER_UNIT != 0 {
            return None;
        }
        let units = self.nanos / NANOS_PER_UNIT;
        for (suffix, shift) in SUFFIXES {
            let scale = 1i128 << shift;
            if units % scale == 0 {
                return Some(write!(f, "{}{}", units / scale, suffix));
            }
        }
        None
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }
        if self.format == Format::BinarySI {
            if let Some(result) = self.render_binary(f) {
                return result;
            }
        }
        self.render_decimal(f)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, rest) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_len);

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::Invalid(input.to_string()));
        }
        if frac_part.contains('.') {
            return Err(QuantityError::Invalid(input.to_string()));
        }

        let overflow = || QuantityError::Overflow(input.to_string());
        let mut mantissa: i128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(overflow)?;
        }

        let (base, exp10) = parse_suffix(input, suffix)?;

        // nanos = mantissa * base * 10^(exp10 + 9 - fraction digits)
        let mut value = mantissa.checked_mul(base).ok_or_else(overflow)?;
        let exponent = exp10 + 9 - frac_part.len() as i32;
        if exponent >= 0 {
            let factor = 10i128.checked_pow(exponent as u32).ok_or_else(overflow)?;
            value = value.checked_mul(factor).ok_or_else(overflow)?;
        } else {
            let divisor = 10i128.checked_pow(exponent.unsigned_abs());
            match divisor {
                Some(d) if value % d == 0 => value /= d,
                Some(_) => return Err(QuantityError::Precision(input.to_string())),
                None if value == 0 => {}
                None => return Err(QuantityError::Precision(input.to_string())),
            }
        }

        let format = if base == 1 {
            Format::DecimalSI
        } else {
            Format::BinarySI
        };
        Ok(Quantity {
            nanos: if negative { -value } else { value },
            format,
        })
    }
}

/// Returns the suffix as `(binary multiplier, decimal exponent)`.
fn parse_suffix(input: &str, suffix: &str) -> Result<(i128, i32), QuantityError> {
    let decimal = match suffix {
        "" => Some(0),
        "n" => Some(-9),
        "u" => Some(-6),
        "m" => Some(-3),
        "k" => Some(3),
        "M" => Some(6),
        "G" => Some(9),
        "T" => Some(12),
        "P" => Some(15),
        "E" => Some(18),
        _ => None,
    };
    if let Some(exp) = decimal {
        return Ok((1, exp));
    }

    let binary = match suffix {
        "Ki" => Some(10),
        "Mi" => Some(20),
        "Gi" => Some(30),
        "Ti" => Some(40),
        "Pi" => Some(50),
        "Ei" => Some(60),
        _ => None,
    };
    if let Some(shift) = binary {
        return Ok((1i128 << shift, 0));
    }

    if let Some(exp) = suffix.strip_prefix(['e', 'E']) {
        let exp: i32 = exp.parse().map_err(|_| QuantityError::UnknownSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        })?;
        if exp.abs() > 30 {
            return Err(QuantityError::Overflow(input.to_string()));
        }
        return Ok((1, exp));
    }

    Err(QuantityError::UnknownSuffix {
        input: input.to_string(),
        suffix: suffix.to_string(),
    })
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

/// Saturating; keeps the left operand's format.
impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity {
            nanos: self.nanos.saturating_add(rhs.nanos),
            format: self.merged_format(&rhs),
        }
    }
}

/// Saturating; keeps the left operand's format.
impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity {
            nanos: self.nanos.saturating_sub(rhs.nanos),
            format: self.merged_format(&rhs),
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a resource quantity such as \"500m\" or \"1Gi\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
                Ok(Quantity::from_units(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
                Ok(Quantity {
                    nanos: i128::from(v) * NANOS_PER_UNIT,
                    format: Format::DecimalSI,
                })
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
                v.to_string().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

/// Parse a `{name: quantity}` list from string pairs. Test and CLI helper.
pub fn resource_list<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<ResourceList, QuantityError> {
    pairs
        .into_iter()
        .map(|(name, value)| Ok((name.to_string(), value.parse::<Quantity>()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn parses_decimal_suffixes() {
        assert_eq!(q("1").nanos(), 1_000_000_000);
        assert_eq!(q("100m").nanos(), 100_000_000);
        assert_eq!(q("1.5").nanos(), 1_500_000_000);
        assert_eq!(q("2k"), q("2000"));
        assert_eq!(q("1M"), q("1000k"));
        assert_eq!(q("5n").nanos(), 5);
        assert_eq!(q("-3").nanos(), -3_000_000_000);
        assert_eq!(q(".5"), q("500m"));
    }

    #[test]
    fn parses_binary_and_exponent() {
        assert_eq!(q("1Ki"), q("1024"));
        assert_eq!(q("1Gi"), q("1024Mi"));
        assert_eq!(q("0.5Gi"), q("512Mi"));
        assert_eq!(q("1e3"), q("1k"));
        assert_eq!(q("25E-2"), q("250m"));
        assert_eq!(q("2E"), q("2000P"));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
        assert!(matches!("abc".parse::<Quantity>(), Err(QuantityError::Invalid(_))));
        assert!(matches!("1.2.3".parse::<Quantity>(), Err(QuantityError::Invalid(_))));
        assert!(matches!(
            "5Xi".parse::<Quantity>(),
            Err(QuantityError::UnknownSuffix { .. })
        ));
        assert!(matches!("0.1n".parse::<Quantity>(), Err(QuantityError::Precision(_))));
        assert!(matches!("1e40".parse::<Quantity>(), Err(QuantityError::Overflow(_))));
    }

    #[test]
    fn renders_canonically() {
        assert_eq!(q("0").to_string(), "0");
        assert_eq!(q("0Gi").to_string(), "0");
        assert_eq!(q("1000").to_string(), "1k");
        assert_eq!(q("1500m").to_string(), "1500m");
        assert_eq!(q("2000m").to_string(), "2");
        assert_eq!(q("1024Mi").to_string(), "1Gi");
        assert_eq!(q("1536Mi").to_string(), "1536Mi");
        assert_eq!(q("-4").to_string(), "-4");
        assert_eq!(q("1e3").to_string(), "1k");
    }

    #[test]
    fn equality_ignores_format() {
        assert_eq!(q("1Ki"), q("1024"));
        assert!(q("1Gi") > q("1G"));
        assert!(q("100m") < q("1"));
    }

    #[test]
    fn arithmetic_is_exact() {
        let mut total = Quantity::zero();
        for _ in 0..10 {
            total = total + q("100m");
        }
        assert_eq!(total, q("1"));
        assert_eq!((q("2Gi") - q("512Mi")).to_string(), "1536Mi");
        assert_eq!((Quantity::zero() + q("1Gi")).to_string(), "1Gi");
    }

    #[test]
    fn serde_accepts_strings_and_integers() {
        let list: ResourceList =
            serde_json::from_str(r#"{"limits.cpu":"500m","pods":10,"requests.memory":"1Gi"}"#)
                .unwrap();
        assert_eq!(list["limits.cpu"], q("500m"));
        assert_eq!(list["pods"], q("10"));
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(
            json,
            r#"{"limits.cpu":"500m","pods":"10","requests.memory":"1Gi"}"#
        );
    }

    #[test]
    fn resource_list_helper() {
        let list = resource_list([("limits.cpu", "2"), ("limits.memory", "1Gi")]).unwrap();
        assert_eq!(list.len(), 2);
        assert!(resource_list([("cpu", "bad")]).is_err());
    }
}
