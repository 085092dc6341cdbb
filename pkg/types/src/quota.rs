use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use pkg_constants::quota::{LIMITS_PREFIX, REQUESTS_PREFIX, SHORTHAND_RESOURCES};

// --- Quantity ---

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid quantity '{0}'")]
    Invalid(String),
    #[error("unknown suffix '{suffix}' in quantity '{input}'")]
    UnknownSuffix { input: String, suffix: String },
    #[error("quantity '{0}' is finer than one milli-unit")]
    Precision(String),
    #[error("quantity '{0}' overflows")]
    Overflow(String),
    #[error("{resource} overflows when combining {lhs} and {rhs}")]
    ArithmeticOverflow {
        resource: String,
        lhs: Quantity,
        rhs: Quantity,
    },
}

/// A Kubernetes resource quantity (`100Mi`, `1Gi`, `500m`, `2`).
///
/// Held as a signed count of milli-units so sums and differences are exact.
/// Negative values only appear as deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i128);

const BINARY_SUFFIXES: &[(&str, i128)] = &[
    ("Ei", 1 << 60),
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

fn suffix_millis(suffix: &str) -> Option<i128> {
    if let Some((_, factor)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some(factor * 1000);
    }
    let decimal_exp = match suffix {
        "m" => return Some(1),
        "" => 0,
        "k" => 3,
        "M" => 6,
        "G" => 9,
        "T" => 12,
        "P" => 15,
        "E" => 18,
        _ => return None,
    };
    Some(10i128.pow(decimal_exp) * 1000)
}

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    /// Whole units (`Quantity::from_units(2)` == `"2"`).
    pub fn from_units(units: i128) -> Self {
        Quantity(units * 1000)
    }

    pub fn from_millis(millis: i128) -> Self {
        Quantity(millis)
    }

    pub fn millis(&self) -> i128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Quantity) -> Option<Quantity> {
        self.0.checked_add(rhs.0).map(Quantity)
    }

    pub fn checked_sub(self, rhs: Quantity) -> Option<Quantity> {
        self.0.checked_sub(rhs.0).map(Quantity)
    }

    pub fn checked_neg(self) -> Option<Quantity> {
        self.0.checked_neg().map(Quantity)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let (negative, rest) = match s.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(split);
        if suffix == "n" || suffix == "u" {
            return Err(QuantityError::Precision(input.to_string()));
        }
        let multiplier = suffix_millis(suffix).ok_or_else(|| QuantityError::UnknownSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        })?;

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::Invalid(input.to_string()));
        }
        let parse_digits = |digits: &str| -> Result<i128, QuantityError> {
            if digits.is_empty() {
                return Ok(0);
            }
            if !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(QuantityError::Invalid(input.to_string()));
            }
            digits
                .parse::<i128>()
                .map_err(|_| QuantityError::Overflow(input.to_string()))
        };
        let overflow = || QuantityError::Overflow(input.to_string());

        let whole = parse_digits(int_part)?
            .checked_mul(multiplier)
            .ok_or_else(overflow)?;
        let fraction = if frac_part.is_empty() {
            0
        } else {
            let digits = u32::try_from(frac_part.len()).map_err(|_| overflow())?;
            let denom = 10i128.checked_pow(digits).ok_or_else(overflow)?;
            let scaled = parse_digits(frac_part)?
                .checked_mul(multiplier)
                .ok_or_else(overflow)?;
            if scaled % denom != 0 {
                return Err(QuantityError::Precision(input.to_string()));
            }
            scaled / denom
        };
        let total = whole.checked_add(fraction).ok_or_else(overflow)?;
        Ok(Quantity(if negative { -total } else { total }))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let millis = self.0.abs();
        if millis % 1000 != 0 {
            return write!(f, "{}{}m", sign, millis);
        }
        let units = millis / 1000;
        if units == 0 {
            return write!(f, "0");
        }
        for (suffix, factor) in BINARY_SUFFIXES {
            if units % factor == 0 {
                return write!(f, "{}{}{}", sign, units / factor, suffix);
            }
        }
        write!(f, "{}{}", sign, units)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Units(i64),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Units(n) => Ok(Quantity::from_units(i128::from(n))),
        }
    }
}

// --- Resource list ---

/// Quantities keyed by quota resource name (`pods`, `requests.ephemeral-storage`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceList(BTreeMap<String, Quantity>);

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key -> "quantity"` pairs as written in test fixtures and YAML.
    pub fn parse<K: AsRef<str>, V: AsRef<str>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, QuantityError> {
        let mut list = Self::new();
        for (k, v) in pairs {
            list.insert(k.as_ref(), v.as_ref().parse()?);
        }
        Ok(list)
    }

    pub fn insert(&mut self, key: &str, quantity: Quantity) {
        self.0.insert(key.to_string(), quantity);
    }

    pub fn get(&self, key: &str) -> Option<Quantity> {
        self.0.get(key).copied()
    }

    /// Value for `key`, zero when absent.
    pub fn value(&self, key: &str) -> Quantity {
        self.get(key).unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Quantity> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Quantity)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add every entry of `other`, creating missing keys. On overflow the
    /// list is left unchanged.
    pub fn add(&mut self, other: &ResourceList) -> Result<(), QuantityError> {
        self.combine(other, Quantity::checked_add)
    }

    /// Subtract every entry of `other`, creating missing keys. On overflow
    /// the list is left unchanged.
    pub fn sub(&mut self, other: &ResourceList) -> Result<(), QuantityError> {
        self.combine(other, Quantity::checked_sub)
    }

    fn combine(
        &mut self,
        other: &ResourceList,
        op: fn(Quantity, Quantity) -> Option<Quantity>,
    ) -> Result<(), QuantityError> {
        let mut out = self.0.clone();
        for (k, rhs) in other.iter() {
            let lhs = out.get(k).copied().unwrap_or_default();
            let value = op(lhs, rhs).ok_or_else(|| QuantityError::ArithmeticOverflow {
                resource: k.to_string(),
                lhs,
                rhs,
            })?;
            out.insert(k.to_string(), value);
        }
        self.0 = out;
        Ok(())
    }

    pub fn negated(&self) -> Result<ResourceList, QuantityError> {
        self.0
            .iter()
            .map(|(k, v)| {
                v.checked_neg()
                    .map(|n| (k.clone(), n))
                    .ok_or_else(|| QuantityError::ArithmeticOverflow {
                        resource: k.clone(),
                        lhs: Quantity::ZERO,
                        rhs: *v,
                    })
            })
            .collect()
    }

    /// First key holding a negative value.
    pub fn first_negative(&self) -> Option<(&str, Quantity)> {
        self.iter().find(|(_, v)| v.is_negative())
    }

    /// True when every value is zero (or the list is empty).
    pub fn is_zero(&self) -> bool {
        self.0.values().all(Quantity::is_zero)
    }

    /// Drop zero-valued entries.
    pub fn pruned(&self) -> ResourceList {
        ResourceList(
            self.0
                .iter()
                .filter(|(_, v)| !v.is_zero())
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        )
    }

    /// Expand shorthand keys (`ephemeral-storage`) into `requests.` and
    /// `limits.` sub-keys carrying the same value. An explicitly set
    /// sub-key keeps its own value.
    pub fn expand_shorthand(&self) -> ResourceList {
        let mut out = self.clone();
        for short in SHORTHAND_RESOURCES {
            let Some(value) = out.remove(short) else {
                continue;
            };
            for prefix in [REQUESTS_PREFIX, LIMITS_PREFIX] {
                out.0.entry(format!("{}{}", prefix, short)).or_insert(value);
            }
        }
        out
    }
}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, Quantity)> for ResourceList {
    fn from_iter<T: IntoIterator<Item = (String, Quantity)>>(iter: T) -> Self {
        ResourceList(iter.into_iter().collect())
    }
}

// --- Quota limit ---

/// Quota limits at one scope: built-in (`existing`) and extended resources.
///
/// Serialized in the shape of the namespace quota annotation:
/// `{"limit": {"pods": "1"}, "extended": {"requests.ephemeral-storage": "60Mi"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimit {
    #[serde(default, rename = "limit", skip_serializing_if = "ResourceList::is_empty")]
    pub existing: ResourceList,
    #[serde(default, skip_serializing_if = "ResourceList::is_empty")]
    pub extended: ResourceList,
}

impl QuotaLimit {
    pub fn new(existing: ResourceList, extended: ResourceList) -> Self {
        Self { existing, extended }
    }

    pub fn is_empty(&self) -> bool {
        self.existing.is_empty() && self.extended.is_empty()
    }

    /// Limits actually enforced: shorthand expanded, built-in limits taking
    /// precedence over extended ones on the same key.
    pub fn effective(&self) -> ResourceList {
        let mut out = self.extended.expand_shorthand();
        for (k, v) in self.existing.expand_shorthand().iter() {
            out.insert(k, v);
        }
        out
    }
}

// --- Resource quota object ---

/// The quota object provisioned inside a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub name: String,
    pub namespace: String,
    pub hard: ResourceList,
    #[serde(default)]
    pub used: ResourceList,
    pub created_at: DateTime<Utc>,
}
